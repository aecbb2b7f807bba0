use serde::{Deserialize, Serialize};

/// Profile row for the signed-in user.
///
/// Every column is nullable upstream, so every field is optional here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub curp: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub marital: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub medical_id: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Profile {
    /// Name to show in headers, falling back to the email.
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or("Unknown")
            .to_string()
    }
}

impl Address {
    /// Single-line address, skipping empty parts.
    pub fn one_line(&self) -> String {
        [
            &self.street,
            &self.neighborhood,
            &self.city,
            &self.state,
            &self.postal_code,
        ]
        .iter()
        .filter_map(|p| p.as_deref())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}
