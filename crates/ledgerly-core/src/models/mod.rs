//! Domain models shared by the providers and the session service.
//!
//! - `User`: an account record as reported by the identity provider
//! - `Profile`: the profile row shown on the profile screens

pub mod profile;
pub mod user;

pub use profile::{Address, Profile};
pub use user::User;
