//! Ledgerly CLI - terminal front end for signing in and out of Ledgerly.
//!
//! Each invocation restores the persisted session, runs one command through
//! the auth flow controller and exits. Sessions and remembered logins live in
//! the configured credential store between runs.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ledgerly_core::auth::{message_for, LoginForm, LoginOutcome, SignupForm, SignupOutcome};
use ledgerly_core::{AuthFlowController, Config, OAuthProvider, Route, SessionService};

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "\
Usage: ledgerly <command>

Commands:
  signup              Create an account
  login [--remember]  Sign in, optionally remembering the login on this device
  oauth <google|apple>
                      Sign in with a Google or Apple account in the browser
  logout              Sign out
  status              Show the current session
  profile             Show the signed-in user's profile
  forget              Delete the remembered login
  help                Show this message

Environment:
  LEDGERLY_AUTH_MODE         mock | supabase (default)
  SUPABASE_URL               Supabase project URL
  SUPABASE_ANON_KEY          Supabase anonymous key
  LEDGERLY_STORE_PASSPHRASE  Seal the file credential store
  RUST_LOG                   Log filter (default: warn)";

/// Log file prefix inside the data directory
const LOG_FILE: &str = "ledgerly.log";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Signup,
    Login { remember: bool },
    OAuth { provider: OAuthProvider },
    Logout,
    Status,
    Profile,
    Forget,
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Help);
        };
        let mut flags = &args[1..];

        let command = match name.as_str() {
            "signup" => Command::Signup,
            "login" => Command::Login {
                remember: flags.iter().any(|f| f == "--remember" || f == "-r"),
            },
            "oauth" => {
                let Some((provider, rest)) = flags.split_first() else {
                    anyhow::bail!("oauth needs a provider: google or apple");
                };
                flags = rest;
                Command::OAuth {
                    provider: provider.parse()?,
                }
            }
            "logout" => Command::Logout,
            "status" => Command::Status,
            "profile" => Command::Profile,
            "forget" => Command::Forget,
            "help" | "--help" | "-h" => Command::Help,
            other => anyhow::bail!("Unknown command '{}'", other),
        };

        let allowed: &[&str] = match command {
            Command::Login { .. } => &["--remember", "-r"],
            _ => &[],
        };
        if let Some(unknown) = flags.iter().find(|f| !allowed.contains(&f.as_str())) {
            anyhow::bail!("Unexpected argument '{}'", unknown);
        }
        Ok(command)
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when a data directory is available, to a daily
/// rolling file. The returned guard must live until exit to flush the file.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config ({}), using defaults", e);
        Config::default()
    });
    config.apply_env()?;

    let _log_guard = init_tracing(&config);
    info!(mode = ?config.auth_mode, backend = ?config.store_backend, "Ledgerly starting");

    let provider = config
        .provider()
        .context("Identity provider is not configured")?;
    let store = config.credential_store()?;
    let service = SessionService::new(provider, store, config.session_settings());
    let _watcher = service.watch_provider();
    spawn_route_logger(&service);

    if let Some(session) = service.restore() {
        debug!(email = %session.email, "Restored session");
    }
    let flow = AuthFlowController::new(service.clone());

    let result = match command {
        Command::Signup => signup(&flow, &mut config).await,
        Command::Login { remember } => login(&flow, &mut config, remember).await,
        Command::OAuth { provider } => oauth(&flow, &mut config, provider).await,
        Command::Logout => {
            flow.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Command::Status => {
            status(&flow);
            Ok(())
        }
        Command::Profile => profile(&service).await,
        Command::Forget => match service.forget_remembered() {
            Ok(()) => {
                println!("Remembered login deleted.");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!(message_for(&e))),
        },
        Command::Help => Ok(()),
    };

    info!("Ledgerly shutting down");
    result
}

/// Log where each auth change would send the user.
fn spawn_route_logger(service: &SessionService) {
    match service.on_auth_state_change() {
        Ok(mut subscription) => {
            tokio::spawn(async move {
                while let Some(change) = subscription.recv().await {
                    debug!(
                        event = ?change.event,
                        route = ?AuthFlowController::route_for(&change),
                        "Auth state changed"
                    );
                }
            });
        }
        Err(e) => warn!(error = %e, "Could not listen for auth changes"),
    }
}

async fn signup(flow: &AuthFlowController, config: &mut Config) -> Result<()> {
    let screen = flow.mount();
    let email = prompt_line("Email: ")?;
    let secret = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;

    match flow
        .signup(&screen, SignupForm::new(email.clone(), secret, confirm))
        .await
    {
        Some(SignupOutcome::Registered { user, signed_in }) => {
            save_last_email(config, &user.email);
            if signed_in {
                println!("Account created. Signed in as {}.", user.email);
            } else {
                println!(
                    "Account created for {}. Confirm your email, then run `ledgerly login`.",
                    user.email
                );
            }
            Ok(())
        }
        Some(SignupOutcome::Rejected(errors)) => {
            for message in [&errors.email, &errors.confirm, &errors.general]
                .into_iter()
                .flatten()
            {
                eprintln!("  {}", message);
            }
            let policy = flow.service().settings().policy;
            if !errors.checks.is_satisfied() {
                eprintln!("Password requirements:");
                for (rule, met) in errors.checks.checklist(&policy) {
                    eprintln!("  [{}] {}", if met { "x" } else { " " }, rule);
                }
            }
            anyhow::bail!("Signup failed for {}", email)
        }
        None => anyhow::bail!("Signup was cancelled"),
    }
}

async fn login(flow: &AuthFlowController, config: &mut Config, remember: bool) -> Result<()> {
    let screen = flow.mount();
    let prefill = flow.prefill();

    let default_email = if prefill.email.is_empty() {
        config.last_email.clone().unwrap_or_default()
    } else {
        prefill.email.clone()
    };
    let prompt = if default_email.is_empty() {
        "Email: ".to_string()
    } else {
        format!("Email [{}]: ", default_email)
    };
    let mut email = prompt_line(&prompt)?;
    if email.is_empty() {
        email = default_email;
    }

    // A remembered login for the same address skips the password prompt and
    // stays remembered.
    let form = if prefill.remember && prefill.email.eq_ignore_ascii_case(&email) {
        println!("Using remembered login for {}.", prefill.email);
        LoginForm::new(email, prefill.secret, true)
    } else {
        let secret = rpassword::prompt_password("Password: ")?;
        LoginForm::new(email, secret, remember)
    };

    match flow.login(&screen, form).await {
        Some(LoginOutcome::LoggedIn(session)) => {
            save_last_email(config, &session.email);
            println!("Signed in as {}.", session.email);
            Ok(())
        }
        Some(LoginOutcome::Rejected(errors)) => {
            for message in [&errors.email, &errors.secret, &errors.general]
                .into_iter()
                .flatten()
            {
                eprintln!("  {}", message);
            }
            anyhow::bail!("Login failed")
        }
        None => anyhow::bail!("Login was cancelled"),
    }
}

async fn oauth(
    flow: &AuthFlowController,
    config: &mut Config,
    provider: OAuthProvider,
) -> Result<()> {
    let url = flow.oauth_url(provider)?;
    println!("Open this address to continue with {}:\n\n  {}\n", provider.as_str(), url);

    let screen = flow.mount();
    let callback = prompt_line("Paste the address the browser opened: ")?;
    match flow.complete_oauth(&screen, callback).await {
        Some(LoginOutcome::LoggedIn(session)) => {
            save_last_email(config, &session.email);
            println!("Signed in as {}.", session.email);
            Ok(())
        }
        Some(LoginOutcome::Rejected(errors)) => {
            anyhow::bail!(errors.general.unwrap_or_else(|| "Sign-in failed".to_string()))
        }
        None => anyhow::bail!("Sign-in was cancelled"),
    }
}

fn status(flow: &AuthFlowController) {
    let service = flow.service();
    println!("Provider: {}", service.provider_name());
    match (flow.initial_route(), service.current_session()) {
        (Route::Main, Some(session)) => {
            println!("Signed in as {}", session.email);
            if let Some(minutes) = session.minutes_until_expiry() {
                println!("Session expires in {} min", minutes);
            }
        }
        _ => println!("Not signed in"),
    }
    if let Some(credential) = service.remembered_credential() {
        println!("Remembered login: {}", credential.email);
    }
}

async fn profile(service: &SessionService) -> Result<()> {
    match service.profile().await {
        Ok(Some(profile)) => {
            println!("{}", profile.display_name());
            if let Some(email) = &profile.email {
                println!("  Email:   {}", email);
            }
            if let Some(address) = &profile.address {
                let line = address.one_line();
                if !line.is_empty() {
                    println!("  Address: {}", line);
                }
                if let Some(phone) = &address.phone {
                    println!("  Phone:   {}", phone);
                }
            }
            Ok(())
        }
        Ok(None) => {
            println!("No profile on file.");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(message_for(&e))),
    }
}

fn save_last_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args(&[])).unwrap(), Command::Help);
        assert_eq!(Command::parse(&args(&["signup"])).unwrap(), Command::Signup);
        assert_eq!(
            Command::parse(&args(&["login"])).unwrap(),
            Command::Login { remember: false }
        );
        assert_eq!(
            Command::parse(&args(&["login", "--remember"])).unwrap(),
            Command::Login { remember: true }
        );
        assert_eq!(Command::parse(&args(&["logout"])).unwrap(), Command::Logout);
        assert_eq!(
            Command::parse(&args(&["oauth", "apple"])).unwrap(),
            Command::OAuth {
                provider: OAuthProvider::Apple
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_input() {
        assert!(Command::parse(&args(&["register"])).is_err());
        assert!(Command::parse(&args(&["logout", "--remember"])).is_err());
        assert!(Command::parse(&args(&["login", "--force"])).is_err());
        assert!(Command::parse(&args(&["oauth"])).is_err());
        assert!(Command::parse(&args(&["oauth", "github"])).is_err());
        assert!(Command::parse(&args(&["oauth", "google", "--remember"])).is_err());
    }
}
