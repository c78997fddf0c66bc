//! blogdesk - terminal client for the blog API.
//!
//! Logs in, keeps the session fresh, and sends authorized requests on the
//! user's behalf. When the session can no longer be used it is cleared and
//! the user is asked to log in again.

use std::io;

use anyhow::{bail, Context, Result};
use blogdesk_core::auth::{SessionError, SessionManager};
use chrono::{Local, Utc};
use blogdesk_core::forms::ProfileForm;
use blogdesk_core::{Config, InvalidReason, Verification};
use reqwest::{Method, StatusCode};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the password for non-interactive login
const PASSWORD_ENV: &str = "BLOGDESK_PASSWORD";

const USAGE: &str = "\
Usage: blogdesk <command> [args]

Commands:
  login [username]                 Log in (password from BLOGDESK_PASSWORD or prompt)
  register <username> <email>      Create an account, then log in
  logout                           Forget the stored session
  status                           Check the session, refreshing it if needed
  whoami                           Show the cached user without contacting the server
  update-profile [--username U] [--email E] [--password]
                                   Change profile fields
  get <path>                       Authorized GET against the API
";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load().context("Failed to load config")?;
    let manager = SessionManager::from_config(&config)?;

    // Ctrl-C aborts in-flight requests without touching the stored session
    let cancel = manager.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = match command.as_str() {
        "login" => login(&manager, &mut config, args.get(1).cloned()).await,
        "register" => register(&manager, &mut config, &args[1..]).await,
        "logout" => {
            manager.logout();
            println!("Logged out.");
            Ok(())
        }
        "status" => status(&manager).await,
        "whoami" => whoami(&manager),
        "update-profile" => update_profile(&manager, &args[1..]).await,
        "get" => get(&manager, args.get(1)).await,
        "help" | "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    manager.shutdown();
    result
}

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password(prompt).context("Failed to read password")
}

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{}", prompt);
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Turn "session is gone" into a login hint; pass other errors through.
fn session_error(e: SessionError) -> anyhow::Error {
    match e {
        SessionError::SessionExpired => anyhow::anyhow!("Session expired. Run `blogdesk login` to sign in again."),
        other => anyhow::anyhow!(other.user_message()),
    }
}

async fn login(manager: &SessionManager, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(u) => u,
        None => prompt_line("Username: ")?,
    };
    let password = read_password("Password: ")?;

    let session = manager.login(&username, &password).await.map_err(session_error)?;
    remember_username(config, &username);

    let name = session.user.map(|u| u.username).unwrap_or(username);
    println!("Logged in as {}.", name);
    Ok(())
}

async fn register(manager: &SessionManager, config: &mut Config, args: &[String]) -> Result<()> {
    let (Some(username), Some(email)) = (args.first(), args.get(1)) else {
        bail!("Usage: blogdesk register <username> <email>");
    };
    let password = read_password("Password: ")?;
    let confirm = match std::env::var(PASSWORD_ENV) {
        Ok(p) => p,
        Err(_) => rpassword::prompt_password("Confirm password: ").context("Failed to read password")?,
    };

    manager
        .register_and_login(username, email, &password, &confirm)
        .await
        .map_err(session_error)?;
    remember_username(config, username);

    println!("Registered and logged in as {}.", username.trim());
    Ok(())
}

fn remember_username(config: &mut Config, username: &str) {
    config.last_username = Some(username.trim().to_string());
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }
}

async fn status(manager: &SessionManager) -> Result<()> {
    match manager.ensure_valid_session().await {
        verification @ Verification::Valid { .. } => {
            let name = verification
                .user()
                .map(|u| u.username.clone())
                .or_else(|| manager.current_user().map(|u| u.username))
                .unwrap_or_else(|| "unknown user".to_string());
            let expires = verification
                .expires_at(Utc::now())
                .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string());
            match (verification.remaining_display(), expires) {
                (Some(left), Some(at)) => println!("Session valid for {} ({} left, expires {}).", name, left, at),
                (Some(left), None) => println!("Session valid for {} ({} left).", name, left),
                _ => println!("Session valid for {}.", name),
            }
            Ok(())
        }
        Verification::Invalid(InvalidReason::Cancelled) => bail!("Cancelled."),
        Verification::Invalid(reason) => {
            info!(?reason, "Session unusable, clearing");
            manager.logout();
            bail!("Not logged in. Run `blogdesk login` to sign in.")
        }
    }
}

fn whoami(manager: &SessionManager) -> Result<()> {
    match manager.current_user() {
        Some(user) => {
            match user.email {
                Some(email) => println!("{} <{}>", user.username, email),
                None => println!("{}", user.username),
            }
            Ok(())
        }
        None if manager.has_credentials() => {
            println!("Logged in (no profile cached).");
            Ok(())
        }
        None => bail!("Not logged in."),
    }
}

fn parse_profile_args(args: &[String]) -> Result<(ProfileForm, bool)> {
    let mut form = ProfileForm::default();
    let mut change_password = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--username" => form.username = iter.next().cloned().context("--username needs a value")?,
            "--email" => form.email = iter.next().cloned().context("--email needs a value")?,
            "--password" => change_password = true,
            other => bail!("Unknown option '{}'", other),
        }
    }
    Ok((form, change_password))
}

async fn update_profile(manager: &SessionManager, args: &[String]) -> Result<()> {
    let (mut form, change_password) = parse_profile_args(args)?;
    if change_password {
        form.current_password = rpassword::prompt_password("Current password: ")?;
        form.new_password = rpassword::prompt_password("New password: ")?;
        form.confirm_new_password = rpassword::prompt_password("Confirm new password: ")?;
    }

    let updated = manager.update_profile(form).await.map_err(session_error)?;
    println!("{}", updated.message);
    Ok(())
}

async fn get(manager: &SessionManager, path: Option<&String>) -> Result<()> {
    let Some(path) = path else {
        bail!("Usage: blogdesk get <path>");
    };
    let gateway = manager.gateway();
    let response = gateway
        .send(gateway.request(Method::GET, path))
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        manager.logout();
        bail!("Session expired. Run `blogdesk login` to sign in again.");
    }

    let text = response.text().await?;
    println!("{}", status);
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_profile_args() {
        let (form, pw) = parse_profile_args(&args(&["--username", "alice2", "--email", "a@x.io"])).expect("parse");
        assert_eq!(form.username, "alice2");
        assert_eq!(form.email, "a@x.io");
        assert!(!pw);

        let (_, pw) = parse_profile_args(&args(&["--password"])).expect("parse");
        assert!(pw);
    }

    #[test]
    fn test_parse_profile_args_errors() {
        assert!(parse_profile_args(&args(&["--username"])).is_err());
        assert!(parse_profile_args(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn test_session_error_hint() {
        let msg = session_error(SessionError::SessionExpired).to_string();
        assert!(msg.contains("blogdesk login"));
    }
}
