//! sessionguard - command-line front-end for an identity service session.
//!
//! Logs in, keeps the stored credentials fresh, and runs the navigation guard
//! against a built-in route table.

mod routes;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionguard_core::models::AuthorizationRequest;
use sessionguard_core::{Config, GuardConfig, SessionManager, SessionStatus};

/// Log file name inside `log_dir` (rotated daily)
const LOG_FILE_PREFIX: &str = "sessionguard.log";

#[derive(Parser)]
#[command(name = "sessionguard", version, about = "Manage an identity service session")]
struct Cli {
    /// Identity service base URL (overrides the config file)
    #[arg(long, global = true, env = "SESSIONGUARD_BASE_URL")]
    base_url: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        /// Defaults to the last username used
        #[arg(long, short)]
        username: Option<String>,
        /// Ask the service for a long-lived session
        #[arg(long)]
        remember_me: bool,
    },
    /// Show the current session status
    Status,
    /// Show the logged-in user's profile
    Whoami,
    /// Ask the service whether the stored token is still valid
    Validate,
    /// End the session
    Logout,
    /// Ask the policy service for an authorization decision
    Authorize {
        resource: String,
        action: String,
        /// Extra context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// List active sessions for this user
    Sessions,
    /// Run the navigation guard for a route
    CheckRoute { path: String },
    /// Keep the session alive until Ctrl-C
    Watch,
}

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer guard when a log directory is configured; it must
/// stay alive for buffered lines to be flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
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

    let cli = Cli::parse();

    // Keep the on-disk config free of environment overrides
    let stored = Config::load().context("Failed to load config")?;
    let mut config = stored.clone();
    config.apply_env_overrides();
    if let Some(ref url) = cli.base_url {
        config.base_url = url.clone();
    }

    let _log_guard = init_tracing(&config);
    info!(base_url = %config.base_url, storage = ?config.storage, "sessionguard starting");

    let manager = SessionManager::from_config(config)?;

    match cli.command {
        Command::Login {
            username,
            remember_me,
        } => login(&manager, stored, username, remember_me, cli.json).await,
        Command::Status => status(&manager, cli.json).await,
        Command::Whoami => whoami(&manager, cli.json).await,
        Command::Validate => validate(&manager, cli.json).await,
        Command::Logout => {
            manager.session().store().restore();
            manager.logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::Authorize {
            resource,
            action,
            context,
        } => authorize(&manager, resource, action, context, cli.json).await,
        Command::Sessions => sessions(&manager, cli.json).await,
        Command::CheckRoute { path } => check_route(&manager, &path, cli.json).await,
        Command::Watch => watch(&manager).await,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Fail with a friendly message unless a session could be restored.
async fn require_session(manager: &SessionManager) -> Result<()> {
    if manager.initialize().await != SessionStatus::Authenticated {
        anyhow::bail!("Not logged in. Run `sessionguard login` first.");
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(
    manager: &SessionManager,
    mut stored: Config,
    username: Option<String>,
    remember_me: bool,
    json: bool,
) -> Result<()> {
    let username = match username.or_else(|| manager.config().last_username.clone()) {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }

    let password = match std::env::var("SESSIONGUARD_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let user = manager
        .login(&username, &password, remember_me)
        .await
        .context("Login failed")?;

    stored.last_username = Some(username);
    if let Err(e) = stored.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    if json {
        print_json(&user)
    } else {
        println!("Logged in as {}", user.display());
        Ok(())
    }
}

async fn status(manager: &SessionManager, json: bool) -> Result<()> {
    manager.initialize().await;
    let snapshot = manager.session().snapshot();
    if json {
        return print_json(&snapshot);
    }

    println!("Status:        {}", snapshot.status.label());
    if let Some(ref user) = snapshot.user {
        println!("User:          {} ({})", user.display(), user.username);
    }
    if let Some(expires_at) = snapshot.expires_at {
        let remaining = expires_at - chrono::Utc::now();
        println!(
            "Token expires: {} ({} min left)",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            remaining.num_minutes().max(0)
        );
    }
    println!(
        "Refresh token: {}",
        if snapshot.has_refresh_token { "yes" } else { "no" }
    );
    Ok(())
}

async fn whoami(manager: &SessionManager, json: bool) -> Result<()> {
    require_session(manager).await?;
    let user = manager.profile().await?;
    if json {
        return print_json(&user);
    }

    println!("{}", user.display());
    println!("  id:          {}", user.id);
    println!("  username:    {}", user.username);
    if let Some(ref email) = user.email {
        println!("  email:       {}", email);
    }
    if !user.roles.is_empty() {
        let roles: Vec<&str> = user.roles.iter().map(String::as_str).collect();
        println!("  roles:       {}", roles.join(", "));
    }
    if !user.permissions.is_empty() {
        let permissions: Vec<&str> = user.permissions.iter().map(String::as_str).collect();
        println!("  permissions: {}", permissions.join(", "));
    }
    Ok(())
}

async fn validate(manager: &SessionManager, json: bool) -> Result<()> {
    if !manager.session().store().restore() {
        anyhow::bail!("No stored session");
    }
    let response = manager.api().validate().await?;
    if json {
        return print_json(&response);
    }
    if response.valid {
        println!(
            "Token is valid (user {})",
            response.user_id.as_deref().unwrap_or("?")
        );
    } else {
        println!(
            "Token is not valid: {}",
            response.error_message.as_deref().unwrap_or("no reason given")
        );
    }
    Ok(())
}

async fn authorize(
    manager: &SessionManager,
    resource: String,
    action: String,
    context: Option<String>,
    json: bool,
) -> Result<()> {
    require_session(manager).await?;
    let mut request = AuthorizationRequest::new(resource, action);
    if let Some(context) = context {
        let context: serde_json::Value =
            serde_json::from_str(&context).context("--context must be a JSON object")?;
        request = request.with_context(context);
    }

    let response = manager.authorize(&request).await?;
    if json {
        return print_json(&response);
    }
    println!(
        "{:?}{}",
        response.decision.effect,
        response
            .decision
            .reason
            .as_deref()
            .map(|r| format!(": {}", r))
            .unwrap_or_default()
    );
    Ok(())
}

async fn sessions(manager: &SessionManager, json: bool) -> Result<()> {
    require_session(manager).await?;
    let sessions = manager.sessions().await?;
    if json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("No active sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{} {}  {}  {}",
            if session.is_current { "*" } else { " " },
            session.session_id,
            session.ip_address.as_deref().unwrap_or("-"),
            session.last_activity.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn check_route(manager: &SessionManager, path: &str, json: bool) -> Result<()> {
    manager.initialize().await;
    let route = routes::default_routes().resolve(path);
    let decision = manager.guard(GuardConfig::default()).check(&route).await;
    if json {
        return print_json(&decision);
    }
    match decision.target() {
        Some(target) => println!("redirect -> {}", target),
        None => println!("proceed"),
    }
    Ok(())
}

async fn watch(manager: &SessionManager) -> Result<()> {
    require_session(manager).await?;
    let mut status_rx = manager.session().subscribe();
    println!(
        "Session active for {}; refreshing in the background (Ctrl-C to stop)",
        manager.user().map(|u| u.username).unwrap_or_default()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped");
                return Ok(());
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let status = *status_rx.borrow_and_update();
                println!("Session {}", status.label());
                if status == SessionStatus::Unauthenticated {
                    anyhow::bail!("Session ended; log in again");
                }
            }
        }
    }
}
