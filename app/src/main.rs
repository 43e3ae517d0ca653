//! Ledgerly CLI
//!
//! Signs in against the accounting API and issues authenticated requests
//! through the session pipeline. The session persists between runs.
//!
//! # Environment Variables
//!
//! - `LEDGERLY_API_URL`: API base URL (default `http://localhost:8000`)
//! - `LEDGERLY_DATA_DIR`: where the session database lives
//! - `LEDGERLY_SINGLE_FLIGHT_REFRESH`: share one refresh between concurrent 401s (default `true`)
//! - `LEDGERLY_REQUEST_TIMEOUT_SECS`: per-request timeout, `0` for none
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ledgerly_core::{use_session, App, AuthOutcome, Config, RegisterRequest};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "ledgerly")]
#[command(version, about = "Ledgerly accounting API client", long_about = None)]
struct Args {
    /// Override the API base URL (also: LEDGERLY_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "LEDGERLY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a company and its admin user, then sign in
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "LEDGERLY_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        company_name: String,
        #[arg(long)]
        company_cnpj: Option<String>,
    },
    /// Sign out and forget stored credentials
    Logout,
    /// Print the signed-in user
    Whoami,
    /// Print session state and current route
    Status,
    /// Authenticated GET against an API path, e.g. `/accounts`
    Get { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    ledgerly_core::init_logging();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }

    let app = App::new(config)?;
    app.initialize().await;

    if let Some(output) = app.run(execute(&app, args.command)).await? {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    tracing::debug!(route = ?app.route(), "Done");
    Ok(())
}

async fn execute(app: &App, command: Command) -> Result<Option<Value>> {
    let session = use_session()?;

    match command {
        Command::Login { email, password } => {
            let outcome = session.login(&email, &password).await;
            report(outcome)?;
            Ok(session.user().map(serde_json::to_value).transpose()?)
        }
        Command::Register {
            full_name,
            email,
            password,
            company_name,
            company_cnpj,
        } => {
            let request = RegisterRequest {
                email,
                password,
                full_name,
                company_name,
                company_cnpj,
            };
            let outcome = session.register(&request).await;
            report(outcome)?;
            Ok(session.user().map(serde_json::to_value).transpose()?)
        }
        Command::Logout => {
            session.logout().await;
            Ok(None)
        }
        Command::Whoami => match session.user() {
            Some(user) => Ok(Some(serde_json::to_value(user)?)),
            None => bail!("Not signed in"),
        },
        Command::Status => Ok(Some(json!({
            "session": session.snapshot(),
            "route": app.route(),
        }))),
        Command::Get { path } => {
            let body: Value = session.client().get_json(&path).await?;
            Ok(Some(body))
        }
    }
}

fn report(outcome: AuthOutcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    bail!(outcome.error.unwrap_or_default())
}
