//! Property237 command-line client
//!
//! Drives the authenticated request pipeline from a terminal:
//! 1. Loads configuration and opens the persisted credential store
//! 2. Runs one command (sign-in, OTP, sign-out, or a raw API call)
//! 3. Prints the JSON response to stdout; logs go to stderr

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use api_client::{ApiClient, OtpChannel, OtpPurpose, SessionEvent};
use clap::{Parser, Subcommand, ValueEnum};
use property_auth::FileCredentialStore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "property237", version, about = "Property237 API client")]
struct Cli {
    /// Config file (default: $CONFIG_PATH or ./property237.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        identifier: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        remember_me: bool,
    },
    /// Register a new account from a JSON payload
    Signup { payload: String },
    /// Ask the backend to send a one-time code
    OtpRequest {
        #[arg(long)]
        recipient: String,
        #[arg(long, value_enum)]
        channel: Channel,
        #[arg(long, value_enum)]
        purpose: Purpose,
    },
    /// Verify a one-time code and store the session
    OtpVerify {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        code: String,
        #[arg(long, value_enum)]
        purpose: Purpose,
    },
    /// Ask for password reset instructions
    PasswordResetRequest {
        #[arg(long)]
        identifier: String,
    },
    /// Set a new password with a reset token
    PasswordResetConfirm {
        #[arg(long)]
        token: String,
        #[arg(long)]
        new_password: String,
        /// Defaults to --new-password
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Sign out locally and on the backend
    Logout,
    /// Print the stored user
    Whoami,
    Get { path: String },
    Delete { path: String },
    Post { path: String, body: Option<String> },
    Put { path: String, body: Option<String> },
    Patch { path: String, body: Option<String> },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Channel {
    Phone,
    Email,
}

impl From<Channel> for OtpChannel {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Phone => OtpChannel::Phone,
            Channel::Email => OtpChannel::Email,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Purpose {
    Signup,
    Login,
    PasswordReset,
    PhoneChange,
}

impl From<Purpose> for OtpPurpose {
    fn from(purpose: Purpose) -> Self {
        match purpose {
            Purpose::Signup => OtpPurpose::Signup,
            Purpose::Login => OtpPurpose::Login,
            Purpose::PasswordReset => OtpPurpose::PasswordReset,
            Purpose::PhoneChange => OtpPurpose::PhoneChange,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let plain_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .init();
}

fn parse_body(body: Option<&str>) -> Result<serde_json::Value> {
    match body {
        Some(raw) => serde_json::from_str(raw).context("request body must be valid JSON"),
        None => Ok(serde_json::json!({})),
    }
}

async fn run(client: &ApiClient, command: Command) -> Result<serde_json::Value> {
    let value = match command {
        Command::Login {
            identifier,
            password,
            remember_me,
        } => {
            let response = client.sign_in(&identifier, &password, remember_me).await?;
            serde_json::json!({
                "success": response.success,
                "message": response.message,
                "user": response.user,
            })
        }
        Command::Signup { payload } => client.sign_up(&parse_body(Some(&payload))?).await?,
        Command::OtpRequest {
            recipient,
            channel,
            purpose,
        } => {
            client
                .request_otp(&recipient, channel.into(), purpose.into())
                .await?
        }
        Command::OtpVerify {
            recipient,
            code,
            purpose,
        } => {
            let response = client.verify_otp(&recipient, &code, purpose.into()).await?;
            serde_json::json!({
                "success": response.success,
                "message": response.message,
                "user": response.user,
            })
        }
        Command::PasswordResetRequest { identifier } => {
            client.request_password_reset(&identifier).await?
        }
        Command::PasswordResetConfirm {
            token,
            new_password,
            confirm,
        } => {
            let confirm = confirm.as_deref().unwrap_or(&new_password);
            client
                .confirm_password_reset(&token, &new_password, confirm)
                .await?
        }
        Command::Logout => {
            client.sign_out().await?;
            serde_json::json!({"signed_out": true})
        }
        Command::Whoami => client.current_user().unwrap_or(serde_json::Value::Null),
        Command::Get { path } => client.get(&path).await?,
        Command::Delete { path } => client.delete(&path).await?,
        Command::Post { path, body } => client.post(&path, &parse_body(body.as_deref())?).await?,
        Command::Put { path, body } => client.put(&path, &parse_body(body.as_deref())?).await?,
        Command::Patch { path, body } => client.patch(&path, &parse_body(body.as_deref())?).await?,
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let (config_path, explicit) = Config::resolve_path(cli.config.as_deref());
    let mut config = Config::load(&config_path, explicit)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if cli.base_url.is_some() {
        config.apply_overrides(None, cli.base_url.clone());
        config.validate().context("invalid --base-url")?;
    }

    let credentials_path = config.credentials_path();
    let store = FileCredentialStore::open(&credentials_path).with_context(|| {
        format!(
            "failed to open credential store at {}",
            credentials_path.display()
        )
    })?;
    info!(
        base_url = %config.api.base_url,
        credentials = %credentials_path.display(),
        "configuration loaded"
    );

    let client = ApiClient::new(config.client_config(), Arc::new(store));
    let mut session_events = client.subscribe();

    let outcome = run(&client, cli.command).await;

    if let Ok(SessionEvent::Terminated { reason }) = session_events.try_recv() {
        eprintln!("session expired ({reason}); sign in again with `property237 login`");
    }

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
