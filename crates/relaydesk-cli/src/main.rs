mod context;

use anyhow::{Context as _, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use relaydesk_config::ConfigLoader;
use relaydesk_gateway::{InstanceAction, InstanceMonitor, InstanceResponse};
use relaydesk_logging::init_logging;
use relaydesk_session::SessionController;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use context::Context;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relaydesk messaging gateway client")]
struct Args {
    /// Directory containing relaydesk.toml and the session file
    #[arg(long, env = "RELAYDESK_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Sign in and keep the session for later commands
    Login {
        #[arg(short, long)]
        username: String,

        /// Read from stdin when omitted
        #[arg(short, long, env = "RELAYDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Show the current session
    Whoami,
    /// Request a pairing QR code
    Qrcode { instance: String },
    /// Show the connection status of an instance
    Status { instance: String },
    /// Restart an instance
    Restart { instance: String },
    /// Disconnect the account linked to an instance
    Disconnect { instance: String },
    /// List instances available to an account
    Instances {
        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "RELAYDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Select the instance to manage
    Select {
        instance: String,

        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "RELAYDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Poll an instance and print status changes until interrupted
    Watch {
        instance: String,

        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(&args.config_dir)
        .load_validated()
        .context("failed to load configuration")?;
    init_logging(&config.logging)?;
    info!(config_dir = ?args.config_dir, "Starting relaydesk");

    let mut ctx = Context::build(config, &args.config_dir).await?;
    let result = run(&ctx, args.command).await;
    ctx.report_notices();
    result
}

async fn run(ctx: &Context, command: Command) -> Result<()> {
    let service = &ctx.service;

    match command {
        Command::Login { username, password } => {
            let password = password.map_or_else(prompt_password, Ok)?;
            let outcome = service.login(&username, &password).await?;

            println!(
                "Signed in as {}",
                outcome.subject.as_deref().unwrap_or(&username)
            );
            if let Some(role) = &outcome.role {
                println!("Role:     {}", role);
            }
            if let Some(instance) = &outcome.instance {
                println!("Instance: {}", instance);
            }
        }
        Command::Logout => {
            service.logout().await;
            println!("Signed out");
        }
        Command::Whoami => whoami(service.session()),
        Command::Qrcode { instance } => {
            let response = service.perform(InstanceAction::QrCode, &instance).await?;
            print_instance(&instance, &response);
            match response.qr_code() {
                Some(code) => println!("QR code:  {}", code),
                None => println!("No QR code pending"),
            }
        }
        Command::Status { instance } => {
            let response = service.perform(InstanceAction::Status, &instance).await?;
            print_instance(&instance, &response);
        }
        Command::Restart { instance } => {
            let response = service.perform(InstanceAction::Restart, &instance).await?;
            print_instance(&instance, &response);
        }
        Command::Disconnect { instance } => {
            let response = service
                .perform(InstanceAction::Disconnect, &instance)
                .await?;
            print_instance(&instance, &response);
        }
        Command::Instances { username, password } => {
            let password = password.map_or_else(prompt_password, Ok)?;
            let instances = service.available_instances(&username, &password).await?;
            if instances.is_empty() {
                println!("No instances available");
            }
            for item in &instances {
                if let Some(id) = &item.instance {
                    print_instance(id, item);
                }
            }
        }
        Command::Select {
            instance,
            username,
            password,
        } => {
            let password = password.map_or_else(prompt_password, Ok)?;
            let response = service.select_instance(&username, &password, &instance).await?;
            print_instance(&instance, &response);
        }
        Command::Watch {
            instance,
            interval_secs,
        } => watch(ctx, instance, Duration::from_secs(interval_secs.max(1))).await?,
    }

    Ok(())
}

async fn watch(ctx: &Context, instance: String, period: Duration) -> Result<()> {
    if !ctx.service.session().is_authenticated() {
        anyhow::bail!("not signed in");
    }

    let monitor = InstanceMonitor::spawn(ctx.service.clone(), instance.clone(), period);
    let mut updates = monitor.subscribe();
    println!("Watching {} every {}s, press Ctrl-C to stop", instance, period.as_secs());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    println!("Session ended");
                    break;
                }
                if let Some(status) = *updates.borrow_and_update() {
                    println!("{} {}: {}", Utc::now().format("%H:%M:%S"), instance, status);
                }
            }
        }
    }

    Ok(())
}

fn whoami(session: &SessionController) {
    if !session.is_authenticated() {
        println!("Not signed in");
        return;
    }

    println!("Subject: {}", session.subject().as_deref().unwrap_or("-"));
    println!("Role:    {}", session.role().as_deref().unwrap_or("-"));
    if let Some(expires_at) = session
        .expires_at_ms()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    {
        println!("Expires: {}", expires_at.to_rfc3339());
    }
    if let Some(due) = session
        .timer_status()
        .refresh_due_at_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    {
        println!("Refresh: {}", due.to_rfc3339());
    }
}

fn print_instance(instance: &str, response: &InstanceResponse) {
    let status = response
        .connection_status()
        .map(|status| status.to_string())
        .unwrap_or_else(|| response.status.clone());

    println!("{}: {}", instance, status);
    if let Some(name) = &response.name {
        println!("  Name:  {}", name);
    }
    if let Some(phone) = response.formatted_phone() {
        println!("  Phone: {}", phone);
    }
}

fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}
