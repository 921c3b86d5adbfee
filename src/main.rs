//! msgrelay: HTTP intake, queue watcher and chat command runner.
//!
//! Usage:
//!   msgrelay [--config msgrelay.toml] serve
//!   msgrelay command '$send_msg [Alice] hello'
//!   msgrelay check-config
//!
//! Environment variables:
//!   MSGRELAY_CONFIG       - Config file path (default: msgrelay.toml)
//!   MSGRELAY_CHANNEL_TYPE - Backend override ("wx" or "ntchat")
//!   MSGRELAY_PORT         - Intake port override
//!   MSGRELAY_QUEUE_PATH   - Queue file override
//!   RUST_LOG              - Log filter (takes precedence over --log-level)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msgrelay::backend::build_backend;
use msgrelay::intake::{self, IntakeState};
use msgrelay::plugin::{HostPlugin, SendMsgPlugin};
use msgrelay::{RelayConfig, RelayService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "msgrelay", version, about = "Relay queued messages to WeChat")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, env = "MSGRELAY_CONFIG", default_value = "msgrelay.toml")]
    config: PathBuf,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the intake server and queue watcher (default)
    Serve,
    /// Handle one chat message as the host would and print the reply
    Command {
        /// Chat text, e.g. "$send_msg [Alice] hello"
        text: String,
    },
    /// Load the config, build the backend and exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %format!("{:#}", e), "fatal error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = RelayConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Command { text } => {
            let service = RelayService::from_config(&config)?;
            let plugin = SendMsgPlugin::new(service);
            let outcome = plugin.on_handle_context(&text).await;
            match outcome.reply {
                Some(reply) => println!("{}", reply.content),
                None => println!("(not a relay command)"),
            }
            Ok(())
        }
        Command::CheckConfig => {
            let backend = build_backend(&config)?;
            println!("channel_type: {}", config.channel()?);
            println!("backend: {}", backend.name());
            println!("intake: {}", config.intake.bind_addr());
            println!("queue: {}", config.queue.resolve_path().display());
            println!("download dir: {}", config.download.resolve_dir().display());
            Ok(())
        }
    }
}

async fn serve(config: RelayConfig) -> Result<()> {
    let service = RelayService::from_config(&config)?;
    tracing::info!(
        channel_type = %service.channel_type(),
        queue = %service.queue().path().display(),
        "msgrelay starting"
    );

    if config.watch.autostart {
        service.start_watch().await?;
    }
    tokio::spawn(service.clone().run());

    let plugin: Arc<dyn HostPlugin> = Arc::new(SendMsgPlugin::new(service.clone()));
    let state = IntakeState::new(service.clone(), plugin);

    let addr = config.intake.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding intake on {}", addr))?;

    let shutdown_service = service.clone();
    intake::serve(listener, state, async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        shutdown_service.stop_watch().await;
    })
    .await?;

    tracing::info!("msgrelay stopped");
    Ok(())
}
