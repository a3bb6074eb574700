// relayshare — share the clipboard between machines through a websocket relay
//
// `relayshare serve` runs the relay, `relayshare start` runs a client that
// connects to it. Both run in the foreground.

mod config;
mod handlers;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use config::{Config, LogConfig};
use relayshare_core::{
    HandlerRegistry, History, PacketCodec, RelayClient, RelayClientConfig, RelayServer,
    RelayServerConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relayshare")]
#[command(about = "relayshare — share your clipboard through a websocket relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (overrides RELAYSHARE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Address to listen on (overrides the `listen` config key)
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Connect to the relay and start sharing
    Start,
    /// Inspect or edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = Config::resolve_path(cli.config.as_deref())?;
    let mut config = Config::load_from(&path)?;

    match cli.command {
        Commands::Config { action } => cmd_config(action, config, &path),
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            config.validate()?;
            let _guard = init_tracing(&config.log)?;
            cmd_serve(config).await
        }
        Commands::Start => {
            config.validate()?;
            let _guard = init_tracing(&config.log)?;
            cmd_start(config).await
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `log.level`. The
/// returned guard flushes the file writer and must live until exit.
fn init_tracing(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let Some(file) = log.file.as_deref().filter(|f| !f.is_empty()) else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let file = Path::new(file);
    let dir = file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .with_context(|| format!("Invalid log file {}", file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn cmd_serve(config: Config) -> Result<()> {
    let server = RelayServer::bind(&RelayServerConfig {
        listen_addr: config.listen.clone(),
        ..Default::default()
    })
    .await
    .context("Failed to start relay")?;

    println!("{} Relay listening on {}", "✓".green(), server.local_addr()?.to_string().bright_cyan());
    let distributor = server.distributor();

    tokio::select! {
        result = server.run() => result.context("Relay stopped")?,
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    let stats = distributor.stats();
    info!(
        clients = stats.clients_active,
        frames = stats.frames_relayed,
        bytes = stats.bytes_relayed,
        dropped = stats.frames_dropped,
        "relay stopped"
    );
    Ok(())
}

async fn cmd_start(config: Config) -> Result<()> {
    let codec = PacketCodec::new(config.password.as_deref())
        .context("Failed to build packet codec")?;
    if !codec.is_encrypted() {
        warn!("no password configured, packets are sent unencrypted");
    }

    let history_path = config.history_path()?;
    let history = History::open(&history_path)
        .with_context(|| format!("Failed to open history file {}", history_path.display()))?;

    let mut registry = HandlerRegistry::new();
    handlers::register_all(&mut registry, &config);
    let handlers = registry.init_all().context("Failed to init handlers")?;

    let client = RelayClient::new(
        RelayClientConfig {
            url: config.server_url(),
            name: config.name.clone(),
            ..Default::default()
        },
        Arc::new(codec),
        handlers,
        Arc::new(history),
    )
    .context("Invalid relay client settings")?;

    println!(
        "{} Sharing with {} (history: {})",
        "✓".green(),
        config.server_url().bright_cyan(),
        history_path.display()
    );

    tokio::select! {
        _ = client.run() => {}
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, mut config: Config, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save_to(path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if !config::KEYS.contains(&key.as_str()) {
                anyhow::bail!("Unknown config key: {}", key);
            }
            match config.get(&key) {
                Some(value) => println!("{} = {}", key.bright_cyan(), value),
                None => println!("{} = {}", key.bright_cyan(), "(unset)".dimmed()),
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<28} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }

    Ok(())
}
