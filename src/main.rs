//! replog - Primary-Backup Replicated Message Log
//!
//! Runs a master or a secondary node, and offers a few client commands
//! for inspecting a running node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replog::api::HttpServer;
use replog::config::{NodeRole, ReplogConfig};
use replog::error::{Error, Result};
use replog::network::{NetworkClient, NetworkServer};
use replog::replication::{PrimaryNode, ReplicationNode, SecondaryNode, WireMessage};

/// replog - Primary-Backup Replicated Message Log
#[derive(Parser)]
#[command(name = "replog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "replog.toml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a master node
    Master,

    /// Start a secondary node
    Secondary {
        /// Master cluster address (overrides node.master_address)
        #[arg(short, long)]
        master: Option<String>,
    },

    /// Print a node's log
    Log {
        /// Node API address
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },

    /// Print a node's status
    Status {
        /// Node API address
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "replog.toml")]
        output: PathBuf,

        /// Write a secondary configuration instead of a master one
        #[arg(long)]
        secondary: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Master => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            run_master(config).await
        }
        Commands::Secondary { master } => {
            let mut config = load_config(&cli.config, cli.log_level.as_deref())?;
            if let Some(master) = master {
                config.node.master_address = Some(master);
            }
            run_secondary(config).await
        }
        Commands::Log { address } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            run_log(address).await
        }
        Commands::Status { address } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            run_status(address).await
        }
        Commands::Init { output, secondary } => run_init(output, secondary),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config, then start logging at the CLI level or the configured one
fn load_config(path: &Path, cli_level: Option<&str>) -> Result<ReplogConfig> {
    let config = match ReplogConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            init_logging(cli_level.unwrap_or("info"));
            tracing::error!("Failed to load configuration from {:?}: {}", path, e);
            return Err(e);
        }
    };

    init_logging(cli_level.unwrap_or(&config.logging.level));
    tracing::info!("Loaded configuration for node: {}", config.node.id);
    Ok(config)
}

/// Start the master node
async fn run_master(config: ReplogConfig) -> Result<()> {
    if config.node.role != NodeRole::Master {
        return Err(Error::Config(format!(
            "node {} is configured as {}, not master",
            config.node.id, config.node.role
        )));
    }

    tracing::info!("Starting replog master {}", config.node.id);

    let client = Arc::new(NetworkClient::new(config.replication.connect_timeout()));
    let primary = Arc::new(PrimaryNode::new(
        config.node.id.clone(),
        &config.replication,
        client,
    ));

    let (incoming_tx, incoming_rx) = mpsc::channel(1000);
    let network_server = NetworkServer::bind(&config.node.bind_address, incoming_tx).await?;
    spawn_incoming_loop(primary.clone(), incoming_rx);

    let http_server = HttpServer::with_primary(config.api.clone(), Arc::clone(&primary));

    serve(network_server, http_server).await
}

/// Start a secondary node
async fn run_secondary(config: ReplogConfig) -> Result<()> {
    if config.node.role != NodeRole::Secondary {
        return Err(Error::Config(format!(
            "node {} is configured as {}, not secondary",
            config.node.id, config.node.role
        )));
    }

    let master_address = config
        .node
        .master_address
        .clone()
        .ok_or_else(|| Error::Config("node.master_address is required for secondaries".into()))?;
    let endpoint = config.advertise_address().to_string();

    tracing::info!(
        "Starting replog secondary {} at {}, master {}",
        config.node.id,
        endpoint,
        master_address
    );

    let client = Arc::new(NetworkClient::new(config.replication.connect_timeout()));
    let secondary = Arc::new(SecondaryNode::new(
        config.node.id.clone(),
        endpoint,
        master_address,
        &config.secondary,
        client,
    ));

    let (incoming_tx, incoming_rx) = mpsc::channel(1000);
    let network_server = NetworkServer::bind(&config.node.bind_address, incoming_tx).await?;
    spawn_incoming_loop(secondary.clone(), incoming_rx);

    // the listener is bound, so the master can deliver as soon as it accepts us
    let registering = Arc::clone(&secondary);
    tokio::spawn(async move {
        registering.register().await;
    });

    let http_server = HttpServer::new(config.api.clone(), secondary);

    serve(network_server, http_server).await
}

/// Feed cluster frames to the node, one at a time
fn spawn_incoming_loop(
    node: Arc<dyn ReplicationNode>,
    mut incoming_rx: mpsc::Receiver<(String, WireMessage)>,
) {
    tokio::spawn(async move {
        tracing::info!("Incoming message processing loop started");
        while let Some((peer_addr, message)) = incoming_rx.recv().await {
            let kind = message.type_name();
            if let Err(e) = node.handle_message(&peer_addr, message).await {
                tracing::warn!("Failed to handle {} from {}: {}", kind, peer_addr, e);
            }
        }
        tracing::info!("Incoming message processing loop stopped");
    });
}

/// Run the cluster and HTTP servers until one fails or ctrl-c
async fn serve(network_server: NetworkServer, http_server: HttpServer) -> Result<()> {
    tokio::select! {
        result = network_server.start() => {
            if let Err(e) = result {
                tracing::error!("Network server error: {}", e);
                return Err(e);
            }
        }
        result = http_server.start() => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    network_server.stop();
    Ok(())
}

/// Print a node's log dump
async fn run_log(address: String) -> Result<()> {
    let url = format!("http://{}/", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            println!("{}", response.text().await?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to fetch log: {}", e);
            Err(e.into())
        }
    }
}

/// Print a node's status
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(e.into())
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, secondary: bool) -> Result<()> {
    let role = if secondary { NodeRole::Secondary } else { NodeRole::Master };
    let content = format!(
        "# replog {} configuration\n\n{}",
        role,
        ReplogConfig::sample(role).to_toml()?
    );

    std::fs::write(&output, content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then start with: replog {} --config {}", role, output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match ReplogConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Role: {}", config.node.role);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Advertise: {}", config.advertise_address());
            if let Some(master) = &config.node.master_address {
                println!("  Master: {}", master);
            }
            println!("  API: {}", config.api.bind_address);
            let retries = match config.replication.max_retries {
                0 => "unlimited".to_string(),
                n => n.to_string(),
            };
            println!("  Max Retries: {}", retries);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
