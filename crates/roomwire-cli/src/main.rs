use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use roomwire_config::{Config, ConfigManager, LogLevel};
use roomwire_core::{inspect, ClientSocket, Next, Server, ServerSocket, ERROR_EVENT};
use roomwire_observability::{create_namespace_span, create_socket_span, LogManager};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

#[derive(Parser)]
#[command(name = "roomwire")]
#[command(about = "Drive an in-memory roomwire server")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "ROOMWIRE_CONFIG", default_value = "~/.roomwire/config.json")]
    config: String,

    /// Override the configured log level
    #[arg(long, env = "ROOMWIRE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit a batch of clients, exchange messages and broadcast to a room
    Demo(DemoArgs),
    /// Configuration commands
    Config(ConfigArgs),
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

#[derive(Args, Clone)]
struct DemoArgs {
    /// Number of clients to connect
    #[arg(long, default_value = "3")]
    clients: usize,

    /// Room admitted sockets join
    #[arg(long, default_value = "lobby")]
    room: String,

    /// Reject every Nth connection attempt (0 disables)
    #[arg(long, default_value = "0")]
    reject_every: usize,

    /// Override the configured connection limit
    #[arg(long)]
    max_connections: Option<usize>,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Print one value (e.g. server.namespace, logging.level)
    Get { key: String },
    /// Set one value and save
    Set { key: String, value: String },
    /// Print the whole config
    Show,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path =
        roomwire_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    match &cli.command {
        Commands::Init { force } => init_config(&config_path, *force).await,
        Commands::Demo(args) => {
            let (manager, _logs) = bootstrap(&cli, &config_path).await?;
            run_demo(args.clone(), manager.snapshot().await).await
        }
        Commands::Config(args) => {
            let (manager, _logs) = bootstrap(&cli, &config_path).await?;
            handle_config(args.clone(), &manager).await
        }
    }
}

/// Load the config file and install logging
async fn bootstrap(cli: &Cli, config_path: &Path) -> anyhow::Result<(ConfigManager, LogManager)> {
    let manager = ConfigManager::load(config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let mut logging = manager.snapshot().await.logging;
    if let Some(level) = &cli.log_level {
        logging.level = level.parse::<LogLevel>()?;
    }
    if cli.json_logs {
        logging.json_format = true;
    }
    let logs = LogManager::init(&logging)?;
    Ok((manager, logs))
}

async fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!("{}", format!("Config already exists at {:?}", path).yellow());
        println!("{}", "Use --force to overwrite".dimmed());
        return Ok(());
    }

    let manager = ConfigManager::new(Config::default(), path.to_path_buf());
    manager.save().await?;
    println!("{}", format!("Config initialized at {:?}", path).green());
    Ok(())
}

async fn handle_config(args: ConfigArgs, manager: &ConfigManager) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Get { key } => {
            let config = manager.snapshot().await;
            match config.get_value(&key) {
                Some(value) => println!("{}", format!("{} = {}", key, value).green()),
                None => anyhow::bail!("Key not found or unset: {}", key),
            }
        }
        ConfigCommands::Set { key, value } => {
            let mut updated = manager.snapshot().await;
            updated.set_value(&key, &value)?;
            manager.update(|config| *config = updated).await?;
            println!("{}", format!("Set {} = {}", key, value).green());
        }
        ConfigCommands::Show => {
            let config = manager.snapshot().await;
            println!("{}", "Current configuration:".cyan().bold());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

#[derive(Default)]
struct Tally {
    admitted: usize,
    rejected: Vec<String>,
    acks: usize,
    news: usize,
}

async fn run_demo(args: DemoArgs, config: Config) -> anyhow::Result<()> {
    let mut server_config = config.server;
    if args.max_connections.is_some() {
        server_config.max_connections = args.max_connections;
    }
    let server = Server::with_config(server_config);
    let span = create_namespace_span(server.sockets().name());

    let tally = async {
        install_middleware(&server, args.reject_every, &args.room);
        exchange(&server, &args).await
    }
    .instrument(span)
    .await;

    println!("{}", "Demo summary:".cyan().bold());
    println!("  admitted:  {}", tally.admitted.to_string().green());
    println!("  rejected:  {}", tally.rejected.len().to_string().red());
    for reason in &tally.rejected {
        println!("    - {}", reason.dimmed());
    }
    println!("  acks:      {}", tally.acks);
    println!("  news:      {} (room {})", tally.news, args.room);
    Ok(())
}

fn install_middleware(server: &Server, reject_every: usize, room: &str) {
    let attempts = Arc::new(AtomicUsize::new(0));
    server
        .use_middleware(inspect(|socket: &ServerSocket| {
            socket.set_metadata("admitted_at", json!(socket.created_at().to_rfc3339()));
        }))
        .use_middleware(move |socket: &ServerSocket, next: Next| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            socket.set_metadata("attempt", json!(attempt));
            if reject_every > 0 && attempt % reject_every == 0 {
                next.reject(format!("Rejected attempt #{}", attempt));
            } else {
                next.proceed();
            }
        });

    let room = room.to_string();
    server.on_connection(move |socket| {
        let namespace = socket.namespace();
        let _span =
            create_socket_span(socket.id(), namespace.as_ref().map(|ns| ns.name())).entered();
        if let Err(e) = socket.join(&room) {
            warn!("Socket {} could not join {}: {}", socket.id(), room, e);
        }
        let peer = socket.clone();
        socket.on("chat", move |payload| {
            info!("Socket {} says {:?}", peer.id(), payload);
            peer.emit("ack", payload.clone());
        });
    });
}

async fn exchange(server: &Server, args: &DemoArgs) -> Tally {
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let acks = Arc::new(AtomicUsize::new(0));
    let news = Arc::new(AtomicUsize::new(0));

    let mut clients: Vec<ClientSocket> = Vec::with_capacity(args.clients);
    for _ in 0..args.clients {
        // Admission settles before the listeners below attach; a rejection
        // is held on the client until then.
        let client = server.create_socket();
        let tx = errors_tx.clone();
        client.on(ERROR_EVENT, move |payload| {
            let reason = payload
                .first()
                .and_then(|value| value.as_str())
                .unwrap_or("unknown")
                .to_string();
            let _ = tx.send(reason);
        });
        let counter = Arc::clone(&acks);
        client.on("ack", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&news);
        client.on("news", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        clients.push(client);
    }
    drop(errors_tx);

    let mut tally = Tally::default();
    let expected_rejections = clients.iter().filter(|client| !client.is_bridged()).count();
    while tally.rejected.len() < expected_rejections {
        match errors_rx.recv().await {
            Some(reason) => tally.rejected.push(reason),
            None => break,
        }
    }

    for client in clients.iter().filter(|client| client.is_bridged()) {
        tally.admitted += 1;
        client.emit("chat", vec![json!(format!("hello from {}", client.id()))]);
    }

    server
        .to(&args.room)
        .emit("news", vec![json!("welcome to the room")]);

    tally.acks = acks.load(Ordering::SeqCst);
    tally.news = news.load(Ordering::SeqCst);
    tally
}
