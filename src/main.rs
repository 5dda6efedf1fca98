//! Quote Realtime: event distribution server and listener
//!
//! Usage:
//!   quote-realtime serve                                  # Port 8787, open channels
//!   quote-realtime serve --port 9000 --jwt-secret "$KEY"  # JWT-authenticated clients
//!   quote-realtime serve --static-token dev=alice --restricted-channel customers
//!   quote-realtime listen --url ws://127.0.0.1:8787/ws --channel quotes

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use rt_client::{ClientConfig, ConnectionManager, ConnectionState, LifecycleHooks};
use rt_protocol::validate_channel;
use rt_server::{JwtValidator, RealtimeServer, RestrictedChannels, ServerConfig, StaticTokenValidator};
use rt_transport::{TransportConfig, TransportServer};
use secrecy::SecretString;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

#[derive(Parser, Debug)]
#[command(name = "quote-realtime", about = "Quote Realtime: live quote, customer, and activity events")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Append logs to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the realtime server
    Serve(ServeArgs),
    /// Connect as a client and print every received event
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Seconds between heartbeat sweeps
    #[arg(long, default_value = "30")]
    heartbeat_interval_secs: u64,

    /// Seconds of silence before a connection is evicted
    #[arg(long, default_value = "60")]
    heartbeat_timeout_secs: u64,

    /// Bearer token for POST /broadcast (random if not provided)
    #[arg(long, env = "QUOTE_RT_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// HS256 secret for client JWTs
    #[arg(long, env = "QUOTE_RT_JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Fixed client token as TOKEN=USER (repeatable)
    #[arg(long = "static-token", value_parser = parse_static_token)]
    static_tokens: Vec<(String, String)>,

    /// Channel that requires an authenticated connection (repeatable)
    #[arg(long = "restricted-channel")]
    restricted_channels: Vec<String>,

    /// Enable permissive CORS on the HTTP routes
    #[arg(long)]
    cors: bool,
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Server WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8787/ws")]
    url: String,

    /// Token sent in an authenticate frame after every connect
    #[arg(long, env = "QUOTE_RT_TOKEN")]
    token: Option<String>,

    /// Channel to subscribe to (repeatable; defaults to every channel)
    #[arg(long = "channel")]
    channels: Vec<String>,
}

fn parse_static_token(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((token, user)) if !token.is_empty() && !user.is_empty() => {
            Ok((token.to_string(), user.to_string()))
        }
        _ => Err(format!("expected TOKEN=USER, got '{raw}'")),
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let writer = match &cli.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            eprintln!("Logging to {}", path.display());
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(cli.log_file.is_none());
    let installed = if cli.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

fn mask(token: &str) -> String {
    let edges = (token.len() > 16)
        .then(|| Some((token.get(..8)?, token.get(token.len() - 8..)?)))
        .flatten();
    match edges {
        Some((head, tail)) => format!("{head}...{tail}"),
        None => "********".into(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Listen(args) => listen(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    for channel in &args.restricted_channels {
        validate_channel(channel).with_context(|| format!("--restricted-channel {channel}"))?;
    }
    if args.heartbeat_interval_secs == 0 || args.heartbeat_timeout_secs == 0 {
        bail!("heartbeat interval and timeout must be positive");
    }

    let config = ServerConfig::default().with_heartbeat(
        Duration::from_secs(args.heartbeat_interval_secs),
        Duration::from_secs(args.heartbeat_timeout_secs),
    );
    let mut server = RealtimeServer::new(config);

    let auth_mode = match (&args.jwt_secret, args.static_tokens.is_empty()) {
        (Some(secret), static_empty) => {
            if !static_empty {
                warn!("--jwt-secret takes precedence; ignoring --static-token");
            }
            let validator = JwtValidator::new(&SecretString::from(secret.clone()))
                .context("invalid --jwt-secret")?;
            server = server.with_validator(validator);
            "jwt (HS256)".to_string()
        }
        (None, false) => {
            let validator = args
                .static_tokens
                .iter()
                .fold(StaticTokenValidator::new(), |v, (token, user)| v.with_token(token, user));
            let count = validator.len();
            server = server.with_validator(validator);
            format!("static ({count} tokens)")
        }
        (None, true) => "disabled (authenticate frames are refused)".to_string(),
    };
    if !args.restricted_channels.is_empty() {
        server = server.with_channel_policy(RestrictedChannels::new(args.restricted_channels.clone()));
    }

    let token_was_explicit = args.admin_token.is_some();
    let admin_token = args.admin_token.unwrap_or_else(|| {
        let bytes: [u8; 32] = rand::rng().random();
        hex::encode(bytes)
    });

    let server = Arc::new(server);
    server.init();

    let transport_config = TransportConfig {
        port: args.port,
        hostname: args.hostname.clone(),
        enable_cors: args.cors,
        max_connections: Some(args.max_connections),
        admin_token: Some(SecretString::from(admin_token.clone())),
        ..TransportConfig::default()
    };
    let mut transport = TransportServer::start(transport_config, server.clone())
        .await
        .context("failed to start transport")?;

    let port = transport.port();
    println!();
    println!("────────────────────────────────────────────────────────────────");
    println!("  Quote Realtime server running");
    println!();
    println!("  WebSocket:    ws://{}:{port}/ws", args.hostname);
    println!("  Health:       http://{}:{port}/health", args.hostname);
    println!("  Broadcast:    POST http://{}:{port}/broadcast", args.hostname);
    println!("  Client auth:  {auth_mode}");
    if !args.restricted_channels.is_empty() {
        println!("  Restricted:   {}", args.restricted_channels.join(", "));
    }
    println!();
    println!("  Admin token:");
    println!("    {}", mask(&admin_token));
    if !token_was_explicit {
        println!("    (generated; pass --admin-token to choose one)");
    }
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    println!();
    println!("  Shutting down...");
    server.shutdown();
    transport.stop().await;
    println!("  Server stopped.");
    Ok(())
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    let channels = if args.channels.is_empty() {
        rt_protocol::Channels::all().iter().map(|c| c.to_string()).collect()
    } else {
        args.channels
    };

    let mut config = ClientConfig::new(args.url.clone());
    if let Some(token) = args.token {
        config = config.with_token(token);
    }

    let hooks = LifecycleHooks::new()
        .on_open(|| info!("Socket open"))
        .on_close(|close| info!(code = ?close.code, reason = %close.reason, clean = close.clean, "Socket closed"));
    let manager = ConnectionManager::with_hooks(config, hooks);

    manager.on_message(|message| match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to encode event"),
    });

    for channel in &channels {
        manager.subscribe(channel).await?;
    }
    manager.connect().await?;
    info!(url = %args.url, channels = ?channels, "Listening");

    let mut status = manager.watch_status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    bail!("connection task stopped");
                }
                let current = status.borrow_and_update().clone();
                if current.state == ConnectionState::Disconnected {
                    if let Some(error) = current.error {
                        bail!("gave up reconnecting: {error}");
                    }
                }
            }
        }
    }

    manager.disconnect().await?;
    Ok(())
}
