use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use meshchat::config::{Config, DEFAULT_CONFIG_PATH};
use meshchat::logging::setup_logging;
use meshchat::shutdown::ShutdownManager;
use meshchat::{LogEvents, MeshNode, NodeSettings, PeerAddress};

#[derive(Parser, Debug)]
#[command(name = "meshchat")]
#[command(about = "Decentralized mesh group chat node", long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Port to accept peers on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    nickname: Option<String>,

    /// Peer to dial at startup, as host:port. Repeatable.
    #[arg(long = "connect", value_name = "HOST:PORT")]
    connect: Vec<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(()) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_default(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(nickname) = args.nickname {
        config.node.nickname = nickname;
    }
    config.network.bootstrap_peers.extend(args.connect);
    if let Err(e) = config.validate() {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    setup_logging(&config.logging, args.verbose);
    tracing::info!("🚀 meshchat v{}", env!("CARGO_PKG_VERSION"));

    let node = Arc::new(MeshNode::new(
        NodeSettings::from(&config),
        Arc::new(LogEvents),
    ));

    match node.start_listening(config.network.port).await {
        Ok(info) => println!("{}", info),
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
    let my_port = node.listening_port().unwrap_or(config.network.port);

    // validate() already checked these parse
    let bootstrap = config.network.bootstrap_addresses().unwrap_or_default();
    connect_bootstrap(&node, &bootstrap, my_port).await;

    let mut shutdown_manager = ShutdownManager::new();
    let input = tokio::spawn(read_chat_lines(node.clone(), shutdown_manager.token()));
    shutdown_manager.register_task(input);

    shutdown_manager.wait_for_shutdown(node).await;
}

async fn connect_bootstrap(node: &MeshNode, peers: &[PeerAddress], my_port: u16) {
    for peer in peers {
        let nickname = node.nickname();
        match node
            .connect(peer.host(), peer.port(), my_port, &nickname)
            .await
        {
            Ok(info) => tracing::info!("{}", info),
            Err(e) => tracing::warn!("{}", e),
        }
    }
}

/// Broadcast each stdin line as a chat message. EOF ends the session.
async fn read_chat_lines(node: Arc<MeshNode>, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let formatted = format!(
                    "[{}] {}: {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    node.nickname(),
                    text
                );
                let relayed = node.broadcast_chat(&formatted).await;
                tracing::debug!("Sent to {} peer(s)", relayed);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    shutdown.cancel();
}
