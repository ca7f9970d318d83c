use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use rustyre_node::{Event, Node, NodeConfig};

#[derive(Parser)]
#[command(name = "rustyre", about = "Local-area clustering node with group chat")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Group to join; stdin lines are shouted to it
    #[arg(short, long, default_value = "chat")]
    group: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        rustyre_node::logging::init_json();
    } else {
        rustyre_node::logging::init();
    }

    let config = match &cli.config {
        Some(path) => match NodeConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => NodeConfig::default(),
    };

    let mut node = match Node::new(config).await {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("failed to start node: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "{} on {}:{}, shouting to '{}'",
        node.identity(),
        node.addr(),
        node.port(),
        cli.group
    );
    if let Err(e) = node.join(cli.group.as_str()).await {
        tracing::error!("failed to join {}: {e}", cli.group);
        std::process::exit(1);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !line.is_empty() {
                            let _ = node.shout(cli.group.as_str(), line.into_bytes()).await;
                        }
                    }
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        tracing::warn!("stdin error: {e}");
                        break;
                    }
                }
            }

            event = node.recv() => {
                match event {
                    Some(Event::Enter { peer, endpoint }) => {
                        println!("* {peer} entered from {endpoint}");
                    }
                    Some(Event::Exit { peer }) => println!("* {peer} left"),
                    Some(Event::Join { peer, group }) => println!("* {peer} joined {group}"),
                    Some(Event::Leave { peer, group }) => println!("* {peer} left {group}"),
                    Some(Event::Shout { peer, content, .. })
                    | Some(Event::Whisper { peer, content }) => {
                        println!("{peer}: {}", String::from_utf8_lossy(&content));
                    }
                    None => break,
                }
            }
        }
    }

    node.disconnect().await;
}
