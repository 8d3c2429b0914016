//! Simple STOMP broker
//!
//! Run with: cargo run --example simple_broker [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_broker                    # binds to 0.0.0.0:61613
//!   cargo run --example simple_broker localhost          # binds to 127.0.0.1:61613
//!   cargo run --example simple_broker 127.0.0.1:61614    # binds to 127.0.0.1:61614
//!
//! ## Trying it out
//!
//! In one terminal, subscribe:
//!   printf 'CONNECT\n\n\0SUBSCRIBE\ndestination:/topic/news.>\nid:0\n\n\0' | nc localhost 61613 -q 30
//!
//! In another, publish:
//!   printf 'CONNECT\n\n\0SEND\ndestination:/topic/news.sport\n\nscore\0' | nc localhost 61613 -q 1

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stomp_broker::{BrokerConfig, Connection, ConnectionEvent, StompServer};

const DEFAULT_PORT: u16 = 61613;

/// Parse bind address from command line argument.
///
/// Accepts "localhost", "localhost:PORT", "IP" or "IP:PORT".
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: simple_broker [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:61613)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => BrokerConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => BrokerConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stomp_broker=info".parse()?)
                .add_directive("simple_broker=debug".parse()?),
        )
        .init();

    let config = config.idle_timeout(Duration::from_secs(300));
    let server = Arc::new(StompServer::new(config));

    server
        .registry()
        .add_observer(Arc::new(|conn: &Arc<Connection>, event: &ConnectionEvent| {
            if let ConnectionEvent::Frame(frame) = event {
                if !frame.handled {
                    tracing::debug!(session_id = %conn.id(), command = %frame.command, "Unrouted frame");
                }
            }
        }));

    println!("Starting STOMP broker on {}", server.bind_addr());

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.registry().stats_snapshot();
    println!(
        "Served {} connections, delivered {} messages",
        stats.connections_total, stats.messages_delivered
    );

    Ok(())
}
