//! Test pattern broadcaster
//!
//! Publishes a moving color-bar pattern and serves it as MJPEG.
//!
//! Run with: cargo run --example test_pattern [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example test_pattern                    # binds to 0.0.0.0:8080
//!   cargo run --example test_pattern localhost          # binds to 127.0.0.1:8080
//!   cargo run --example test_pattern 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! ## Watching
//!
//! Open the printed URL in a browser, or:
//!   ffplay -f mjpeg http://localhost:8080/
//!   curl -s http://localhost:8080/ | head -c 2000 | xxd

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mjpeg_rs::{Frame, MjpegServer, ServerConfig};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Eight vertical bars, scrolled horizontally by `offset` pixels
fn color_bars(offset: u32) -> Frame {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
        [0, 0, 0],
    ];

    let bar_width = WIDTH / BARS.len() as u32;
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);

    for _ in 0..HEIGHT {
        for x in 0..WIDTH {
            let bar = (((x + offset) % WIDTH) / bar_width) as usize % BARS.len();
            data.extend_from_slice(&BARS[bar]);
        }
    }

    Frame::rgb(WIDTH, HEIGHT, data)
}

/// Parse bind address from command line argument.
///
/// Accepts "localhost", "localhost:PORT", "IP" or "IP:PORT".
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8080;

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
    eprintln!("Usage: test_pattern [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
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
            Ok(addr) => ServerConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse()?)
                .add_directive("test_pattern=debug".parse()?),
        )
        .init();

    let server = Arc::new(MjpegServer::new(config));
    server.start()?;

    println!("Open {} in a browser (Ctrl+C to exit)", server.stream_url());

    // Capture loop stand-in: publish at ~30 fps on its own task
    let producer = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(33));
            let mut offset = 0;
            loop {
                ticker.tick().await;
                server.publish(color_bars(offset));
                offset = (offset + 4) % WIDTH;
            }
        })
    };

    let mut stats_ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = stats_ticker.tick() => {
                let stats = server.stats();
                tracing::info!(
                    clients = stats.active_connections,
                    frames_sent = stats.frames_sent,
                    bytes_sent = stats.bytes_sent,
                    "Stats"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    producer.abort();
    server.stop().await;

    Ok(())
}
