// CLI entry point for the lockstep table relay.
//
// Starts a standalone table server that game clients connect to. The relay
// orders operations into frames and broadcasts them; it never runs the game.
// See `server.rs` for the networking architecture and `round.rs` for the
// round state.
//
// Usage:
//   lockstep-relay [OPTIONS]
//     --config <FILE>          JSON config file (flags below override it)
//     --host <ADDR>            Listen address (default: 127.0.0.1)
//     --port <PORT>            Listen port (default: 7979)
//     --frame-ms <MS>          Flush cadence (default: 66)
//     --players <N>            Seats per table (default: 2)
//     --max-round-secs <SECS>  Round time limit (default: 180)
//
// Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::str::FromStr;

use lockstep_relay::{ServerConfig, start_relay};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = parse_args();

    // Kept alive for the life of the process.
    let (_handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    };

    info!(%addr, "relay running, Ctrl+C to stop");

    // The process exits on SIGINT/SIGTERM by default; the relay holds no
    // state that outlives a round, so there is nothing to flush.
    loop {
        std::thread::park();
    }
}

/// Parse command-line arguments into a `ServerConfig`. Uses simple
/// `std::env::args()` matching, no clap dependency.
fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();

    // --config is applied first so the other flags override the file.
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path: PathBuf = value(&args, i + 1, "--config");
            ServerConfig::load(&path).unwrap_or_else(|e| {
                eprintln!("{}: {e}", path.display());
                std::process::exit(1);
            })
        }
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
            }
            "--host" => {
                i += 1;
                config.host = value(&args, i, "--host");
            }
            "--port" => {
                i += 1;
                config.port = value(&args, i, "--port");
            }
            "--frame-ms" => {
                i += 1;
                config.frame_interval_ms = value(&args, i, "--frame-ms");
            }
            "--players" => {
                i += 1;
                config.round.required_players = value(&args, i, "--players");
            }
            "--max-round-secs" => {
                i += 1;
                config.round.max_round_secs = value(&args, i, "--max-round-secs");
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }
    config
}

fn value<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{flag} requires a valid value");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: lockstep-relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>          JSON config file (flags below override it)");
    println!("  --host <ADDR>            Listen address (default: 127.0.0.1)");
    println!("  --port <PORT>            Listen port (default: 7979)");
    println!("  --frame-ms <MS>          Flush cadence (default: 66)");
    println!("  --players <N>            Seats per table (default: 2)");
    println!("  --max-round-secs <SECS>  Round time limit (default: 180)");
    println!("  --help, -h               Show this help");
}
