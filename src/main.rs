//! flintkv server entry point.
//!
//! Wires the pieces together: parse flags, set up tracing, open the
//! persistence log, replay it into a fresh store, start the periodic sync
//! task, then accept connections until ctrl-c. Shutdown stops the sync
//! task before closing the log so the final sync sees every append.

use flintkv::commands::dispatch;
use flintkv::connection::{handle_connection, ConnectionStats};
use flintkv::persistence::{start_sync_task, AofLog};
use flintkv::storage::Store;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration.
struct Config {
    host: String,
    port: u16,
    log_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: flintkv::DEFAULT_HOST.to_string(),
            port: flintkv::DEFAULT_PORT,
            log_path: flintkv::DEFAULT_LOG_PATH.to_string(),
        }
    }
}

impl Config {
    /// Parses configuration from command-line arguments.
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--aof" | "-a" => {
                    if i + 1 < args.len() {
                        config.log_path = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --aof requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("flintkv version {}", flintkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
flintkv - in-memory key-value server with append-only persistence

USAGE:
    flintkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>    Port to listen on (default: 6379)
    -a, --aof <PATH>     Persistence log path (default: database.aof)
    -v, --version        Print version information
        --help           Print this help message

CONNECTING:
    Use redis-cli or any Redis client:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET name flint
    OK
    127.0.0.1:6379> GET name
    "flint"
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("flintkv v{} starting", flintkv::VERSION);

    // shared keyspace
    let store = Arc::new(Store::new());

    // open the log and replay it before accepting a single connection
    let log = Arc::new(AofLog::open(&config.log_path)?);
    let replayed = log.replay(|request| {
        if dispatch(&store, &request).is_none() {
            warn!("skipping unknown command in persistence log");
        }
    })?;
    info!(
        path = %config.log_path,
        records = replayed,
        "persistence log replayed"
    );

    // periodic fsync, bound to this scope: dropped (and stopped) on shutdown
    let sync_task = start_sync_task(Arc::clone(&log));

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(addr = %config.bind_address(), "listening");

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
        info!("shutdown signal received");
    };

    tokio::select! {
        _ = accept_loop(listener, store, Arc::clone(&log), stats) => {}
        _ = shutdown => {}
    }

    // stop syncing first, then push the last appends to disk
    drop(sync_task);
    log.close()?;
    info!("server shutdown complete");
    Ok(())
}

/// Accepts connections and spawns one handler task per client.
async fn accept_loop(
    listener: TcpListener,
    store: Arc<Store>,
    log: Arc<AofLog>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = Arc::clone(&store);
                let log = Arc::clone(&log);
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, store, log, stats).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}
