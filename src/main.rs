//! cachegate - Reactor-Based TCP Front-End for a Key-Value Cache
//!
//! This is the main entry point for the cachegate server.
//! It parses the configuration, starts the reactor and worker threads,
//! and runs until a shutdown signal arrives.

use cachegate::commands::CommandDispatcher;
use cachegate::server::{ServerConfig, ServerHandle};
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Maximum message payload size in bytes
    max_payload: usize,
    /// Capacity of the bounded message queues
    queue_capacity: usize,
    /// Poll timeout in milliseconds
    poll_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: server.host,
            port: server.port,
            max_payload: server.max_payload,
            queue_capacity: server.queue_capacity,
            poll_timeout_ms: server.poll_timeout.as_millis() as u64,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = Self::value(&args, i, "--host");
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = Self::parsed_value(&args, i, "--port");
                    i += 2;
                }
                "--max-payload" => {
                    config.max_payload = Self::parsed_value(&args, i, "--max-payload");
                    i += 2;
                }
                "--queue-capacity" => {
                    config.queue_capacity = Self::parsed_value(&args, i, "--queue-capacity");
                    i += 2;
                }
                "--poll-timeout-ms" => {
                    config.poll_timeout_ms = Self::parsed_value(&args, i, "--poll-timeout-ms");
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("cachegate version {}", cachegate::VERSION);
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

    fn value(args: &[String], i: usize, flag: &str) -> String {
        match args.get(i + 1) {
            Some(value) => value.clone(),
            None => {
                eprintln!("Error: {flag} requires a value");
                std::process::exit(1);
            }
        }
    }

    fn parsed_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
        Self::value(args, i, flag).parse().unwrap_or_else(|_| {
            eprintln!("Error: invalid value for {flag}");
            std::process::exit(1);
        })
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            queue_capacity: self.queue_capacity,
            max_payload: self.max_payload,
        }
    }
}

fn print_help() {
    println!(
        r#"
cachegate - Reactor-Based TCP Front-End for a Key-Value Cache

USAGE:
    cachegate [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>            Port to listen on (default: 7171)
        --max-payload <BYTES>    Maximum message payload size (default: 102400)
        --queue-capacity <N>     Bounded message queue capacity (default: 1000)
        --poll-timeout-ms <MS>   Reactor poll timeout (default: 100)
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    cachegate                        # Start on 127.0.0.1:7171
    cachegate --port 7200            # Start on port 7200
    cachegate --host 0.0.0.0         # Listen on all interfaces

CONNECTING:
    Messages travel in sentinel-delimited frames:
    [0x01][length u32 BE][0x02][payload][0x03]
"#
    );
}

fn print_banner(addr: std::net::SocketAddr) {
    println!(
        r#"

                        █████                                  █████
                       ░░███                                  ░░███
   ██████   ██████     ███████   ██████   ███████  ██████   ███████    ██████
  ███░░███ ░░░░░███   ░░░███░   ███░░███ ███░░███ ░░░░░███ ░░░███░    ███░░███
 ░███ ░░░   ███████     ░███   ░███████ ░███ ░███  ███████   ░███    ░███████
 ░███  ███ ███░░███     ░███ █ ░███░░░  ░███ ░███ ███░░███   ░███ █  ░███░░░
 ░░██████ ░░████████    ░░████ ░░██████ ░░███████░░████████  ░░████  ░░██████
  ░░░░░░   ░░░░░░░░      ░░░░   ░░░░░░   ░░░░░███ ░░░░░░░░    ░░░░    ░░░░░░
                                         ███ ░███
                                        ░░██████
                                         ░░░░░░

cachegate v{} - Reactor-Based TCP Front-End for a Key-Value Cache
──────────────────────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        cachegate::VERSION,
        addr
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Basic host resource stats at boot
    match std::thread::available_parallelism() {
        Ok(processors) => info!(processors = processors.get(), "Host resources"),
        Err(e) => info!(error = %e, "Processor count unavailable"),
    }

    // The dispatch table is a stub in this revision: every command gets
    // the unknown-command reply until a storage engine registers handlers.
    let dispatcher = CommandDispatcher::new();

    let mut handle = ServerHandle::spawn(config.server_config(), dispatcher)?;
    info!(addr = %handle.local_addr(), "Listening");

    // Print the banner
    print_banner(handle.local_addr());

    // Run until a shutdown signal arrives
    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");
    handle.stop();
    info!("Server shutdown complete");
    Ok(())
}
