//! Command-line demo client for the Socket.IO library: connect to a
//! namespace, listen for events, or emit one and wait for its ack.

mod commands;
mod logging;

use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sio",
    version,
    about = "Socket.IO v4 command-line client",
    long_about = "Connect to a Socket.IO server, listen for named events, or emit one and wait for its ack."
)]
struct Cli {
    /// Server URI, e.g. http://localhost:3000
    uri: String,

    /// Namespace to join.
    #[arg(short, long, default_value = "/")]
    namespace: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip the rotating log file, console output only.
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print events as they arrive until ^C.
    Listen {
        /// Event names to subscribe to (repeatable).
        #[arg(short, long = "on")]
        events: Vec<String>,
    },
    /// Connect, emit one event, optionally await its ack, then disconnect.
    Emit {
        /// Event name.
        event: String,
        /// JSON-encoded arguments, one per value.
        #[arg(value_parser = parse_json)]
        args: Vec<serde_json::Value>,
        /// Wait this many milliseconds for an ack reply.
        #[arg(long)]
        ack_timeout_ms: Option<u64>,
    },
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> sio_core::error::SioResult<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    // Held for the rest of `main`: dropping it flushes and closes the
    // non-blocking file writer, so an unbound `_` here would silence
    // file logging after this statement.
    let _log_guard = if cli.no_log_file {
        logging::init_console_logging(log_level);
        None
    } else {
        let log_dir = std::env::temp_dir().join("sio-cli-logs");
        match logging::init_logging(log_level, Some(&log_dir)) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("failed to open log file, falling back to console: {e}");
                logging::init_console_logging(log_level);
                None
            }
        }
    };

    match cli.command {
        Commands::Listen { events } => commands::connect::run(&cli.uri, &cli.namespace, &events).await,
        Commands::Emit { event, args, ack_timeout_ms } => {
            let timeout = ack_timeout_ms.map(Duration::from_millis);
            commands::emit::run(&cli.uri, &cli.namespace, &event, args, timeout).await
        }
    }
}
