//! EDB monitor: entry point.
//!
//! Opens a console on the debugger board's USB serial link.  Commands come
//! from the terminal, or from a script file with `--script`.
//!
//! # Usage
//!
//! ```text
//! edb-monitor [OPTIONS]
//!
//! Options:
//!   --port <PORT>         Serial device (default: the only port present)
//!   --baud <BAUD>         Baud rate [default from config: 2000000]
//!   --config <PATH>       Config file [default: platform config dir]
//!   --log-level <FILTER>  tracing filter, e.g. `debug` or `edb_monitor=trace`
//!   --record <PATH>       Append every received byte to PATH
//!   --attach              Attach before reading the first command
//!   --script <PATH>       Run commands from PATH instead of the terminal
//!   --save-config         Write the effective configuration and exit
//!   --list-ports          Print the serial ports present and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable        | Flag          |
//! |-----------------|---------------|
//! | `EDB_PORT`      | `--port`      |
//! | `EDB_BAUD`      | `--baud`      |
//! | `EDB_CONFIG`    | `--config`    |
//! | `EDB_LOG`       | `--log-level` |
//!
//! `RUST_LOG` overrides every other log-level source.  Logs go to stderr so
//! they never mix with command output.
//!
//! # Threads
//!
//! ```text
//! tokio runtime
//!  ├─ ctrl_c task ──── trips CancelToken ───┐
//!  └─ spawn_blocking                        ▼
//!       Console::run ── Session ── SerialTransport (blocking reads, short timeout)
//! ```

use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edb_monitor::application::session::Session;
use edb_monitor::cli::console::{Console, ConsoleOut};
use edb_monitor::infrastructure::storage::config::{load_config, save_config, MonitorConfig};
use edb_monitor::infrastructure::transport::serial::{
    available_ports, SerialConnector, SerialSettings,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Host monitor for the EDB energy-harvesting debugger.
#[derive(Debug, Parser)]
#[command(
    name = "edb-monitor",
    about = "Interactive console for the EDB energy-harvesting debugger board",
    version
)]
struct Cli {
    /// Serial device to open, e.g. `/dev/ttyACM0` or `COM4`.
    #[arg(long, env = "EDB_PORT")]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, env = "EDB_BAUD")]
    baud: Option<u32>,

    /// Configuration file to load instead of the platform default.
    #[arg(long, env = "EDB_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info`, `debug`, `edb_monitor=trace`.
    #[arg(long, env = "EDB_LOG")]
    log_level: Option<String>,

    /// Append the raw receive stream to this file.  Replayable with `replay`.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Attach to the board before reading the first command.
    #[arg(long, default_value_t = false)]
    attach: bool,

    /// Read commands from this file instead of the terminal.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Write the effective configuration back to the config file and exit.
    #[arg(long, default_value_t = false)]
    save_config: bool,

    /// Print the serial ports present and exit.
    #[arg(long, default_value_t = false)]
    list_ports: bool,
}

impl Cli {
    /// Layers the command-line values over `config`.
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(port) = &self.port {
            config.serial.port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(record) = &self.record {
            config.session.record_path = Some(record.clone());
        }
    }
}

fn default_history_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".edb_history"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if cli.list_ports {
        for port in available_ports() {
            println!("{port}");
        }
        return Ok(());
    }

    if cli.save_config {
        let path = save_config(&config, cli.config.as_deref()).context("saving configuration")?;
        println!("configuration written to {}", path.display());
        return Ok(());
    }

    let connector = SerialConnector::new(SerialSettings {
        port: config.serial.port.clone(),
        baud_rate: config.serial.baud_rate,
        read_timeout: config.serial.read_timeout(),
    });
    let session = Session::new(connector, config.calibration)
        .with_recording(config.session.record_path.clone());
    let history = config
        .session
        .history_file
        .clone()
        .or_else(default_history_file);
    let mut console = Console::new(session, ConsoleOut::stdout(), history);

    // ── Ctrl-C cancels the command in progress, not the process ───────────────
    let cancel = console.cancel_token();
    tokio::spawn(async move {
        loop {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received; cancelling current command");
                    cancel.cancel();
                }
                Err(e) => {
                    error!("failed to listen for Ctrl+C signal: {e}");
                    break;
                }
            }
        }
    });

    info!(
        port = config.serial.port.as_deref().unwrap_or("auto"),
        baud = config.serial.baud_rate,
        "EDB monitor starting"
    );

    let attach = cli.attach;
    let script = cli.script.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        if attach && !console.execute_line("attach") {
            return Ok(());
        }
        match script {
            Some(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("opening script {}", path.display()))?;
                console.run(BufReader::new(file), false)?;
            }
            None => {
                let interactive = io::stdin().is_terminal();
                console.run(io::stdin().lock(), interactive)?;
            }
        }
        Ok(())
    })
    .await
    .context("console thread panicked")??;

    info!("EDB monitor stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
