//! Binary entrypoint for the serialkeeper CLI.
//!
//! Commands:
//! - `ports` - list the serial ports the host exposes
//! - `info <port>` - show the details of one port as JSON
//! - `monitor [--port <path>] [-b <baud>] [--eol lf] [--stats]` - connect, print received
//!   bytes to stdout and send stdin lines to the device
//! - `init` - write a starter `serialkeeper.toml`
//!
//! See the library crate docs for module-level details: `serialkeeper::`.
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use serialkeeper::config::Config;
use serialkeeper::link::{ConnectionManager, LinkEvent, LinkSettings};
use serialkeeper::port::PortBackend;

#[derive(Parser)]
#[command(name = "serialkeeper")]
#[command(about = "Resilient serial port connection manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "serialkeeper.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Show details of one port
    Info {
        /// Port name (e.g., /dev/ttyUSB0 or COM3)
        port: String,
    },
    /// Connect and relay data between the device and the terminal
    Monitor {
        /// Device serial port (overrides the config file)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (overrides the config file)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
        /// Line ending appended to each stdin line
        #[arg(long, value_enum, default_value_t = LineEnding::Lf)]
        eol: LineEnding,
        /// Print statistics updates to stderr as JSON
        #[arg(long)]
        stats: bool,
    },
    /// Write a default configuration file
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum LineEnding {
    None,
    Lf,
    Cr,
    Crlf,
}

impl LineEnding {
    fn bytes(self) -> &'static [u8] {
        match self {
            LineEnding::None => b"",
            LineEnding::Lf => b"\n",
            LineEnding::Cr => b"\r",
            LineEnding::Crlf => b"\r\n",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init => None,
        _ => Config::load_if_present(&cli.config)
            .await
            .with_context(|| format!("Cannot use configuration {}", cli.config))?,
    };
    init_logging(&config, cli.verbose);
    if config.is_none() && !matches!(cli.command, Commands::Init) {
        info!("No config file at {}, using defaults", cli.config);
    }
    let config = config.unwrap_or_default();

    match cli.command {
        Commands::Ports => {
            let manager = manager(&config)?;
            let ports = manager.get_port_details().await?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{:<24} {}", port.name, port.description());
            }
            manager.shutdown().await;
        }
        Commands::Info { port } => {
            let manager = manager(&config)?;
            let info = manager.get_port_info(&port).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            manager.shutdown().await;
            if !info.available {
                bail!("port {} not found", port);
            }
        }
        Commands::Monitor {
            port,
            baud,
            eol,
            stats,
        } => {
            let mut link = config.link.clone();
            if let Some(port) = port {
                link.port = port;
            }
            if let Some(baud) = baud {
                link.baud_rate = baud;
            }
            let params = link.to_params().context("Invalid connection parameters")?;
            let manager = manager(&config)?;
            let result = monitor(&manager, params, eol, stats).await;
            manager.shutdown().await;
            result?;
        }
        Commands::Init => {
            info!("Writing default configuration to {}", cli.config);
            if Path::new(&cli.config).exists() {
                bail!("{} already exists, not overwriting", cli.config);
            }
            Config::create_default(&cli.config).await?;
            println!("Created {}", cli.config);
        }
    }

    Ok(())
}

fn manager(config: &Config) -> Result<ConnectionManager> {
    let settings: LinkSettings = config.settings();
    Ok(ConnectionManager::new(backend()?, settings))
}

#[cfg(feature = "serial")]
fn backend() -> Result<Arc<dyn PortBackend>> {
    Ok(Arc::new(serialkeeper::port::system::SystemBackend::new()))
}

#[cfg(not(feature = "serial"))]
fn backend() -> Result<Arc<dyn PortBackend>> {
    Err(anyhow::anyhow!(
        "built without the `serial` feature; no host serial ports available"
    ))
}

async fn monitor(
    manager: &ConnectionManager,
    params: serialkeeper::ConnectionParams,
    eol: LineEnding,
    show_stats: bool,
) -> Result<()> {
    let mut events = manager.subscribe();
    manager
        .connect(params.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", params.port))?;
    info!("Monitoring {} (Ctrl+C to quit)", params);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing {}", params.port);
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    LinkEvent::DataReceived(bytes) => {
                        stdout.write_all(&bytes)?;
                        stdout.flush()?;
                    }
                    LinkEvent::ErrorOccurred(message) => eprintln!("error: {}", message),
                    LinkEvent::ConnectionChanged(true) => {}
                    LinkEvent::ConnectionChanged(false) => {
                        warn!("Connection to {} closed", params.port);
                        break;
                    }
                    LinkEvent::StatisticsUpdated(snapshot) => {
                        if show_stats {
                            eprintln!("{}", serde_json::to_string(&snapshot)?);
                        }
                    }
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        let mut payload = line.into_bytes();
                        payload.extend_from_slice(eol.bytes());
                        if let Err(e) = manager.send(&payload).await {
                            warn!("Send failed: {}", e);
                        }
                    }
                    None => {
                        debug!("stdin closed");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    let stats = manager.get_statistics().await;
    info!(
        "Session: {} bytes received, {} bytes sent, {} errors",
        stats.rx_bytes, stats.tx_bytes, stats.error_count
    );
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // Console output only when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stderr);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
