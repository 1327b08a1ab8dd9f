//! tvbridge: command line front end for the tvbridge engine.
//!
//! `simulate` serves a device profile over the middleware wire protocol;
//! the other subcommands connect an engine (to a remote middleware or an
//! in-process profile) and inspect or drive it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use tvbridge_engine::{DeviceProfile, DtvEngine, EngineConfig, ProfileMiddleware};
use tvbridge_protocol::SourceType;

mod commands;
mod logging;
mod server;

use commands::{CommandError, Target};
use server::{Server, ServerConfig};

const DEFAULT_CONFIG_FILE: &str = "tvbridge.toml";
const DEFAULT_LISTEN: &str = "127.0.0.1:40772";
const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// tvbridge - broadcast middleware binding and simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long, global = true)]
    log_retention_days: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a device profile as a middleware over TCP
    Simulate {
        /// Device profile (TOML); the built-in demo profile when omitted
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Maximum concurrent connections
        #[arg(short = 'c', long)]
        max_connections: Option<usize>,
    },
    /// Resolve and print the route topology
    Routes(TargetArgs),
    /// Print the channel list
    Channels(TargetArgs),
    /// Scan a source and print the resulting channel list
    Scan {
        /// Source type (ter, cab, sat, ip)
        source: SourceType,

        /// Scan a single transponder (kHz) instead of the whole band
        #[arg(long)]
        frequency: Option<u32>,

        #[command(flatten)]
        target: TargetArgs,
    },
    /// Start a channel, list its audio tracks, then stop it
    Play {
        /// Display number ("01", "02", ...)
        number: String,

        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Run against an in-process profile instead of a remote middleware
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Use the built-in demo profile in-process
    #[arg(long, conflicts_with = "profile")]
    demo: bool,

    /// Middleware address, overrides the config file
    #[arg(short, long)]
    address: Option<String>,

    /// Seconds to wait for the middleware
    #[arg(short, long, default_value = "30")]
    wait: u64,
}

/// Configuration file format. The `[engine]` section is read by
/// [`EngineConfig::load`].
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    simulator: SimulatorSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct SimulatorSection {
    listen: Option<String>,
    max_connections: Option<usize>,
    profile: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Explicit path > ./tvbridge.toml > defaults
    let config_path = cli.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the config file.
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs")));
    let log_retention_days = cli
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(7);
    logging::init_logging(
        &log_dir,
        log_retention_days,
        cli.verbose,
        file_config.logging.level.as_deref(),
    )?;

    match cli.command {
        Command::Simulate {
            profile,
            listen,
            max_connections,
        } => {
            let profile_path = profile.or_else(|| file_config.simulator.profile.map(PathBuf::from));
            let profile = match &profile_path {
                Some(path) => DeviceProfile::load(path)?,
                None => DeviceProfile::demo(),
            };
            let listen_addr = match listen {
                Some(addr) => addr,
                None => file_config
                    .simulator
                    .listen
                    .as_deref()
                    .unwrap_or(DEFAULT_LISTEN)
                    .parse()?,
            };
            let config = ServerConfig {
                listen_addr,
                max_connections: max_connections
                    .or(file_config.simulator.max_connections)
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            };

            info!("tvbridge simulator starting...");
            info!("  Profile: {}", profile.name);
            info!(
                "  {} frontends, {} decoders, {} services",
                profile.frontends.len(),
                profile.decoders.len(),
                profile.services.len()
            );
            info!("  Max connections: {}", config.max_connections);

            let server = Server::new(config, Arc::new(ProfileMiddleware::new(profile)));
            server.run().await?;
        }
        Command::Routes(target) => {
            run_engine_command(&config_path, target, commands::routes).await?;
        }
        Command::Channels(target) => {
            run_engine_command(&config_path, target, commands::channels).await?;
        }
        Command::Scan {
            source,
            frequency,
            target,
        } => {
            run_engine_command(&config_path, target, move |engine| {
                commands::scan(engine, source, frequency)
            })
            .await?;
        }
        Command::Play { number, target } => {
            run_engine_command(&config_path, target, move |engine| {
                commands::play(engine, &number)
            })
            .await?;
        }
    }

    Ok(())
}

/// Connect an engine, run `f` on the blocking pool and print its output.
async fn run_engine_command<F>(
    config_path: &Option<PathBuf>,
    args: TargetArgs,
    f: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&DtvEngine) -> Result<String, CommandError> + Send + 'static,
{
    let target = if args.demo {
        Target::Profile(None)
    } else if let Some(profile) = args.profile {
        Target::Profile(Some(profile))
    } else {
        let mut config = EngineConfig::load(config_path.as_deref())?;
        if let Some(address) = args.address {
            config.address = address;
        }
        Target::Remote(config)
    };
    let wait = Duration::from_secs(args.wait);

    let result = tokio::task::spawn_blocking(move || {
        let (gate, engine) = commands::connect(&target, wait)?;
        let output = f(&engine);
        gate.reset();
        output
    })
    .await?;

    match result {
        Ok(output) => {
            print!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}
