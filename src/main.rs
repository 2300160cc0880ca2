//! Sensor Trust Agent CLI
//!
//! Replays captured platform events through a detector session.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use sensor_trust_agent::{
    config::{Config, SourceConfig},
    detector::types::{InboundEvent, Permission},
    platform::{
        ChannelSink, CountingRadio, HandoffLog, KeyValueStore, Platform, PreferenceStore,
        StaticCapabilities, SwitchableNetwork,
    },
    session::{KEY_CONFIRMED_OWNER, KEY_LEARNING, KEY_PENDING_OWNER, KEY_START_TIME},
    transparency::create_shared_log_with_persistence,
    BusEvent, SensorAgent, SessionMode, VERSION,
};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sensor-trust")]
#[command(version = VERSION)]
#[command(about = "Detector session core for behavioral-biometric capture", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Gather,
    Authenticate,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session fed with JSONL events until EOF or Ctrl+C
    Run {
        /// Event file (one JSON event per line); stdin when omitted
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Detectors to assemble (comma list, or "all")
        #[arg(long)]
        sources: Option<String>,

        /// Session mode
        #[arg(long, value_enum, default_value = "gather")]
        mode: ModeArg,

        /// Permissions to treat as denied (location, camera, record_audio, bluetooth)
        #[arg(long, value_delimiter = ',')]
        deny: Vec<String>,
    },

    /// Request gathering for a session owner
    Authorize {
        /// Owner identifier
        owner: String,
    },

    /// Turn learning mode on or off
    Learning {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Show owner, flags and capture statistics
    Status,

    /// Show configuration, optionally saving a new source selection
    Config {
        /// Detectors to enable from now on (comma list, or "all")
        #[arg(long)]
        sources: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            sources,
            mode,
            deny,
        } => cmd_run(input, sources, mode, &deny),
        Commands::Authorize { owner } => cmd_authorize(&owner),
        Commands::Learning { state } => cmd_learning(state),
        Commands::Status => cmd_status(),
        Commands::Config { sources } => cmd_config(sources),
    }
}

fn parse_permission(name: &str) -> Result<Permission> {
    match name.trim().to_lowercase().as_str() {
        "location" => Ok(Permission::Location),
        "camera" => Ok(Permission::Camera),
        "record_audio" | "audio" => Ok(Permission::RecordAudio),
        "bluetooth" => Ok(Permission::Bluetooth),
        other => bail!("unknown permission: {other}"),
    }
}

fn open_store(config: &Config) -> Result<PreferenceStore> {
    PreferenceStore::open(&config.preferences_path())
        .with_context(|| format!("opening {}", config.preferences_path().display()))
}

fn cmd_run(
    input: Option<PathBuf>,
    sources: Option<String>,
    mode: ModeArg,
    deny: &[String],
) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    if let Some(sources) = sources {
        config.sources = SourceConfig::from_csv(&sources);
    }
    if !config.sources.any_enabled() {
        bail!("at least one sensing detector must be enabled");
    }
    config
        .ensure_directories()
        .context("creating data directories")?;

    let mut capabilities = StaticCapabilities::all();
    for name in deny {
        capabilities = capabilities.deny_permission(parse_permission(name)?);
    }

    let (handoff_tx, handoff_rx) = unbounded();
    let platform = Platform {
        capabilities: Arc::new(capabilities),
        network: Arc::new(SwitchableNetwork::default()),
        radio: Arc::new(CountingRadio::default()),
        store: Arc::new(open_store(&config)?),
        sink: Arc::new(ChannelSink::new(handoff_tx)),
    };
    let stats = create_shared_log_with_persistence(config.transparency_path());
    let mut agent = SensorAgent::new(config, platform).with_stats(stats.clone());

    let mode = match mode {
        ModeArg::Gather => SessionMode::Gather,
        ModeArg::Authenticate => SessionMode::Authenticate,
    };
    let listening = agent
        .start_session(mode)
        .context("starting session (run `sensor-trust authorize <owner>` first)")?;
    println!("Sensor Trust Agent v{VERSION}");
    println!("Session started: {listening} detectors listening");
    for (detector, state) in agent.detector_states() {
        match agent.config().poll_timing_for(detector) {
            Some(timing) => println!(
                "  {:<14} {:<10} polls every {}ms, listens up to {}ms",
                detector.name(),
                state.as_str(),
                timing.restart_interval_ms,
                timing.guaranteed_listen_ms
            ),
            None => println!("  {:<14} {}", detector.name(), state.as_str()),
        }
    }
    println!();
    println!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    // Read events on a separate thread so Ctrl+C is honoured while stdin blocks.
    let (event_tx, event_rx) = unbounded::<InboundEvent>();
    thread::spawn(move || {
        let reader: Box<dyn BufRead> = match input {
            Some(path) => match std::fs::File::open(&path) {
                Ok(file) => Box::new(BufReader::new(file)),
                Err(e) => {
                    warn!("cannot open {}: {e}", path.display());
                    return;
                }
            },
            None => Box::new(BufReader::new(std::io::stdin())),
        };
        for (number, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundEvent>(&line) {
                Ok(event) => {
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(line = number + 1, "skipping malformed event: {e}"),
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(inbound) => {
                if let Err(e) = agent.deliver(inbound.detector, inbound.event) {
                    warn!("event not delivered: {e}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("input exhausted");
                break;
            }
        }
    }

    println!();
    println!("Stopping session...");
    let finished = agent.stop_session()?;
    for file in handoff_rx.try_iter() {
        println!("  handed off {} -> {}", file.detector.name(), file.path.display());
    }
    if !agent.pending_handoff().is_empty() {
        println!(
            "  {} of {} files waiting for network",
            agent.pending_handoff().len(),
            finished.len()
        );
    }
    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// An agent over the persisted store, for commands that run no session.
fn offline_agent(config: Config) -> Result<SensorAgent> {
    let platform = Platform {
        capabilities: Arc::new(StaticCapabilities::all()),
        network: Arc::new(SwitchableNetwork::default()),
        radio: Arc::new(CountingRadio::default()),
        store: Arc::new(open_store(&config)?),
        sink: Arc::new(HandoffLog::new()),
    };
    Ok(SensorAgent::new(config, platform))
}

fn cmd_authorize(owner: &str) -> Result<()> {
    let agent = offline_agent(Config::load().unwrap_or_default())?;
    if agent.authorize_gathering(owner) {
        println!("{owner} authorized for gathering (pending confirmation)");
    } else {
        println!("{owner} is already the confirmed owner");
    }
    Ok(())
}

fn cmd_learning(state: Toggle) -> Result<()> {
    let agent = offline_agent(Config::load().unwrap_or_default())?;
    agent
        .bus()
        .subscribe(Arc::new(|event: &BusEvent| info!(?event, "published")));
    let on = matches!(state, Toggle::On);
    agent.set_learning(on);
    println!("Learning mode {}", if on { "on" } else { "off" });
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = open_store(&config)?;

    println!("Sensor Trust Agent Status");
    println!("=========================");
    println!();
    println!(
        "Confirmed owner: {}",
        store
            .get_string(KEY_CONFIRMED_OWNER)
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Pending owner:   {}",
        store
            .get_string(KEY_PENDING_OWNER)
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Learning:        {}",
        store.get_bool(KEY_LEARNING).unwrap_or(false)
    );
    if let Some(installed) = store
        .get_i64(KEY_START_TIME)
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
    {
        println!("Installed:       {}", installed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    let stats = create_shared_log_with_persistence(config.transparency_path());
    println!("{}", stats.summary());
    println!();
    println!("Session files: {}", config.sessions_path().display());
    Ok(())
}

fn cmd_config(sources: Option<String>) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    if let Some(sources) = sources {
        let selection = SourceConfig::from_csv(&sources);
        if !selection.any_enabled() {
            bail!("at least one sensing detector must be enabled");
        }
        config.sources = selection;
        config.save().context("saving configuration")?;
        println!("Sources saved.");
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
