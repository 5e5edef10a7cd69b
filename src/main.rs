//! Sensor Relay CLI
//!
//! Collects sensor data, buffers it on disk, and commits it to a remote store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use sensor_relay::{
    config::{Config, ProbeSelection, RemoteConfig, RemoteTarget},
    datum::catalog,
    probe::{ListeningProbe, PollingProbe, SimulatedAccelerometer, SimulatedCompass, SimulatedLocation},
    protocol::{Protocol, ProtocolEvent, ProtocolSettings},
    remote::{DirectoryTransport, ObjectStoreRemote, RemoteDataStore},
    store::{FileMedium, LocalDataStore, StoreError},
    transparency::{create_shared_log_with_persistence, TransparencyLog},
    PRIVACY_DECLARATION, VERSION,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Where the simulated location source starts.
const SIMULATED_ORIGIN: (f64, f64) = (47.6062, -122.3321);

#[derive(Parser)]
#[command(name = "sensor-relay")]
#[command(version = VERSION)]
#[command(about = "Privacy-first sensor collection with durable buffering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RemoteArgs {
    /// Commit to a directory-backed object store at this path
    #[arg(long, conflicts_with = "endpoint")]
    remote_dir: Option<PathBuf>,

    /// Commit to an HTTP object store (requires the http feature)
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token for the HTTP object store
    #[arg(long, requires = "endpoint")]
    token: Option<String>,

    /// Top-level bucket for committed objects
    #[arg(long)]
    bucket: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start collecting and committing data
    Start {
        /// Probes to run (accelerometer, location, compass, or all)
        #[arg(long)]
        probes: Option<String>,

        /// Commit interval in milliseconds
        #[arg(long)]
        commit_interval_ms: Option<u64>,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Show pending data and cumulative statistics
    Status,

    /// Commit all pending data now
    Flush {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Discard all pending data
    Clear {
        /// Confirm discarding data that has not been committed
        #[arg(long)]
        yes: bool,
    },

    /// Show anonymization rules and what each field permits
    Rules,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            probes,
            commit_interval_ms,
            remote,
        } => cmd_start(probes.as_deref(), commit_interval_ms, remote),
        Commands::Status => cmd_status(),
        Commands::Flush { remote } => cmd_flush(remote),
        Commands::Clear { yes } => cmd_clear(yes),
        Commands::Rules => cmd_rules(),
        Commands::Config => cmd_config(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config, persisting defaults on first run so the protocol id is stable.
fn load_config() -> Result<Config> {
    let config = Config::load().context("Could not load configuration")?;
    if !Config::config_path().exists() {
        config.save().context("Could not save initial configuration")?;
    }
    Ok(config)
}

fn apply_remote_args(config: &mut Config, args: RemoteArgs) {
    let bucket = args
        .bucket
        .clone()
        .or_else(|| config.remote.as_ref().map(|r| r.bucket.clone()))
        .unwrap_or_else(|| "sensor-relay".to_string());

    let target = if let Some(path) = args.remote_dir {
        Some(RemoteTarget::Directory { path })
    } else {
        args.endpoint.map(|endpoint| RemoteTarget::Http {
            endpoint,
            token: args.token.unwrap_or_default(),
        })
    };

    if let Some(target) = target {
        config.remote = Some(RemoteConfig { bucket, target });
    } else if let Some(remote) = config.remote.as_mut() {
        remote.bucket = bucket;
    }
}

fn open_store(config: &Config) -> Result<Arc<LocalDataStore>> {
    let medium = match FileMedium::open(config.pending_log_path(), config.fsync) {
        Err(StoreError::Locked(path)) => {
            bail!("Pending data log {path} is owned by a running session; stop it first")
        }
        opened => opened.context("Could not open pending data log")?,
    };
    let store = LocalDataStore::open(medium).context("Could not recover pending data")?;
    Ok(Arc::new(store))
}

fn build_remote(config: &Config) -> Result<Option<Arc<dyn RemoteDataStore>>> {
    let Some(remote) = config.remote.as_ref() else {
        return Ok(None);
    };
    let protocol_id = config.protocol_id.to_string();

    let store: Arc<dyn RemoteDataStore> = match &remote.target {
        RemoteTarget::Directory { path } => Arc::new(ObjectStoreRemote::new(
            DirectoryTransport::new(path),
            remote.bucket.clone(),
            protocol_id,
        )),
        RemoteTarget::Http { endpoint, token } => {
            http_remote(endpoint, token, &remote.bucket, protocol_id)?
        }
    };
    Ok(Some(store))
}

#[cfg(feature = "http")]
fn http_remote(
    endpoint: &str,
    token: &str,
    bucket: &str,
    protocol_id: String,
) -> Result<Arc<dyn RemoteDataStore>> {
    use sensor_relay::remote::{HttpConfig, HttpTransport};

    let transport = HttpTransport::new(HttpConfig::new(endpoint, token))
        .context("Could not create HTTP transport")?;
    Ok(Arc::new(ObjectStoreRemote::new(transport, bucket, protocol_id)))
}

#[cfg(not(feature = "http"))]
fn http_remote(
    _endpoint: &str,
    _token: &str,
    _bucket: &str,
    _protocol_id: String,
) -> Result<Arc<dyn RemoteDataStore>> {
    bail!("HTTP remote requires building with the `http` feature")
}

fn build_protocol(config: &Config, probes: &ProbeSelection) -> Result<Protocol> {
    let store = open_store(config)?;
    let rules = config.rule_set()?;
    let transparency = create_shared_log_with_persistence(config.transparency_path());

    let mut builder = Protocol::builder(ProtocolSettings::from_config(config), store)
        .rules(rules)
        .transparency(transparency);

    if probes.accelerometer {
        builder = builder.probe(PollingProbe::new(
            SimulatedAccelerometer::new(),
            probes.accelerometer_interval,
        ));
    }
    if probes.location {
        let (lat, lon) = SIMULATED_ORIGIN;
        builder = builder.probe(
            PollingProbe::new(SimulatedLocation::new(lat, lon), probes.location_interval)
                .drop_unchanged(true),
        );
    }
    if probes.compass {
        builder = builder.probe(ListeningProbe::new(SimulatedCompass::new(
            probes.compass_interval,
        )));
    }
    if let Some(remote) = build_remote(config)? {
        builder = builder.shared_remote(remote);
    }

    Ok(builder.build()?)
}

fn cmd_start(probes: Option<&str>, commit_interval_ms: Option<u64>, remote: RemoteArgs) -> Result<()> {
    println!("Sensor Relay v{VERSION}");
    println!();

    let mut config = load_config()?;
    if let Some(csv) = probes {
        let selected = ProbeSelection::from_csv(csv);
        config.probes.accelerometer = selected.accelerometer;
        config.probes.location = selected.location;
        config.probes.compass = selected.compass;
    }
    if let Some(ms) = commit_interval_ms {
        config.commit_interval = Duration::from_millis(ms);
    }
    apply_remote_args(&mut config, remote);

    if !config.probes.any_enabled() {
        bail!("At least one probe must be enabled (accelerometer, location, or compass)");
    }
    config.validate()?;
    config.ensure_directories()?;

    println!("Starting protocol {} ({})", config.protocol_name, config.protocol_id);
    println!("  Probes: {}", config.probes.enabled_names().join(", "));
    println!("  Commit interval: {}ms", config.commit_interval.as_millis());
    match &config.remote {
        Some(RemoteConfig { bucket, target }) => match target {
            RemoteTarget::Directory { path } => {
                println!("  Remote: directory {path:?} (bucket {bucket})")
            }
            RemoteTarget::Http { endpoint, .. } => {
                println!("  Remote: {endpoint} (bucket {bucket})")
            }
        },
        None => println!("  Remote: none (buffering locally)"),
    }
    println!("  Pending log: {:?}", config.pending_log_path());

    let protocol = build_protocol(&config, &config.probes)?;
    let pending = protocol.store().pending_len();
    if pending > 0 {
        println!("  Recovered {pending} pending records from the last session");
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    let events = protocol.subscribe();
    protocol.start()?;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ProtocolEvent::Fatal(failure)) => {
                eprintln!("Fatal: {failure}");
                break;
            }
            Ok(event) => print_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!("Stopping...");
    protocol.stop();

    println!();
    println!("Pending records: {}", protocol.store().pending_len());
    println!("{}", protocol.transparency().summary());
    Ok(())
}

fn print_event(event: &ProtocolEvent) {
    match event {
        ProtocolEvent::ProbeStateChanged {
            failure: Some(failure),
            ..
        } => println!("  ! {failure}"),
        ProtocolEvent::ProbeStateChanged {
            probe_type, state, ..
        } => println!("  {probe_type} probe {state}"),
        ProtocolEvent::RemoteStateChanged {
            failure: Some(failure),
            ..
        } => println!("  ! {failure} (buffering locally)"),
        ProtocolEvent::RemoteStateChanged { running, .. } => {
            println!("  remote {}", if *running { "ready" } else { "stopped" })
        }
        ProtocolEvent::CommitSucceeded { committed } if *committed > 0 => {
            println!("  committed {committed} records")
        }
        ProtocolEvent::CommitFailed {
            committed,
            requeued,
            failure,
        } => println!("  committed {committed}, requeued {requeued}: {failure}"),
        ProtocolEvent::SuspectRecord { id, attempts } => {
            println!("  ! record {id} failed {attempts} times; kept pending")
        }
        ProtocolEvent::ReportGenerated(report) => println!("{}", report.render()),
        _ => {}
    }
}

fn cmd_status() -> Result<()> {
    let config = load_config()?;

    println!("Sensor Relay Status");
    println!("===================");
    println!();

    let recovered = FileMedium::inspect(config.pending_log_path())
        .context("Could not read pending data log")?;
    let mut by_probe: BTreeMap<&str, usize> = BTreeMap::new();
    for datum in &recovered.records {
        *by_probe.entry(datum.probe_type()).or_insert(0) += 1;
    }

    println!("Pending records: {}", recovered.records.len());
    for (probe, count) in &by_probe {
        println!("  {probe}: {count}");
    }
    if !recovered.corrupt.is_empty() {
        println!("Corrupt entries (skipped): {}", recovered.corrupt.len());
    }
    if let Some(oldest) = recovered.records.first() {
        println!("Oldest pending: {}", oldest.timestamp().to_rfc3339());
    }
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let stats = TransparencyLog::with_persistence(stats_path).stats();
        println!("Cumulative Statistics:");
        println!("  Data stored: {}", stats.stored);
        println!("  Data committed: {}", stats.committed);
        println!("  Data requeued: {}", stats.requeued);
        println!("  Field values anonymized: {}", stats.fields_anonymized);
        println!("  Commit cycles: {}", stats.commit_cycles);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_flush(remote: RemoteArgs) -> Result<()> {
    let mut config = load_config()?;
    apply_remote_args(&mut config, remote);
    config.validate()?;

    if config.remote.is_none() {
        bail!("No remote configured; pass --remote-dir or --endpoint");
    }

    let protocol = build_protocol(&config, &ProbeSelection::from_csv(""))?;
    let before = protocol.store().pending_len();
    let summary = protocol.flush()?;
    if let Err(e) = protocol.transparency().save() {
        eprintln!("Warning: Could not save transparency stats: {e}");
    }

    println!(
        "Committed {} of {} pending records ({} remaining)",
        summary.committed, before, summary.remaining
    );
    Ok(())
}

fn cmd_clear(yes: bool) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config)?;
    let pending = store.pending_len();

    if !yes {
        println!("{pending} pending records have not been committed.");
        println!("Run 'sensor-relay clear --yes' to discard them.");
        return Ok(());
    }

    let cleared = store.clear()?;
    println!("Discarded {cleared} pending records.");
    Ok(())
}

fn cmd_rules() -> Result<()> {
    let config = load_config()?;
    let rules = config.rule_set()?;

    println!("Anonymization Rules");
    println!("===================");
    println!();
    for kind in catalog() {
        println!("{}:", kind.probe_type);
        for field in kind.anonymizable {
            let active = rules
                .rule(kind.probe_type, field.field)
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unchanged".to_string());
            let allowed: Vec<String> = field.allowed.iter().map(|a| a.to_string()).collect();
            println!(
                "  {:<12} {:<22} permits: {}",
                field.field,
                active,
                allowed.join(", ")
            );
        }
    }

    let catalogued: Vec<&str> = catalog().iter().map(|k| k.probe_type).collect();
    let extra: Vec<_> = rules
        .rules()
        .into_iter()
        .filter(|r| !catalogued.contains(&r.probe_type.as_str()))
        .collect();
    if !extra.is_empty() {
        println!("other:");
        for rule in extra {
            println!("  {}.{} {}", rule.probe_type, rule.field, rule.anonymizer);
        }
    }

    println!("{PRIVACY_DECLARATION}");
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = load_config()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
