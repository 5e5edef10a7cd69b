//! Demonstration of the sensor relay pipeline.
//!
//! This example shows how to:
//! 1. Build a protocol from simulated probes
//! 2. Buffer anonymized data while a capability is disabled and recover it
//! 3. Commit batches to a directory-backed remote store
//! 4. Watch protocol events and print the final report
//!
//! Run with: cargo run --example relay_demo

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sensor_relay::{
    probe::{ListeningProbe, PollingProbe, SimulatedAccelerometer, SimulatedCompass, SimulatedLocation},
    protocol::{Protocol, ProtocolEvent, ProtocolSettings},
    remote::{DirectoryTransport, ObjectStoreRemote},
    store::{FileMedium, LocalDataStore},
    RuleSet, PRIVACY_DECLARATION,
};

const RUN_FOR: Duration = Duration::from_secs(15);
const ENABLE_LOCATION_AFTER: Duration = Duration::from_secs(5);

fn main() {
    println!("Sensor Relay - Pipeline Demo");
    println!("============================");
    println!();
    println!("{PRIVACY_DECLARATION}");

    let workdir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error creating working directory: {e}");
            return;
        }
    };
    let uploads = workdir.path().join("uploads");

    let store = match FileMedium::open(workdir.path().join("pending.log"), false)
        .and_then(LocalDataStore::open)
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error opening local store: {e}");
            return;
        }
    };

    let settings = ProtocolSettings {
        name: "demo".to_string(),
        commit_interval: Duration::from_secs(2),
        health_check_interval: Duration::from_secs(3),
        max_batch_size: 25,
        ..ProtocolSettings::default()
    };

    // Location starts disabled, so its probe fails until the health cycle retries it.
    let location = SimulatedLocation::new(47.6062, -122.3321);
    let location_services = location.capability();
    location_services.set_enabled(false);

    let protocol = Protocol::builder(settings.clone(), store)
        .rules(RuleSet::for_catalog(&settings.id))
        .probe(PollingProbe::new(SimulatedAccelerometer::new(), Duration::from_millis(500)))
        .probe(PollingProbe::new(location, Duration::from_secs(1)).drop_unchanged(true))
        .probe(ListeningProbe::new(SimulatedCompass::new(Duration::from_millis(750))))
        .remote(ObjectStoreRemote::new(
            DirectoryTransport::new(&uploads),
            "demo-bucket",
            &settings.id,
        ))
        .build();
    let protocol = match protocol {
        Ok(protocol) => protocol,
        Err(e) => {
            eprintln!("Error building protocol: {e}");
            return;
        }
    };

    println!("Protocol ID: {}", protocol.id());
    println!("Uploads:     {}", uploads.display());
    println!();
    println!("Running for {} seconds...", RUN_FOR.as_secs());
    println!();

    let events = protocol.subscribe();
    if let Err(e) = protocol.start() {
        eprintln!("Error starting protocol: {e}");
        return;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let started = Instant::now();
    let mut location_enabled = false;
    while running.load(Ordering::SeqCst) && started.elapsed() < RUN_FOR {
        if !location_enabled && started.elapsed() >= ENABLE_LOCATION_AFTER {
            println!("-- enabling location services");
            location_services.set_enabled(true);
            location_enabled = true;
        }

        if let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
            match event {
                ProtocolEvent::ProbeStateChanged {
                    probe_type,
                    state,
                    failure,
                } => match failure {
                    Some(f) => println!("probe {probe_type:<14} {state} ({})", f.message),
                    None => println!("probe {probe_type:<14} {state}"),
                },
                ProtocolEvent::CommitSucceeded { committed } => {
                    println!("commit  {committed} records")
                }
                ProtocolEvent::ReportGenerated(report) => {
                    println!("health  {} pending", report.pending)
                }
                ProtocolEvent::Fatal(failure) => {
                    eprintln!("fatal   {failure}");
                    break;
                }
                other => println!("event   {other:?}"),
            }
        }
    }

    println!();
    println!("Stopping...");
    protocol.stop();

    println!();
    println!("{}", protocol.report().render());
    println!("{}", protocol.transparency().summary());

    let uploaded = std::fs::read_dir(uploads.join("demo-bucket").join(&settings.id))
        .ok()
        .and_then(|mut devices| devices.next())
        .and_then(|device| device.ok())
        .and_then(|device| std::fs::read_dir(device.path()).ok())
        .map(|objects| objects.count())
        .unwrap_or(0);
    println!("Objects written to the remote store: {uploaded}");
}
