//! Heart Link CLI
//!
//! Heart rate sensor monitor with live HRV.

use chrono::Utc;
use clap::{Parser, Subcommand};
use heartlink::{
    config::Config,
    core::{max_heart_rate_for_age, HrvMetrics, SessionAggregator, ZoneConfig, ZONE_COUNT},
    link::{check_permission, PlatformTransport},
    sink::{JsonDirSink, SessionSink},
    stats::create_shared_stats_with_persistence,
    AllowAll, ConnectionState, ConnectionStateMachine, LinkError, LinkEvent, SessionAggregate,
    VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "heartlink")]
#[command(version = VERSION)]
#[command(about = "Heart rate sensor monitor with live HRV", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby heart rate sensors
    Scan {
        /// Scan window in milliseconds (defaults to the configured timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Connect to a sensor and stream heart rate and HRV
    Monitor {
        /// Connect to this address instead of scanning
        #[arg(long)]
        address: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// List devices instead of connecting to the first heart rate sensor
        #[arg(long)]
        no_auto_connect: bool,
    },

    /// Compute HRV metrics for RR intervals (milliseconds)
    Analyze {
        /// RR intervals in milliseconds
        rr: Vec<u16>,

        /// Read RR intervals from a file (whitespace or comma separated)
        #[arg(long, short)]
        file: Option<PathBuf>,
    },

    /// Show heart rate zones
    Zones {
        /// Derive zones from this maximum heart rate
        #[arg(long, conflicts_with = "age")]
        max_hr: Option<u16>,

        /// Derive zones from the age-predicted maximum heart rate
        #[arg(long)]
        age: Option<u8>,
    },

    /// Show link statistics and recent sessions
    Status,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("heartlink=info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { timeout_ms } => {
            cmd_scan(timeout_ms);
        }
        Commands::Monitor {
            address,
            duration_secs,
            no_auto_connect,
        } => {
            cmd_monitor(address, duration_secs, no_auto_connect);
        }
        Commands::Analyze { rr, file } => {
            cmd_analyze(rr, file);
        }
        Commands::Zones { max_hr, age } => {
            cmd_zones(max_hr, age);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting async runtime: {e}");
            std::process::exit(1);
        }
    }
}

fn ensure_permission() {
    if !check_permission() {
        eprintln!("Error: Bluetooth permission not granted.");
        eprintln!();
        eprintln!("Allow this application to use Bluetooth in the system settings");
        eprintln!("and run the command again.");
        std::process::exit(1);
    }
}

fn cmd_scan(timeout_ms: Option<u64>) {
    ensure_permission();
    let config = Config::load().unwrap_or_default();
    let stats = create_shared_stats_with_persistence(config.stats_path());

    let mut settings = config.link_settings();
    settings.auto_connect = false;
    let window = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(settings.scan_timeout);

    let runtime = runtime();
    let _guard = runtime.enter();
    let (handle, events) =
        ConnectionStateMachine::spawn(PlatformTransport::new(), AllowAll, settings, stats);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    println!("Scanning for {} ms (Ctrl+C to stop early)...", window.as_millis());
    println!();
    handle.start_scan(Some(window));

    let mut stop_sent = false;
    loop {
        if !running.load(Ordering::SeqCst) && !stop_sent {
            handle.stop_scan();
            stop_sent = true;
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkEvent::DeviceFound(device)) => {
                let marker = if device.is_priority() {
                    " [heart rate]"
                } else {
                    ""
                };
                println!("  {}  {}{}", device.address, device.display_name, marker);
            }
            Ok(LinkEvent::ScanComplete(devices)) => {
                println!();
                println!("Scan complete: {} device(s) found", devices.len());
                break;
            }
            Ok(LinkEvent::Error(e)) => {
                eprintln!("Error: {e}");
                break;
            }
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    runtime.block_on(handle.dispose());
}

fn cmd_monitor(address: Option<String>, duration_secs: Option<u64>, no_auto_connect: bool) {
    ensure_permission();
    let mut config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let sink = JsonDirSink::new(config.sessions_path());
    let aggregator = SessionAggregator::new(config.zones, config.profile);

    let mut settings = config.link_settings();
    if no_auto_connect {
        settings.auto_connect = false;
    }

    println!("Heart Link v{VERSION}");
    println!();

    let runtime = runtime();
    let _guard = runtime.enter();
    let (handle, events) = ConnectionStateMachine::spawn(
        PlatformTransport::new(),
        AllowAll,
        settings,
        stats.clone(),
    );

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let mut candidate = address.clone();
    match address {
        Some(address) => {
            println!("Connecting to {address}...");
            handle.connect(address);
        }
        None => {
            println!("Scanning for heart rate sensors...");
            handle.start_scan(None);
        }
    }
    println!("Press Ctrl+C to stop");
    println!();

    let deadline = duration_secs.map(|secs| Instant::now() + Duration::from_secs(secs));

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let event = match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Link stopped unexpectedly");
                break;
            }
        };

        match event {
            LinkEvent::DeviceFound(device) => {
                println!("Found {} ({})", device.display_name, device.address);
                if candidate.is_none() && device.is_priority() {
                    candidate = Some(device.address);
                }
            }
            LinkEvent::ScanComplete(devices) => {
                println!();
                println!("Devices found:");
                for device in &devices {
                    println!("  {}  {}", device.address, device.display_name);
                }
                println!();
                println!("Run 'heartlink monitor --address <ADDRESS>' to connect.");
                break;
            }
            LinkEvent::StateChanged { to, .. } => {
                println!("[{}] {to}", Utc::now().format("%H:%M:%S"));
                match to {
                    ConnectionState::Streaming => {
                        if aggregator.is_paused() {
                            if aggregator.resume().is_ok() {
                                println!("Session resumed");
                            }
                        } else if !aggregator.is_active() {
                            let id = aggregator.start();
                            println!("Session {id} started");
                        }
                        if candidate.is_some() && config.last_device != candidate {
                            config.last_device = candidate.clone();
                            if let Err(e) = config.save() {
                                eprintln!("Warning: Could not save config: {e}");
                            }
                        }
                    }
                    // Reconnect gaps count toward no zone.
                    ConnectionState::Disconnected => {
                        if aggregator.pause().is_ok() {
                            println!("Session paused");
                        }
                    }
                    ConnectionState::Failed | ConnectionState::Closed => break,
                    _ => {}
                }
            }
            LinkEvent::Sample(sample) => match aggregator.on_sample(&sample) {
                Ok(record) => {
                    let rr = record
                        .rr_intervals_ms
                        .iter()
                        .map(|rr| rr.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "[{}] {:>3} bpm | zone {} | RR [{}] | RMSSD {:.1} ms",
                        record.timestamp.format("%H:%M:%S"),
                        record.heart_rate_bpm,
                        record.zone,
                        rr,
                        aggregator.current_metrics().rmssd_ms
                    );
                    if let Err(e) = sink.record_sample(&record) {
                        eprintln!("Warning: Could not record sample: {e}");
                    }
                }
                Err(e) => eprintln!("Warning: Sample dropped: {e}"),
            },
            LinkEvent::Error(LinkError::ScanFailed(e)) => {
                eprintln!("Scan failed: {e}");
                break;
            }
            LinkEvent::Error(e) => eprintln!("Error: {e}"),
            LinkEvent::Status(message) => println!("{message}"),
        }
    }

    println!();
    println!("Stopping...");
    runtime.block_on(handle.dispose());

    if aggregator.is_active() || aggregator.is_paused() {
        match aggregator.finalize(&sink) {
            Ok(session) => {
                stats.record_session_completed();
                print_session(&session);
                println!("Saved to {:?}", sink.session_path(&session));
            }
            Err(e) => eprintln!("Error saving session: {e}"),
        }
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save link stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

fn cmd_analyze(rr: Vec<u16>, file: Option<PathBuf>) {
    let mut intervals = rr;

    if let Some(path) = file {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error reading {path:?}: {e}");
                std::process::exit(1);
            }
        };
        for token in content
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            match token.parse::<u16>() {
                Ok(value) => intervals.push(value),
                Err(_) => {
                    eprintln!("Error: '{token}' is not an RR interval in milliseconds");
                    std::process::exit(1);
                }
            }
        }
    }

    if intervals.is_empty() {
        eprintln!("Error: No RR intervals given");
        std::process::exit(1);
    }

    let metrics = HrvMetrics::compute(&intervals);
    println!("HRV Analysis");
    println!("============");
    println!();
    print_metrics(&metrics);
}

fn cmd_zones(max_hr: Option<u16>, age: Option<u8>) {
    let config = Config::load().unwrap_or_default();

    let (zones, source) = match (max_hr, age) {
        (Some(max), _) => (
            ZoneConfig::from_max_heart_rate(max),
            format!("maximum heart rate {max} bpm"),
        ),
        (None, Some(age)) => {
            let max = max_heart_rate_for_age(age);
            (
                ZoneConfig::from_max_heart_rate(max),
                format!("age {age} (maximum {max} bpm)"),
            )
        }
        (None, None) => (config.zones, "configuration".to_string()),
    };

    println!("Heart Rate Zones ({source})");
    println!();
    for zone in 1..=ZONE_COUNT as u8 {
        if let Some((low, high)) = zones.range_of(zone) {
            if high == u16::MAX {
                println!("  Zone {zone}: {low}+ bpm");
            } else {
                println!("  Zone {zone}: {low}-{high} bpm");
            }
        }
    }
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Heart Link Status");
    println!("=================");
    println!();

    println!(
        "Bluetooth Permission: {}",
        if check_permission() {
            "Granted ✓"
        } else {
            "Not Granted ✗"
        }
    );
    println!(
        "Bluetooth Backend: {}",
        if cfg!(feature = "ble") {
            "btleplug"
        } else {
            "none (built without the 'ble' feature)"
        }
    );
    println!(
        "Last device: {}",
        config.last_device.as_deref().unwrap_or("none")
    );
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                for key in [
                    "frames_received",
                    "frames_decoded",
                    "frames_dropped",
                    "rr_intervals",
                    "reconnect_attempts",
                    "sessions_completed",
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {}: {value}", key.replace('_', " "));
                    }
                }
                println!();
            }
        }
    } else {
        println!("No previous link statistics found.");
        println!();
    }

    match JsonDirSink::new(config.sessions_path()).load_sessions() {
        Ok(sessions) if !sessions.is_empty() => {
            println!("Sessions recorded: {}", sessions.len());
            if let Some(last) = sessions.last() {
                println!();
                println!("Most recent session:");
                print_session(last);
            }
        }
        Ok(_) => println!("No sessions recorded yet."),
        Err(e) => eprintln!("Warning: Could not read sessions: {e}"),
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn print_session(session: &SessionAggregate) {
    println!("  Session: {}", session.session_id);
    println!(
        "  Started: {}",
        session.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Duration: {} seconds", session.duration_secs());
    if session.paused_ms > 0 {
        println!("  Paused: {} seconds", session.paused_ms / 1000);
    }
    println!("  Samples: {}", session.sample_count);
    println!("  Average HR: {:.1} bpm", session.average_hr);
    println!("  Max HR: {} bpm", session.max_hr);
    println!("  Calories: {} kcal", session.calories_estimate);
    for (i, ms) in session.zone_times_ms.iter().enumerate() {
        println!("  Zone {}: {} s", i + 1, ms / 1000);
    }
    print_metrics(&session.hrv);
}

fn print_metrics(metrics: &HrvMetrics) {
    println!("  RR intervals: {}", metrics.sample_count);
    println!("  Mean RR: {:.1} ms", metrics.mean_rr_ms);
    println!("  SDNN: {:.2} ms", metrics.sdnn_ms);
    println!("  RMSSD: {:.2} ms", metrics.rmssd_ms);
    println!("  pNN50: {:.1} %", metrics.pnn50_pct);
    println!("  LF/HF: {:.2}", metrics.lf_hf_ratio);
    println!("  HRV score: {}/100", metrics.score);

    let assessment = metrics.assess();
    println!("  Assessment: {}", assessment.overall);
    println!("    RMSSD: {}", assessment.rmssd);
    println!("    LF/HF: {}", assessment.balance);
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
