//! Binary entrypoint for the meshwx CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml`
//! - `status` - print persisted per-peer signal statistics
//! - `sample` - render the configured message template with example values
//! - `simulate` - drive sensing ticks against the built-in loopback link
//!
//! The real deployment wires a serial-backed [`meshwx::transport::RadioLink`]
//! implementation in place of the loopback; see the library crate docs.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use rand::Rng;

use meshwx::config::Config;
use meshwx::peers::parse_node_address;
use meshwx::signal::SignalTracker;
use meshwx::station::{PeerContext, SignalObservation, Station};
use meshwx::template::{Reading, RenderContext, Templates};
use meshwx::transport::loopback::{AckBehavior, LoopbackLink};

#[derive(Parser)]
#[command(name = "meshwx")]
#[command(about = "A weather-station relay with delivery confirmation for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new station configuration
    Init,
    /// Show per-peer signal statistics from the stats file
    Status,
    /// Render a sample reading message using the configured template
    Sample,
    /// Run sensing ticks against the in-process loopback link
    Simulate {
        /// Number of sensing ticks to run
        #[arg(short, long, default_value_t = 3)]
        ticks: u32,
        /// Seconds between ticks
        #[arg(short, long, default_value_t = 6)]
        interval: u64,
        /// Probability a packet is acked by its destination
        #[arg(long, default_value_t = 0.7)]
        ack_rate: f64,
        /// Probability a packet draws a routing error
        #[arg(long, default_value_t = 0.1)]
        nak_rate: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new station configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!("Wrote starter configuration to {}", cli.config);
            println!("Edit the [[peers]] entries to match your mesh, then run `meshwx simulate`.");
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            show_status(&config);
        }
        Commands::Sample => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            show_sample(&config);
        }
        Commands::Simulate {
            ticks,
            interval,
            ack_rate,
            nak_rate,
        } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            run_simulation(config, ticks, interval, ack_rate, nak_rate).await?;
        }
    }

    Ok(())
}

fn show_status(config: &Config) {
    let tracker = SignalTracker::load(&config.storage.stats_file);
    let stats = tracker.all();
    if stats.is_empty() {
        println!(
            "No signal statistics recorded yet ({}).",
            config.storage.stats_file
        );
        return;
    }
    println!("Signal statistics from {}:", config.storage.stats_file);
    println!(
        "{:<14} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Peer", "Samples", "Min", "Mean", "Max", "Last"
    );
    for (peer, s) in stats {
        let last = s
            .recent
            .back()
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "--".to_string());
        println!(
            "{:<14} {:>8} {:>8.1} {:>8.1} {:>8.1} {:>8}",
            peer, s.sample_count, s.min, s.mean, s.max, last
        );
    }
}

fn show_sample(config: &Config) {
    let templates = Templates::new(
        config.message_templates.clone(),
        &config.station.message_template,
    );
    let message = templates.render(
        &Reading {
            temperature_f: 81.0,
            humidity: 29.0,
        },
        &RenderContext {
            online_nodes: Some(5),
            total_nodes: Some(114),
            snr: Some(-8.0),
            hops: Some(2),
        },
        chrono::Local::now(),
    );
    println!("Sample message ({}):", templates.selected_name());
    println!("{}", "-".repeat(40));
    println!("{}", message);
    println!("{}", "-".repeat(40));
    let mut names: Vec<&str> = templates.names().collect();
    names.sort_unstable();
    println!("Available templates: {}", names.join(", "));
}

async fn run_simulation(
    config: Config,
    ticks: u32,
    interval: u64,
    ack_rate: f64,
    nak_rate: f64,
) -> Result<()> {
    // Connect the loopback as the first configured peer so the station runs
    // in fan-out mode, the interesting path.
    let local_addr = config
        .peers
        .first()
        .map(|p| parse_node_address(&p.address))
        .transpose()?
        .unwrap_or(0x0a0b0c0d);
    let peer_names: Vec<String> = config.peers.iter().map(|p| p.name.clone()).collect();

    let (link, events) = LoopbackLink::new(
        local_addr,
        AckBehavior::Lossy {
            ack: ack_rate,
            nak: nak_rate,
        },
    );
    let mut station = Station::new(config, Box::new(link), events)?;

    info!(
        "simulation: {} tick(s), {}s apart, ack_rate={} nak_rate={}",
        ticks, interval, ack_rate, nak_rate
    );
    let mut rng = rand::thread_rng();
    for tick in 1..=ticks {
        station.on_tick().await;
        if !station.is_connected() {
            warn!("loopback link down on tick {}; skipping", tick);
            continue;
        }

        let reading = Reading {
            temperature_f: 68.0 + rng.gen::<f64>() * 18.0,
            humidity: 30.0 + rng.gen::<f64>() * 40.0,
        };
        let observations: Vec<SignalObservation> = peer_names
            .iter()
            .filter(|name| Some(name.as_str()) != station.self_peer())
            .map(|name| SignalObservation {
                peer: name.clone(),
                snr: -12.0 + rng.gen::<f32>() * 15.0,
                hops: Some(rng.gen_range(1..=3)),
            })
            .collect();
        let ctx = PeerContext {
            online_nodes: Some(observations.len() as u32 + 1),
            total_nodes: Some(peer_names.len() as u32),
            observations,
        };

        let outcome = station.submit_reading(&reading, &ctx).await?;
        println!(
            "tick {}/{}: sent={} acked={:?} pending={:?} naked={:?}",
            tick, ticks, outcome.sent, outcome.acked, outcome.pending, outcome.naked
        );

        if tick < ticks {
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    }

    // Give deferred confirmations from the final tick a moment to fire.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    station.shutdown().await;

    let snap = meshwx::metrics::snapshot();
    let payload = serde_json::json!({
        "readings_sent": snap.readings_sent,
        "acked": snap.acked,
        "implicit_acked": snap.implicit_acked,
        "naked": snap.naked,
        "expired": snap.expired,
        "retried": snap.retried,
        "confirmations_sent": snap.confirmations_sent,
        "reconnect_attempts": snap.reconnect_attempts,
        "ack_latency_avg_ms": snap.ack_latency_avg_ms,
    });
    println!("{}", payload);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from config; CLI verbosity bumps it
    let base_level = match (verbosity, config.as_ref().map(|c| c.logging.level.as_str())) {
        (0, Some("trace")) => log::LevelFilter::Trace,
        (0, Some("debug")) => log::LevelFilter::Debug,
        (0, Some("warn")) => log::LevelFilter::Warn,
        (0, Some("error")) => log::LevelFilter::Error,
        (0, _) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        (_, _) => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Foreground runs echo to the console too; redirected runs only
            // write the file to avoid duplicate lines.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
