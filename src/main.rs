//! Binary entrypoint for the nrf24mqtt CLI.
//!
//! Commands:
//! - `start [--port <path>] [--baudrate <n>] [--mqtt <host>]` - run the bridge
//! - `init` - create a starter `config.toml`
//! - `parse <line>` - decode one gateway line and print what would be published
//! - `smoketest [--port <path>] [-b <baud>] [--timeout <s>]` - listen on the serial link without MQTT
//!
//! See the library crate docs for module-level details: `nrf24mqtt::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};
use std::time::{Duration, Instant};

use nrf24mqtt::bridge::{topics, Bridge, RunOptions};
use nrf24mqtt::config::{Config, Overrides};
use nrf24mqtt::frame::sensor::SensorValues;
use nrf24mqtt::frame::{parse_line, ParsedLine};
use nrf24mqtt::metrics;
use nrf24mqtt::mqtt::MqttLink;
use nrf24mqtt::serial::{decode_line, LineSource, SerialLineSource};

#[derive(Parser)]
#[command(name = "nrf24mqtt")]
#[command(about = "Serial monitor to capture NRF24 radio data via Arduino modem and publish to MQTT")]
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
    /// Start the bridge
    Start {
        /// Serial (USB) port to listen on
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate of the serial connection
        #[arg(short, long)]
        baudrate: Option<u32>,

        /// MQTT broker host to connect to
        #[arg(short, long)]
        mqtt: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Decode a single gateway line and print the result as JSON
    Parse {
        /// Line as printed by the gateway, e.g. "R 20 1,2,47:h=321,t=261,p=10044,v=3290"
        line: String,
    },
    /// Listen on the serial port and summarise what the gateway sends
    #[command(name = "smoketest")]
    SmokeTest {
        /// Serial port (defaults to the configured one)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (defaults to the configured one)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
        /// Seconds to listen
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            baudrate,
            mqtt,
        } => {
            let mut config = Config::load_or_default(&cli.config).await?;
            config.apply(Overrides {
                port,
                baud_rate: baudrate,
                mqtt_host: mqtt,
            });
            init_logging(&Some(config.clone()), cli.verbose);
            config.validate()?;
            info!("NRF24 serial monitor v{} starting", env!("CARGO_PKG_VERSION"));

            let mut source = SerialLineSource::open(&config.serial.port, config.serial.baud_rate)?;
            info!("Serial connected via {}", source.port_name());

            let (link, events) = MqttLink::connect(&config.mqtt).await?;
            let mut bridge = Bridge::new(link.clone());
            let result = bridge
                .run(&mut source, &RunOptions::from(&config), shutdown_signal())
                .await;

            info!("Stats: {}", metrics::snapshot());
            link.shutdown(events).await;
            result?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Parse { line } => {
            let payload = describe_line(&line);
            println!("{}", serde_json::to_string_pretty(&payload)?);
            if payload["status"] != "ok" && payload["status"] != "diagnostic" {
                std::process::exit(1);
            }
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => {
            let config = Config::load_or_default(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            let port = port.unwrap_or(config.serial.port);
            let baud = baud.unwrap_or(config.serial.baud_rate);
            let mut source = SerialLineSource::open(&port, baud)?;
            info!("Starting smoke test on {} @ {} baud for {}s", port, baud, timeout);

            let mut lines = 0u64;
            let mut diagnostics = 0u64;
            let mut frames = 0u64;
            let mut rejected = 0u64;
            let mut nodes = std::collections::BTreeSet::new();
            let deadline = Instant::now() + Duration::from_secs(timeout);
            while Instant::now() < deadline {
                match source.poll_line() {
                    Ok(Some(raw)) => {
                        lines += 1;
                        match decode_line(&raw).map_err(|e| e.to_string()).and_then(|l| {
                            parse_line(&l).map_err(|e| e.to_string())
                        }) {
                            Ok(ParsedLine::Reading(r)) => {
                                frames += 1;
                                nodes.insert(r.address.to_string());
                            }
                            Ok(ParsedLine::Diagnostic(_)) => diagnostics += 1,
                            Err(e) => {
                                rejected += 1;
                                info!("Rejected: {}", e);
                            }
                        }
                    }
                    Ok(None) => tokio::time::sleep(Duration::from_millis(100)).await,
                    Err(e) => {
                        error!("{}", e);
                        std::process::exit(2);
                    }
                }
            }
            let status_ok = frames > 0;
            let payload = serde_json::json!({
                "status": if status_ok { "ok" } else { "no_frames" },
                "port": port,
                "baud": baud,
                "lines": lines,
                "frames": frames,
                "diagnostic_lines": diagnostics,
                "rejected": rejected,
                "nodes": nodes,
                "timeout_seconds": timeout,
            });
            println!("{}", payload);
            std::process::exit(if status_ok { 0 } else { 1 });
        }
    }

    Ok(())
}

/// JSON summary of how a single line would be handled.
fn describe_line(line: &str) -> serde_json::Value {
    match parse_line(line) {
        Ok(ParsedLine::Diagnostic(text)) => serde_json::json!({
            "status": "diagnostic",
            "text": text,
        }),
        Err(e) => serde_json::json!({
            "status": "rejected",
            "kind": e.kind(),
            "error": e.to_string(),
        }),
        Ok(ParsedLine::Reading(reading)) => {
            let node = reading.address.node;
            // Later duplicates overwrite earlier ones, same as `Measurement::get`.
            let fields: serde_json::Map<String, serde_json::Value> = reading
                .measurement
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
                .collect();
            let mut publish = vec![serde_json::json!({
                "topic": topics::raw(&reading.address),
                "payload": reading.raw,
            })];
            let derived = SensorValues::decode(&reading.measurement);
            if let Ok(values) = &derived {
                for (field, payload) in values.payloads() {
                    publish.push(serde_json::json!({
                        "topic": topics::sensor(node, field),
                        "payload": payload,
                    }));
                }
                publish.push(serde_json::json!({
                    "topic": topics::sensor(node, "timedelta"),
                    "payload": "-1",
                }));
            }
            serde_json::json!({
                "status": "ok",
                "reading": reading,
                "fields": fields,
                "values": derived.as_ref().ok(),
                "derived_error": derived.as_ref().err().map(|e| e.to_string()),
                "publish": publish,
            })
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Ctrl-C pressed, exiting"),
                    _ = term.recv() => info!("SIGTERM received, exiting"),
                }
                return;
            }
            Err(e) => log::warn!("Cannot install SIGTERM handler: {}", e),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl-C pressed, exiting");
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // rumqttc is chatty at debug level
    builder.filter_module("rumqttc", log::LevelFilter::Info);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

        // When running under a service manager stdout is not a TTY; avoid duplicate lines then
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
    let _ = builder.try_init();
}
