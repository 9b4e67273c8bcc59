//! # nrf24mqtt - NRF24 serial gateway to MQTT bridge
//!
//! An Arduino with an NRF24 radio prints every received sensor packet as a
//! line of text on its USB serial port. This crate reads those lines, checks
//! their shape, and republishes them to an MQTT broker, both unchanged and
//! decoded into physical units.
//!
//! ## Features
//!
//! - **Frame Parsing**: Typed decoding of `R <len> <net>,<chan>,<node>:<k>=<v>,...` frames with explicit rejection reasons.
//! - **Sensor Decoding**: Temperature, humidity, pressure and supply voltage for weather nodes.
//! - **Timing**: Per-address time since the previous frame, published next to the readings.
//! - **Resilience**: Bad lines, missing fields and publish failures are logged and skipped; the loop keeps running.
//! - **Async Design**: Built with Tokio; the MQTT event loop runs in its own task.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nrf24mqtt::bridge::{Bridge, RunOptions};
//! use nrf24mqtt::config::Config;
//! use nrf24mqtt::mqtt::MqttLink;
//! use nrf24mqtt::serial::SerialLineSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.mqtt.host = "localhost".into();
//!
//!     let mut source = SerialLineSource::open(&config.serial.port, config.serial.baud_rate)?;
//!     let (link, _events) = MqttLink::connect(&config.mqtt).await?;
//!
//!     let mut bridge = Bridge::new(link);
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     bridge.run(&mut source, &RunOptions::from(&config), shutdown).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`frame`] - Gateway frame parser and sensor decoding
//! - [`bridge`] - Read/parse/publish loop and topic layout
//! - [`serial`] - Serial port line source
//! - [`mqtt`] - Broker connection and publishing
//! - [`config`] - Configuration loading and validation
//! - [`metrics`] - Process-wide counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Serial Line    │ ← Gateway text stream
//! │  Source         │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Frame Parser   │ ← Typed readings
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Bridge Loop    │ ← Last-seen tracking
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  MQTT Link      │ ← Broker I/O task
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod frame;
pub mod logutil;
pub mod metrics;
pub mod mqtt;
pub mod serial;
