//! # Bridge Loop
//!
//! Reads gateway lines, parses them, and republishes readings over MQTT.
//!
//! The [`Bridge`] owns the last-seen map used to compute the time between two
//! frames from the same address. Every per-line failure is logged and
//! counted; only a serial port that keeps failing ends the loop.
//!
//! ```text
//! serial line ──► parse_line ──► Bridge::handle_line ──► raw topic
//!                                        │
//!                                        └─► SensorValues ──► derived topics
//! ```

pub mod topics;

use crate::config::Config;
use crate::frame::sensor::SensorValues;
use crate::frame::{parse_line, Address, FrameError, ParsedLine, Reading};
use crate::logutil::escape_log;
use crate::metrics;
use crate::mqtt::Publish;
use crate::serial::{decode_line, LineSource};
use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

/// Consecutive serial read failures tolerated before the loop gives up.
pub const MAX_SERIAL_ERRORS: u32 = 5;

/// Pause after a serial read failure.
const SERIAL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Time since the previous frame from the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timedelta {
    /// First frame from this address since startup; published as `-1`.
    FirstSighting,
    Elapsed(Duration),
}

impl Timedelta {
    pub fn as_secs_f64(&self) -> f64 {
        match self {
            Timedelta::FirstSighting => -1.0,
            Timedelta::Elapsed(d) => d.as_secs_f64(),
        }
    }
}

impl fmt::Display for Timedelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timedelta::FirstSighting => f.write_str("-1"),
            Timedelta::Elapsed(d) => write!(f, "{:.3}", d.as_secs_f64()),
        }
    }
}

/// What happened to one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Diagnostic,
    Rejected(FrameError),
    Published {
        address: Address,
        timedelta: Timedelta,
        /// Decoded values, or why only the raw topic went out.
        derived: Result<SensorValues, FrameError>,
    },
}

/// Loop timing, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub poll_interval: Duration,
    pub stats_interval: Option<Duration>,
}

impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.serial.poll_interval_ms),
            stats_interval: match config.stats.interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stats_interval: None,
        }
    }
}

pub struct Bridge<P> {
    publisher: P,
    last_seen: HashMap<Address, Instant>,
}

impl<P: Publish> Bridge<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            last_seen: HashMap::new(),
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Number of distinct addresses seen since startup.
    pub fn known_addresses(&self) -> usize {
        self.last_seen.len()
    }

    /// Record a frame from `address` at `now` and return the gap since the previous one.
    pub fn observe(&mut self, address: Address, now: Instant) -> Timedelta {
        match self.last_seen.insert(address, now) {
            Some(prev) => Timedelta::Elapsed(now.saturating_duration_since(prev)),
            None => Timedelta::FirstSighting,
        }
    }

    /// Handle raw bytes from the serial link.
    pub fn handle_raw(&mut self, raw: &[u8], now: Instant) -> Option<LineOutcome> {
        match decode_line(raw) {
            Ok(line) => Some(self.handle_line(&line, now)),
            Err(e) => {
                metrics::record_rejection("not_ascii");
                warn!("{}", e);
                None
            }
        }
    }

    /// Parse one line and publish it if it is a data frame.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> LineOutcome {
        metrics::inc_lines_read();
        match parse_line(line) {
            Ok(ParsedLine::Diagnostic(text)) => {
                metrics::inc_diagnostic_lines();
                if !text.is_empty() {
                    info!(target: "gateway", "{}", escape_log(&text));
                }
                LineOutcome::Diagnostic
            }
            Ok(ParsedLine::Reading(reading)) => self.publish_reading(line, &reading, now),
            Err(e) => {
                metrics::record_rejection(e.kind());
                warn!("{} | data was: {}", e, escape_log(line.trim()));
                LineOutcome::Rejected(e)
            }
        }
    }

    fn publish_reading(&mut self, line: &str, reading: &Reading, now: Instant) -> LineOutcome {
        let address = reading.address;
        let timedelta = self.observe(address, now);
        metrics::record_frame(address);
        info!(
            "{} | {:.2}",
            escape_log(line.trim()),
            timedelta.as_secs_f64()
        );

        self.send(topics::raw(&address), reading.raw.clone());

        let derived = SensorValues::decode(&reading.measurement);
        match &derived {
            Ok(values) => {
                for (field, payload) in values.payloads() {
                    self.send(topics::sensor(address.node, field), payload);
                }
                self.send(
                    topics::sensor(address.node, "timedelta"),
                    timedelta.to_string(),
                );
                metrics::inc_derived_published();
            }
            Err(e) => {
                metrics::record_rejection(e.kind());
                warn!(
                    "Failed to process message: {} | data line was: {}",
                    e,
                    escape_log(&reading.raw)
                );
            }
        }

        LineOutcome::Published {
            address,
            timedelta,
            derived,
        }
    }

    fn send(&self, topic: String, payload: String) {
        debug!("publish {} {}", topic, payload);
        if let Err(e) = self.publisher.publish(&topic, payload) {
            metrics::inc_publish_failures();
            warn!("{}", e);
        }
    }

    /// Run until `shutdown` resolves or the serial source keeps failing.
    ///
    /// Lines are drained back to back; the loop only sleeps for
    /// `poll_interval` when nothing is waiting.
    pub async fn run<S, F>(&mut self, source: &mut S, options: &RunOptions, shutdown: F) -> Result<()>
    where
        S: LineSource,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut serial_errors = 0u32;
        let mut last_stats = Instant::now();

        loop {
            let pause = match source.poll_line() {
                Ok(Some(raw)) => {
                    serial_errors = 0;
                    self.handle_raw(&raw, Instant::now());
                    Duration::ZERO
                }
                Ok(None) => {
                    serial_errors = 0;
                    options.poll_interval
                }
                Err(e) => {
                    serial_errors += 1;
                    metrics::inc_serial_errors();
                    if serial_errors >= MAX_SERIAL_ERRORS {
                        bail!(
                            "Giving up after {} consecutive serial errors: {}",
                            serial_errors,
                            e
                        );
                    }
                    warn!(
                        "{} (continuing, {}/{})",
                        e, serial_errors, MAX_SERIAL_ERRORS
                    );
                    SERIAL_ERROR_BACKOFF
                }
            };

            if let Some(every) = options.stats_interval {
                if last_stats.elapsed() >= every {
                    info!("Stats: {}", metrics::snapshot());
                    last_stats = Instant::now();
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping bridge loop");
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
