//! Process-wide bridge counters.
//! Logged periodically and at shutdown; `Snapshot` is serialisable for the CLI.
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::frame::Address;

static LINES_READ: AtomicU64 = AtomicU64::new(0);
static DIAGNOSTIC_LINES: AtomicU64 = AtomicU64::new(0);
static FRAMES_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static DERIVED_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static PUBLISH_FAILURES: AtomicU64 = AtomicU64::new(0);
static SERIAL_ERRORS: AtomicU64 = AtomicU64::new(0);

static REJECTIONS: OnceLock<Mutex<BTreeMap<&'static str, u64>>> = OnceLock::new();
static NODES_SEEN: OnceLock<Mutex<BTreeSet<Address>>> = OnceLock::new();

pub fn inc_lines_read() {
    LINES_READ.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_diagnostic_lines() {
    DIAGNOSTIC_LINES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_derived_published() {
    DERIVED_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_publish_failures() {
    PUBLISH_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_serial_errors() {
    SERIAL_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_frame(address: Address) {
    FRAMES_ACCEPTED.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut nodes) = nodes_lock().lock() {
        nodes.insert(address);
    }
}

/// Count a rejected line under its error kind (see `FrameError::kind`).
pub fn record_rejection(kind: &'static str) {
    if let Ok(mut guard) = rejections_lock().lock() {
        *guard.entry(kind).or_default() += 1;
    }
}

fn rejections_lock() -> &'static Mutex<BTreeMap<&'static str, u64>> {
    REJECTIONS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

fn nodes_lock() -> &'static Mutex<BTreeSet<Address>> {
    NODES_SEEN.get_or_init(|| Mutex::new(BTreeSet::new()))
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub lines_read: u64,
    pub diagnostic_lines: u64,
    pub frames_accepted: u64,
    pub derived_published: u64,
    pub publish_failures: u64,
    pub serial_errors: u64,
    pub rejected: BTreeMap<&'static str, u64>,
    pub nodes_seen: usize,
}

impl Snapshot {
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lines={} diagnostic={} frames={} derived={} rejected={} publish_failures={} serial_errors={} nodes={}",
            self.lines_read,
            self.diagnostic_lines,
            self.frames_accepted,
            self.derived_published,
            self.rejected_total(),
            self.publish_failures,
            self.serial_errors,
            self.nodes_seen
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        lines_read: LINES_READ.load(Ordering::Relaxed),
        diagnostic_lines: DIAGNOSTIC_LINES.load(Ordering::Relaxed),
        frames_accepted: FRAMES_ACCEPTED.load(Ordering::Relaxed),
        derived_published: DERIVED_PUBLISHED.load(Ordering::Relaxed),
        publish_failures: PUBLISH_FAILURES.load(Ordering::Relaxed),
        serial_errors: SERIAL_ERRORS.load(Ordering::Relaxed),
        rejected: rejections_lock()
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default(),
        nodes_seen: nodes_lock().lock().map(|g| g.len()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and tests run in parallel, so only assert growth.
    #[test]
    fn rejections_are_grouped_by_kind() {
        let before = snapshot();
        record_rejection("malformed_address");
        record_rejection("malformed_address");
        record_rejection("payload_too_large");
        let after = snapshot();
        let delta = |kind: &str| {
            after.rejected.get(kind).copied().unwrap_or(0)
                - before.rejected.get(kind).copied().unwrap_or(0)
        };
        assert!(delta("malformed_address") >= 2);
        assert!(delta("payload_too_large") >= 1);
        assert!(after.rejected_total() >= before.rejected_total() + 3);
    }

    #[test]
    fn frames_track_distinct_nodes() {
        let addr = Address {
            network: 900,
            channel: 9,
            node: 9,
        };
        record_frame(addr);
        record_frame(addr);
        let snap = snapshot();
        assert!(snap.frames_accepted >= 2);
        assert!(snap.nodes_seen >= 1);
        assert!(snap.to_string().contains("frames="));
    }
}
