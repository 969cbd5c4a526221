//! Best-effort engine telemetry
//!
//! Process-wide counters for function call counts and elapsed time,
//! plus exceeded-limit tallies. Updates are best-effort: a contended or
//! poisoned lock loses the sample rather than slowing or failing the
//! engine, and nothing here ever returns an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;

/// Call count and cumulative time for one function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionMetric {
    pub calls: u64,
    pub time_us: u64,
}

lazy_static! {
    static ref FUNCTION_METRICS: Mutex<HashMap<String, FunctionMetric>> =
        Mutex::new(HashMap::new());
}

static OPS_EXCEEDED: AtomicU64 = AtomicU64::new(0);
static DEPTH_EXCEEDED: AtomicU64 = AtomicU64::new(0);

/// Record one call of `name` taking `elapsed`
pub fn record_function(name: &str, elapsed: Duration) {
    if let Ok(mut metrics) = FUNCTION_METRICS.lock() {
        let entry = metrics.entry(name.to_string()).or_default();
        entry.calls += 1;
        entry.time_us += elapsed.as_micros() as u64;
    }
}

/// Counters for a single function, if it was ever recorded
pub fn function_metric(name: &str) -> Option<FunctionMetric> {
    FUNCTION_METRICS
        .lock()
        .ok()
        .and_then(|metrics| metrics.get(name).copied())
}

/// Snapshot of every recorded function
pub fn function_metrics() -> HashMap<String, FunctionMetric> {
    FUNCTION_METRICS
        .lock()
        .map(|metrics| metrics.clone())
        .unwrap_or_default()
}

pub fn record_ops_exceeded() {
    OPS_EXCEEDED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_depth_exceeded() {
    DEPTH_EXCEEDED.fetch_add(1, Ordering::Relaxed);
}

pub fn ops_exceeded() -> u64 {
    OPS_EXCEEDED.load(Ordering::Relaxed)
}

pub fn depth_exceeded() -> u64 {
    DEPTH_EXCEEDED.load(Ordering::Relaxed)
}
