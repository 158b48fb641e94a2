//! Per-action and process-wide session statistics: bytes served vs. bytes a
//! client didn't have to read off disk itself, and a running tool-call count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ActionStats {
    pub bytes_served: u64,
    pub bytes_avoided: u64,
}

/// A point-in-time view of [`SessionStats`], as returned by the `status`
/// action's `session` field.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub tool_calls: u64,
    pub bytes_served: u64,
    pub bytes_avoided: u64,
    pub by_action: HashMap<String, ActionStats>,
}

/// Guarded by one mutex for the per-action breakdown, per §5's concurrency
/// model; the process-wide totals are plain atomics since they only ever
/// grow and never need to be read in step with the breakdown. Counters only
/// grow for the life of the daemon.
#[derive(Default)]
pub struct SessionStats {
    tool_calls: AtomicU64,
    bytes_served_total: AtomicU64,
    bytes_avoided_total: AtomicU64,
    by_action: Mutex<HashMap<String, ActionStats>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dispatched request bumps this once, regardless of outcome.
    pub fn bump_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, action: &str, bytes_served: u64, bytes_avoided: u64) {
        self.bytes_served_total.fetch_add(bytes_served, Ordering::Relaxed);
        self.bytes_avoided_total.fetch_add(bytes_avoided, Ordering::Relaxed);

        let mut map = self.by_action.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(action.to_string()).or_default();
        entry.bytes_served += bytes_served;
        entry.bytes_avoided += bytes_avoided;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            bytes_served: self.bytes_served_total.load(Ordering::Relaxed),
            bytes_avoided: self.bytes_avoided_total.load(Ordering::Relaxed),
            by_action: self.by_action.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_calls() {
        let stats = SessionStats::new();
        stats.record("squeeze", 100, 900);
        stats.record("squeeze", 50, 450);
        let snap = stats.snapshot();
        let squeeze = snap.by_action.get("squeeze").unwrap();
        assert_eq!(squeeze.bytes_served, 150);
        assert_eq!(squeeze.bytes_avoided, 1350);
        assert_eq!(snap.bytes_served, 150);
        assert_eq!(snap.bytes_avoided, 1350);
    }

    #[test]
    fn tool_calls_counts_every_bump() {
        let stats = SessionStats::new();
        stats.bump_tool_calls();
        stats.bump_tool_calls();
        stats.bump_tool_calls();
        assert_eq!(stats.snapshot().tool_calls, 3);
    }

    #[test]
    fn totals_sum_across_distinct_actions() {
        let stats = SessionStats::new();
        stats.record("squeeze", 100, 900);
        stats.record("search", 40, 60);
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_served, 140);
        assert_eq!(snap.bytes_avoided, 960);
        assert_eq!(snap.by_action.len(), 2);
    }
}
