//! Pipeline counters
//!
//! Process-local counters for every stage outcome, served by `GET /stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::SkipReason;

#[derive(Debug, Default)]
pub struct PipelineStats {
    snapshots_written: AtomicU64,
    stale_updates: AtomicU64,
    conflicts: AtomicU64,
    not_applicable: AtomicU64,
    malformed: AtomicU64,
    transient_failures: AtomicU64,
    projections: AtomicU64,
    stale_projections: AtomicU64,
    pointers_written: AtomicU64,
    pointers_removed: AtomicU64,
    alerts_emitted: AtomicU64,
    malformed_notifications: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub snapshots_written: u64,
    pub stale_updates: u64,
    pub conflicts: u64,
    pub not_applicable: u64,
    pub malformed: u64,
    pub transient_failures: u64,
    pub projections: u64,
    pub stale_projections: u64,
    pub pointers_written: u64,
    pub pointers_removed: u64,
    pub alerts_emitted: u64,
    pub malformed_notifications: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::NotApplicable => &self.not_applicable,
            SkipReason::StaleUpdate => &self.stale_updates,
            SkipReason::Conflict => &self.conflicts,
            SkipReason::Malformed => &self.malformed,
            SkipReason::StaleProjection => &self.stale_projections,
        };
        bump(counter, 1);
    }

    pub fn record_snapshot_written(&self) {
        bump(&self.snapshots_written, 1);
    }

    pub fn record_transient_failure(&self) {
        bump(&self.transient_failures, 1);
    }

    pub fn record_projection(&self, written: usize, removed: usize) {
        bump(&self.projections, 1);
        bump(&self.pointers_written, written as u64);
        bump(&self.pointers_removed, removed as u64);
    }

    pub fn record_alerts(&self, n: usize) {
        bump(&self.alerts_emitted, n as u64);
    }

    pub fn record_malformed_notification(&self) {
        bump(&self.malformed_notifications, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            snapshots_written: load(&self.snapshots_written),
            stale_updates: load(&self.stale_updates),
            conflicts: load(&self.conflicts),
            not_applicable: load(&self.not_applicable),
            malformed: load(&self.malformed),
            transient_failures: load(&self.transient_failures),
            projections: load(&self.projections),
            stale_projections: load(&self.stale_projections),
            pointers_written: load(&self.pointers_written),
            pointers_removed: load(&self.pointers_removed),
            alerts_emitted: load(&self.alerts_emitted),
            malformed_notifications: load(&self.malformed_notifications),
        }
    }
}
