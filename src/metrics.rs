//! In-process counters for the webhook ingestion gate.
//!
//! Each rejection stage increments exactly one counter, so operators (and
//! tests) can tell which gate a delivery died at. Stale timestamps are
//! rejected before any signature work happens.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct GateMetrics {
    pub rule_rejected: AtomicU64,
    pub secret_missing: AtomicU64,
    pub headers_missing: AtomicU64,
    pub timestamp_invalid: AtomicU64,
    pub timestamp_stale: AtomicU64,
    pub signature_verified: AtomicU64,
    pub signature_rejected: AtomicU64,
    pub replay_rejected: AtomicU64,
    pub subject_unknown: AtomicU64,
    pub accepted: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GateMetricsSnapshot {
    pub rule_rejected: u64,
    pub secret_missing: u64,
    pub headers_missing: u64,
    pub timestamp_invalid: u64,
    pub timestamp_stale: u64,
    pub signature_verified: u64,
    pub signature_rejected: u64,
    pub replay_rejected: u64,
    pub subject_unknown: u64,
    pub accepted: u64,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GateMetricsSnapshot {
        GateMetricsSnapshot {
            rule_rejected: self.rule_rejected.load(Ordering::Relaxed),
            secret_missing: self.secret_missing.load(Ordering::Relaxed),
            headers_missing: self.headers_missing.load(Ordering::Relaxed),
            timestamp_invalid: self.timestamp_invalid.load(Ordering::Relaxed),
            timestamp_stale: self.timestamp_stale.load(Ordering::Relaxed),
            signature_verified: self.signature_verified.load(Ordering::Relaxed),
            signature_rejected: self.signature_rejected.load(Ordering::Relaxed),
            replay_rejected: self.replay_rejected.load(Ordering::Relaxed),
            subject_unknown: self.subject_unknown.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = GateMetrics::new();
        bump(&metrics.accepted);
        bump(&metrics.accepted);
        bump(&metrics.replay_rejected);

        let snap = metrics.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.replay_rejected, 1);
        assert_eq!(snap.signature_verified, 0);
    }
}
