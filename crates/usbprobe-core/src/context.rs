//! Session context shared by every explorer.
//!
//! Holds the configuration and the status references of the current scan
//! phase. Passed by `&mut` so scans stay reentrant and test-isolated.

use crate::config::ProbeConfig;
use crate::protocol::StatusWord;

/// Which status an observation is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// The baseline captured after the last reset and active assertion.
    Baseline,
    /// The most recently observed status.
    LastKnown,
}

/// Counters accumulated across a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub attempts: u64,
    pub failures: u64,
    pub status_changes: u64,
    pub recoveries: u64,
    pub bulk_hits: u64,
}

#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub config: ProbeConfig,
    pub stats: ProbeStats,
    baseline: Option<StatusWord>,
    last_status: Option<StatusWord>,
    epoch: u64,
}

impl ProbeContext {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            stats: ProbeStats::default(),
            baseline: None,
            last_status: None,
            epoch: 0,
        }
    }

    /// Start a new baseline epoch.
    ///
    /// The last-known status restarts from the same snapshot so no
    /// comparison ever spans two baselines.
    pub fn set_baseline(&mut self, baseline: Option<StatusWord>) {
        self.baseline = baseline;
        self.last_status = baseline;
        self.epoch += 1;
    }

    pub fn baseline(&self) -> Option<StatusWord> {
        self.baseline
    }

    pub fn last_status(&self) -> Option<StatusWord> {
        self.last_status
    }

    /// Incremented on every [`set_baseline`](Self::set_baseline).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn note_status(&mut self, status: StatusWord) {
        self.last_status = Some(status);
    }

    pub fn reference(&self, reference: Reference) -> Option<StatusWord> {
        match reference {
            Reference::Baseline => self.baseline,
            Reference::LastKnown => self.last_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_baseline_resets_last_known() {
        let mut ctx = ProbeContext::new(ProbeConfig::default());
        let a = StatusWord::new([1, 0, 0, 0, 0, 0, 0, 0]);
        let b = StatusWord::new([2, 0, 0, 0, 0, 0, 0, 0]);

        ctx.set_baseline(Some(a));
        ctx.note_status(b);
        assert_eq!(ctx.reference(Reference::Baseline), Some(a));
        assert_eq!(ctx.reference(Reference::LastKnown), Some(b));

        ctx.set_baseline(Some(b));
        assert_eq!(ctx.last_status(), Some(b));
        assert_eq!(ctx.epoch(), 2);
    }
}
