//! Session recovery: getting back to a known-good state.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::context::ProbeContext;
use crate::error::{Attempt, ProbeError, triage};
use crate::events::{ProbeEvent, ProbeObserver};
use crate::probe::StatusProbe;
use crate::protocol::StatusWord;
use crate::transport::ProbeTransport;

/// What to do when the status diverges from the active baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Leave the device where it is.
    Never,
    /// Re-assert the active state before the next candidate.
    ReassertActive,
}

/// Re-arms the active state around destabilizing writes.
#[derive(Debug, Clone, Copy)]
pub struct SessionRecovery {
    probe: StatusProbe,
    reset_settle: Duration,
    recovery_settle: Duration,
}

impl SessionRecovery {
    pub fn new(probe: StatusProbe, ctx: &ProbeContext) -> Self {
        Self {
            probe,
            reset_settle: ctx.config.reset_settle(),
            recovery_settle: ctx.config.recovery_settle(),
        }
    }

    pub fn probe(&self) -> &StatusProbe {
        &self.probe
    }

    /// Reset the device, optionally force the active state, and capture a
    /// fresh baseline into `ctx`.
    ///
    /// A failed snapshot leaves the context without a baseline; status
    /// comparisons are skipped until the next one.
    pub fn establish_baseline<T: ProbeTransport, O: ProbeObserver>(
        &self,
        transport: &mut T,
        observer: &O,
        ctx: &mut ProbeContext,
        assert_active: bool,
    ) -> Result<Option<StatusWord>, ProbeError> {
        info!("Resetting device");
        if let Attempt::Failed(failure) = triage(transport.reset(self.reset_settle), "reset")? {
            warn!(failure = %failure, "Reset failed, continuing with current state");
        }

        if assert_active
            && let Attempt::Failed(failure) = self.probe.assert_active(transport)?
        {
            warn!(failure = %failure, "Failed to force active state");
        }

        let baseline = self.probe.snapshot(transport)?.ok();
        ctx.set_baseline(baseline);
        match baseline {
            Some(status) => observer.on_event(&ProbeEvent::BaselineCaptured {
                epoch: ctx.epoch(),
                status,
            }),
            None => warn!("Baseline unreadable, status comparisons disabled"),
        }
        Ok(baseline)
    }

    /// Re-assert the active state if `observed` diverged from the baseline.
    ///
    /// Returns true when a recovery write was issued.
    pub fn rearm_if_diverged<T: ProbeTransport, O: ProbeObserver>(
        &self,
        transport: &T,
        observer: &O,
        ctx: &mut ProbeContext,
        observed: StatusWord,
    ) -> Result<bool, ProbeError> {
        let Some(baseline) = ctx.baseline() else {
            return Ok(false);
        };
        if !StatusProbe::changed(&baseline, &observed) {
            return Ok(false);
        }

        ctx.stats.recoveries += 1;
        if let Attempt::Failed(failure) = self.probe.assert_active(transport)? {
            warn!(failure = %failure, "Recovery write failed");
        }
        thread::sleep(self.recovery_settle);

        let restored = self.probe.snapshot(transport)?.ok();
        if let Some(status) = restored {
            ctx.note_status(status);
            if StatusProbe::changed(&baseline, &status) {
                warn!(status = %status, "Device still diverged after recovery");
            }
        }
        observer.on_event(&ProbeEvent::Recovered {
            diverged: observed,
            restored,
        });
        Ok(true)
    }
}
