//! Multi-step activation hypotheses.
//!
//! Each sequence runs from a fresh reset and its own baseline. The first bulk
//! read that returns data ends the whole exploration.

use std::fmt;

use tracing::info;

use crate::config::SequenceSpec;
use crate::context::{ProbeContext, Reference};
use crate::error::ProbeError;
use crate::events::{Finding, ProbeEvent, ProbeObserver, ProbePhase};
use crate::explorer::{Detection, ExploreOutcome, Explorer, HaltOn, Stimulus, Strategy, Trial};
use crate::probe::StatusProbe;
use crate::protocol::constants::FORCE_ACTIVE_REQUEST;
use crate::protocol::{RegisterAddress, RegisterValue};
use crate::recovery::{RecoveryPolicy, SessionRecovery};
use crate::transport::ProbeTransport;

/// One ordered activation hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub label: Option<String>,
    pub steps: Vec<(RegisterAddress, RegisterValue)>,
}

impl Sequence {
    pub fn new(steps: &[(RegisterAddress, RegisterValue)]) -> Self {
        Self {
            label: None,
            steps: steps.to_vec(),
        }
    }

    pub fn labeled(label: &str, steps: &[(RegisterAddress, RegisterValue)]) -> Self {
        Self {
            label: Some(label.to_string()),
            steps: steps.to_vec(),
        }
    }
}

impl From<SequenceSpec> for Sequence {
    fn from(spec: SequenceSpec) -> Self {
        Self {
            label: spec.label,
            steps: spec.steps,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        }
        for (i, (address, value)) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "0x{address:02X}=0x{value:02X}")?;
        }
        Ok(())
    }
}

/// Hypotheses from earlier probing sessions. Each starts with the
/// force-active write, the one step known to wake the device.
pub fn default_sequences() -> Vec<Sequence> {
    let wake = (FORCE_ACTIVE_REQUEST, 1);
    vec![
        Sequence::labeled("enable chain", &[wake, (0x01, 1), (0x02, 1), (0x10, 1)]),
        Sequence::labeled("enable then mode", &[wake, (0x01, 1), (0x0C, 1)]),
        Sequence::labeled("fpc style", &[wake, (0xFC, 0), (0x01, 1)]),
        Sequence::labeled("unlock then enable", &[wake, (0x00, 1), (0x01, 1)]),
        Sequence::labeled("common enable", &[wake, (0x10, 1)]),
        Sequence::labeled("toggle 0x3C", &[wake, (0x3C, 0), (0x3C, 1)]),
        Sequence::labeled("toggle 0x00", &[wake, (0x00, 0), (0x00, 1)]),
    ]
}

/// Result of a sequence exploration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Step `step` of sequence `sequence` produced bulk data.
    Hit {
        sequence: usize,
        step: usize,
        trial: Trial,
    },
    /// No sequence produced bulk data.
    Exhausted { findings: Vec<Finding> },
}

pub struct SequenceExplorer<'a, T: ProbeTransport, O: ProbeObserver> {
    transport: &'a mut T,
    observer: &'a O,
    ctx: &'a mut ProbeContext,
    active_prelude: bool,
}

impl<'a, T: ProbeTransport, O: ProbeObserver> SequenceExplorer<'a, T, O> {
    pub fn new(transport: &'a mut T, observer: &'a O, ctx: &'a mut ProbeContext) -> Self {
        Self {
            transport,
            observer,
            ctx,
            active_prelude: false,
        }
    }

    /// Force the active state after each reset, before the first step.
    pub fn with_active_prelude(mut self, enabled: bool) -> Self {
        self.active_prelude = enabled;
        self
    }

    /// Run `sequences` in order until one step yields bulk data.
    ///
    /// Failed writes do not abort a sequence: some registers are harmlessly
    /// unsupported.
    pub fn run(&mut self, sequences: &[Sequence]) -> Result<SequenceOutcome, ProbeError> {
        let recovery = SessionRecovery::new(StatusProbe::from_config(&self.ctx.config), self.ctx);
        let strategy = Strategy {
            detection: Detection::StatusThenBulk,
            reference: Reference::LastKnown,
            halt_on: HaltOn::BulkData,
            recovery: RecoveryPolicy::Never,
            settle: self.ctx.config.step_settle(),
            interval: std::time::Duration::ZERO,
            report_once: false,
            observe_after_failure: true,
        };

        let mut findings = Vec::new();
        for (index, sequence) in sequences.iter().enumerate() {
            info!(sequence = index, steps = %sequence, "Running sequence");
            recovery.establish_baseline(
                self.transport,
                self.observer,
                self.ctx,
                self.active_prelude,
            )?;

            let mut explorer = Explorer::new(self.transport, self.observer, self.ctx, strategy);
            let outcome = explorer.run(
                sequence
                    .steps
                    .iter()
                    .map(|&(address, value)| Stimulus::register(address, value)),
            )?;
            findings.extend(explorer.into_findings());

            if let ExploreOutcome::Hit { index: step, trial } = outcome {
                info!(sequence = index, step, "Sequence produced bulk data");
                return Ok(SequenceOutcome::Hit {
                    sequence: index,
                    step,
                    trial,
                });
            }

            self.observer.on_event(&ProbeEvent::Progress {
                phase: ProbePhase::SequenceScan,
                current: index as u64 + 1,
                total: sequences.len() as u64,
            });
        }

        self.observer.on_event(&ProbeEvent::Exhausted {
            phase: ProbePhase::SequenceScan,
            attempts: sequences.len() as u64,
        });
        Ok(SequenceOutcome::Exhausted { findings })
    }
}
