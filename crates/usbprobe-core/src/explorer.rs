//! Generic trial loop shared by every scanner.
//!
//! An [`Explorer`] applies candidate stimuli one at a time, checks for
//! effects in the order its [`Strategy`] prescribes, re-arms the device when
//! asked to, and halts on the first qualifying signal.

use std::collections::HashSet;
use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::context::{ProbeContext, Reference};
use crate::error::{Attempt, ProbeError, TransferFailure, triage};
use crate::events::{Finding, ProbeEvent, ProbeObserver};
use crate::probe::StatusProbe;
use crate::protocol::{BulkPayload, FrameVariant, RegisterAddress, RegisterValue, StatusWord};
use crate::recovery::{RecoveryPolicy, SessionRecovery};
use crate::transport::ProbeTransport;

/// Bytes of bulk data kept in events.
pub(crate) const PREVIEW_LEN: usize = 32;

/// One action taken against the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stimulus {
    /// Vendor control write of `value` to `address`.
    Register {
        address: RegisterAddress,
        value: RegisterValue,
    },
    /// Bulk OUT frame.
    Frame {
        variant: FrameVariant,
        payload: BulkPayload,
    },
}

impl Stimulus {
    pub fn register(address: RegisterAddress, value: RegisterValue) -> Self {
        Stimulus::Register { address, value }
    }

    pub fn address(&self) -> Option<RegisterAddress> {
        match self {
            Stimulus::Register { address, .. } => Some(*address),
            Stimulus::Frame { .. } => None,
        }
    }
}

impl fmt::Display for Stimulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stimulus::Register { address, value } => {
                write!(f, "reg 0x{address:02X} <- 0x{value:04X}")
            }
            Stimulus::Frame { variant, payload } => {
                write!(f, "frame {} ({variant})", payload.short_hex())
            }
        }
    }
}

/// Order in which effects are checked after a stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Read status; poll bulk IN only when the status moved.
    StatusThenBulkOnChange,
    /// Read status, then poll bulk IN unconditionally.
    StatusThenBulk,
    /// Poll bulk IN; read status only when nothing arrived.
    BulkThenStatus,
}

/// Which signal stops the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltOn {
    BulkData,
    AnySignal,
}

/// Explorer configuration.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub detection: Detection,
    pub reference: Reference,
    pub halt_on: HaltOn,
    pub recovery: RecoveryPolicy,
    /// Delay between the stimulus and the first check.
    pub settle: Duration,
    /// Delay between two candidates.
    pub interval: Duration,
    /// Report a given (address, status) pair only once per run.
    pub report_once: bool,
    /// Still check for effects when the stimulus transfer failed.
    pub observe_after_failure: bool,
}

/// Observed outcome of one stimulus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    NoEffect,
    StatusChanged { old: StatusWord, new: StatusWord },
    BulkDataReceived { byte_count: usize },
    TransferFailed(TransferFailure),
}

impl ProbeResult {
    fn halts(&self, halt_on: HaltOn) -> bool {
        match self {
            ProbeResult::BulkDataReceived { .. } => true,
            ProbeResult::StatusChanged { .. } => halt_on == HaltOn::AnySignal,
            _ => false,
        }
    }
}

/// Result of one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    pub stimulus: Stimulus,
    pub result: ProbeResult,
    /// Status read after the stimulus, when readable.
    pub observed: Option<StatusWord>,
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExploreOutcome {
    /// Halting signal on candidate `index`.
    Hit { index: usize, trial: Trial },
    /// Every candidate tried.
    Exhausted { attempts: usize },
}

pub struct Explorer<'a, T: ProbeTransport, O: ProbeObserver> {
    transport: &'a mut T,
    observer: &'a O,
    ctx: &'a mut ProbeContext,
    recovery: SessionRecovery,
    strategy: Strategy,
    reported: HashSet<(Option<RegisterAddress>, StatusWord)>,
    findings: Vec<Finding>,
}

impl<'a, T: ProbeTransport, O: ProbeObserver> Explorer<'a, T, O> {
    pub fn new(
        transport: &'a mut T,
        observer: &'a O,
        ctx: &'a mut ProbeContext,
        strategy: Strategy,
    ) -> Self {
        let recovery = SessionRecovery::new(StatusProbe::from_config(&ctx.config), ctx);
        Self {
            transport,
            observer,
            ctx,
            recovery,
            strategy,
            reported: HashSet::new(),
            findings: Vec::new(),
        }
    }

    /// Findings reported so far.
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    /// Try candidates in order until one halts the run.
    pub fn run<I>(&mut self, candidates: I) -> Result<ExploreOutcome, ProbeError>
    where
        I: IntoIterator<Item = Stimulus>,
    {
        let mut attempts = 0;
        for (index, stimulus) in candidates.into_iter().enumerate() {
            if index > 0 {
                thread::sleep(self.strategy.interval);
            }
            let trial = self.trial(stimulus)?;
            attempts += 1;
            if trial.result.halts(self.strategy.halt_on) {
                return Ok(ExploreOutcome::Hit { index, trial });
            }
        }
        Ok(ExploreOutcome::Exhausted { attempts })
    }

    /// Apply one stimulus and observe its effect.
    pub fn trial(&mut self, stimulus: Stimulus) -> Result<Trial, ProbeError> {
        self.ctx.stats.attempts += 1;

        let rejected = match self.apply(&stimulus)? {
            Attempt::Done(()) => None,
            Attempt::Failed(failure) => {
                self.ctx.stats.failures += 1;
                debug!(stimulus = %stimulus, failure = %failure, "Stimulus rejected");
                self.observer.on_event(&ProbeEvent::TransferFailed {
                    stimulus: Some(stimulus.clone()),
                    failure: failure.clone(),
                });
                if !self.strategy.observe_after_failure {
                    return Ok(Trial {
                        stimulus,
                        result: ProbeResult::TransferFailed(failure),
                        observed: None,
                    });
                }
                Some(failure)
            }
        };

        thread::sleep(self.strategy.settle);
        let reference = self.ctx.reference(self.strategy.reference);

        let (result, observed) = match self.strategy.detection {
            Detection::StatusThenBulkOnChange => {
                let observed = self.read_status()?;
                let moved = diverged(reference, observed);
                let bulk = match moved {
                    Some(_) => self.poll_bulk()?,
                    None => None,
                };
                (self.classify(&stimulus, moved, bulk), observed)
            }
            Detection::StatusThenBulk => {
                let observed = self.read_status()?;
                let moved = diverged(reference, observed);
                let bulk = self.poll_bulk()?;
                (self.classify(&stimulus, moved, bulk), observed)
            }
            Detection::BulkThenStatus => match self.poll_bulk()? {
                Some(data) => (self.classify(&stimulus, None, Some(data)), None),
                None => {
                    let observed = self.read_status()?;
                    let moved = diverged(reference, observed);
                    (self.classify(&stimulus, moved, None), observed)
                }
            },
        };
        // A device can act on a transfer whose handshake failed.
        let result = match (result, rejected) {
            (ProbeResult::NoEffect, Some(failure)) => ProbeResult::TransferFailed(failure),
            (result, _) => result,
        };

        if let Some(status) = observed {
            self.ctx.note_status(status);
            if self.strategy.recovery == RecoveryPolicy::ReassertActive {
                self.recovery
                    .rearm_if_diverged(&*self.transport, self.observer, self.ctx, status)?;
            }
        }

        Ok(Trial {
            stimulus,
            result,
            observed,
        })
    }

    fn apply(&mut self, stimulus: &Stimulus) -> Result<Attempt<()>, ProbeError> {
        let config = &self.ctx.config;
        match stimulus {
            Stimulus::Register { address, value } => triage(
                self.transport
                    .control_write(*address, *value, 0, config.control_timeout()),
                "register write",
            ),
            Stimulus::Frame { payload, .. } => {
                let sent = triage(
                    self.transport.bulk_write(
                        config.bulk_out_endpoint,
                        payload.as_bytes(),
                        config.bulk_write_timeout(),
                    ),
                    "bulk write",
                )?;
                Ok(match sent {
                    Attempt::Done(_) => Attempt::Done(()),
                    Attempt::Failed(failure) => Attempt::Failed(failure),
                })
            }
        }
    }

    fn read_status(&mut self) -> Result<Option<StatusWord>, ProbeError> {
        match self.recovery.probe().snapshot(&*self.transport)? {
            Attempt::Done(status) => Ok(Some(status)),
            Attempt::Failed(_) => {
                self.ctx.stats.failures += 1;
                Ok(None)
            }
        }
    }

    /// Poll bulk IN once. Timeouts, stalls and empty reads all mean "no data".
    fn poll_bulk(&mut self) -> Result<Option<Vec<u8>>, ProbeError> {
        let config = &self.ctx.config;
        let read = self.transport.bulk_read(
            config.bulk_in_endpoint,
            config.bulk_read_length,
            config.bulk_read_timeout(),
        );
        Ok(match triage(read, "bulk poll")? {
            Attempt::Done(data) if !data.is_empty() => Some(data),
            _ => None,
        })
    }

    fn classify(
        &mut self,
        stimulus: &Stimulus,
        moved: Option<(StatusWord, StatusWord)>,
        bulk: Option<Vec<u8>>,
    ) -> ProbeResult {
        if let Some((old, new)) = moved {
            self.ctx.stats.status_changes += 1;
            let first = self.reported.insert((stimulus.address(), new));
            if first || !self.strategy.report_once {
                let finding = Finding {
                    stimulus: stimulus.clone(),
                    old: Some(old),
                    new: Some(new),
                    byte_count: 0,
                };
                self.observer
                    .on_event(&ProbeEvent::StatusChanged(finding.clone()));
                self.findings.push(finding);
            }
        }

        if let Some(data) = bulk {
            self.ctx.stats.bulk_hits += 1;
            let finding = Finding {
                stimulus: stimulus.clone(),
                old: moved.map(|(old, _)| old),
                new: moved.map(|(_, new)| new),
                byte_count: data.len(),
            };
            self.observer.on_event(&ProbeEvent::BulkData {
                finding: finding.clone(),
                preview: data.iter().take(PREVIEW_LEN).copied().collect(),
            });
            self.findings.push(finding);
            return ProbeResult::BulkDataReceived {
                byte_count: data.len(),
            };
        }

        match moved {
            Some((old, new)) => ProbeResult::StatusChanged { old, new },
            None => ProbeResult::NoEffect,
        }
    }
}

fn diverged(
    reference: Option<StatusWord>,
    observed: Option<StatusWord>,
) -> Option<(StatusWord, StatusWord)> {
    match (reference, observed) {
        (Some(old), Some(new)) if StatusProbe::changed(&old, &new) => Some((old, new)),
        _ => None,
    }
}
