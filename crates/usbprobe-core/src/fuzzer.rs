//! Bulk OUT payload fuzzing.
//!
//! Every base command is expanded into a raw frame and its two checksum
//! variants. Bulk data is the primary signal; a status change counts too.

use tracing::{debug, info};

use crate::context::{ProbeContext, Reference};
use crate::error::{ProbeError, triage};
use crate::events::{Finding, ProbeEvent, ProbeObserver, ProbePhase};
use crate::explorer::{Detection, ExploreOutcome, Explorer, HaltOn, Stimulus, Strategy, Trial};
use crate::probe::StatusProbe;
use crate::protocol::codec::{self, CodecError};
use crate::protocol::{BulkPayload, FrameVariant};
use crate::recovery::{RecoveryPolicy, SessionRecovery};
use crate::transport::ProbeTransport;

/// Base commands from earlier probing sessions.
pub fn default_commands() -> Vec<Vec<u8>> {
    vec![
        vec![0x55, 0xAA, 0x01, 0x00],
        vec![0xAA, 0x55, 0x01, 0x00],
        vec![0xFC, 0x01, 0x00, 0x00],
        vec![0x01, 0x00, 0x00, 0x00],
    ]
}

/// Pre-framed candidates derived from the host driver's command builder:
/// a 04 FB header, a 16-bit command word in several byte orders, then 00 01.
pub fn raw_frames() -> Vec<BulkPayload> {
    let frames: [&[u8]; 4] = [
        &[0x04, 0xFB, 0x98, 0x06, 0x00, 0x01],
        &[0x04, 0xFB, 0x06, 0x18, 0x00, 0x01],
        &[0xFB, 0x04, 0x18, 0x06, 0x01, 0x00],
        &[0xFC, 0x04, 0x06, 0x18, 0x00, 0x01],
    ];
    frames
        .iter()
        .filter_map(|f| BulkPayload::padded(f).ok())
        .collect()
}

/// Expand base commands in order: raw, sum16, xor8 per base.
pub fn candidates(bases: &[Vec<u8>]) -> Result<Vec<Stimulus>, CodecError> {
    let mut out = Vec::with_capacity(bases.len() * FrameVariant::ALL.len());
    for base in bases {
        for (variant, payload) in codec::expand(base)? {
            out.push(Stimulus::Frame { variant, payload });
        }
    }
    Ok(out)
}

/// Result of a fuzzing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzOutcome {
    /// Candidate `index` produced a signal.
    Hit { index: usize, trial: Trial },
    Exhausted { attempts: usize, findings: Vec<Finding> },
}

pub struct BulkFuzzer<'a, T: ProbeTransport, O: ProbeObserver> {
    transport: &'a mut T,
    observer: &'a O,
    ctx: &'a mut ProbeContext,
}

impl<'a, T: ProbeTransport, O: ProbeObserver> BulkFuzzer<'a, T, O> {
    pub fn new(transport: &'a mut T, observer: &'a O, ctx: &'a mut ProbeContext) -> Self {
        Self {
            transport,
            observer,
            ctx,
        }
    }

    /// Send expanded `bases`, then `frames` as-is, until one draws a reaction.
    ///
    /// An oversized base is rejected before anything is sent.
    pub fn run(
        &mut self,
        bases: &[Vec<u8>],
        frames: &[BulkPayload],
    ) -> Result<FuzzOutcome, ProbeError> {
        let mut stimuli = candidates(bases)?;
        stimuli.extend(frames.iter().map(|&payload| Stimulus::Frame {
            variant: FrameVariant::Raw,
            payload,
        }));
        info!(candidates = stimuli.len(), "Starting bulk fuzz");

        let recovery = SessionRecovery::new(StatusProbe::from_config(&self.ctx.config), self.ctx);
        recovery.establish_baseline(self.transport, self.observer, self.ctx, true)?;
        self.drain()?;

        let strategy = Strategy {
            detection: Detection::BulkThenStatus,
            reference: Reference::LastKnown,
            halt_on: HaltOn::AnySignal,
            recovery: RecoveryPolicy::Never,
            settle: std::time::Duration::ZERO,
            interval: self.ctx.config.fuzz_interval(),
            report_once: false,
            observe_after_failure: false,
        };
        let total = stimuli.len() as u64;
        let mut explorer = Explorer::new(self.transport, self.observer, self.ctx, strategy);
        let outcome = explorer.run(stimuli)?;
        let findings = explorer.into_findings();

        Ok(match outcome {
            ExploreOutcome::Hit { index, trial } => {
                info!(candidate = index, stimulus = %trial.stimulus, "Fuzz candidate drew a reaction");
                FuzzOutcome::Hit { index, trial }
            }
            ExploreOutcome::Exhausted { attempts } => {
                self.observer.on_event(&ProbeEvent::Exhausted {
                    phase: ProbePhase::BulkFuzz,
                    attempts: total,
                });
                FuzzOutcome::Exhausted { attempts, findings }
            }
        })
    }

    /// Discard whatever is sitting on bulk IN.
    fn drain(&mut self) -> Result<(), ProbeError> {
        let config = &self.ctx.config;
        let read = self.transport.bulk_read(
            config.bulk_in_endpoint,
            config.bulk_read_length,
            config.bulk_read_timeout(),
        );
        if let Some(stale) = triage(read, "bulk drain")?.ok() {
            debug!(bytes = stale.len(), "Drained stale bulk data");
        }
        Ok(())
    }
}
