//! Register watch: poll a few registers and bulk IN while a human touches
//! the sensor.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::context::ProbeContext;
use crate::error::{Attempt, ProbeError, triage};
use crate::events::{ProbeEvent, ProbeObserver, ProbePhase};
use crate::explorer::PREVIEW_LEN;
use crate::probe::StatusProbe;
use crate::protocol::{RegisterAddress, RegisterValue};
use crate::recovery::SessionRecovery;
use crate::transport::ProbeTransport;

/// Presence registers seen changing under a finger in earlier sessions.
pub const DEFAULT_WATCH_REGISTERS: [RegisterAddress; 2] = [0x63, 0x6A];

/// What to watch and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPlan {
    pub registers: Vec<RegisterAddress>,
    /// Bytes read from each register.
    pub length: usize,
    pub rounds: usize,
    pub interval: Duration,
    /// Writes issued once after the device is forced active.
    pub prelude: Vec<(RegisterAddress, RegisterValue)>,
}

impl Default for WatchPlan {
    fn default() -> Self {
        Self {
            registers: DEFAULT_WATCH_REGISTERS.to_vec(),
            length: 8,
            rounds: 200,
            interval: Duration::from_millis(50),
            prelude: vec![(0x01, 1)],
        }
    }
}

/// One observed register transition. `None` means the read failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterChange {
    pub round: usize,
    pub address: RegisterAddress,
    pub old: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub changes: Vec<RegisterChange>,
    /// (round, byte count) of every non-empty bulk read.
    pub bulk: Vec<(usize, usize)>,
    pub rounds: usize,
}

pub struct RegisterWatch<'a, T: ProbeTransport, O: ProbeObserver> {
    transport: &'a mut T,
    observer: &'a O,
    ctx: &'a mut ProbeContext,
}

impl<'a, T: ProbeTransport, O: ProbeObserver> RegisterWatch<'a, T, O> {
    pub fn new(transport: &'a mut T, observer: &'a O, ctx: &'a mut ProbeContext) -> Self {
        Self {
            transport,
            observer,
            ctx,
        }
    }

    pub fn run(&mut self, plan: &WatchPlan) -> Result<WatchReport, ProbeError> {
        let recovery = SessionRecovery::new(StatusProbe::from_config(&self.ctx.config), self.ctx);
        recovery.establish_baseline(self.transport, self.observer, self.ctx, true)?;

        let timeout = self.ctx.config.control_timeout();
        for &(address, value) in &plan.prelude {
            let write = self.transport.control_write(address, value, 0, timeout);
            if let Attempt::Failed(failure) = triage(write, "watch prelude")? {
                warn!(register = %format!("0x{:02X}", address), failure = %failure, "Prelude write failed");
            }
        }

        info!(registers = ?plan.registers, rounds = plan.rounds, "Watching registers");
        let mut last: Vec<Option<Vec<u8>>> = vec![None; plan.registers.len()];
        let mut report = WatchReport::default();

        for round in 0..plan.rounds {
            if round > 0 {
                thread::sleep(plan.interval);
            }
            for (slot, &address) in plan.registers.iter().enumerate() {
                let read = self
                    .transport
                    .control_read(address, 0, 0, plan.length, timeout);
                let current = triage(read, "register watch")?.ok();
                // The first round always reports, so the initial values are logged.
                if round == 0 || current != last[slot] {
                    self.observer.on_event(&ProbeEvent::RegisterChanged {
                        address,
                        old: last[slot].clone(),
                        new: current.clone(),
                    });
                    report.changes.push(RegisterChange {
                        round,
                        address,
                        old: last[slot].take(),
                        new: current.clone(),
                    });
                }
                last[slot] = current;
            }

            if let Some(data) = self.poll_bulk()? {
                self.ctx.stats.bulk_hits += 1;
                self.observer.on_event(&ProbeEvent::UnsolicitedBulk {
                    byte_count: data.len(),
                    preview: data.iter().take(PREVIEW_LEN).copied().collect(),
                });
                report.bulk.push((round, data.len()));
            }

            report.rounds += 1;
            self.observer.on_event(&ProbeEvent::Progress {
                phase: ProbePhase::Watch,
                current: round as u64 + 1,
                total: plan.rounds as u64,
            });
        }
        Ok(report)
    }

    fn poll_bulk(&mut self) -> Result<Option<Vec<u8>>, ProbeError> {
        let config = &self.ctx.config;
        let read = self.transport.bulk_read(
            config.bulk_in_endpoint,
            config.bulk_read_length,
            config.bulk_read_timeout(),
        );
        Ok(triage(read, "bulk poll")?.ok().filter(|data| !data.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::events::RecordingObserver;
    use crate::transport::MockTransport;

    fn plan(rounds: usize) -> WatchPlan {
        WatchPlan {
            rounds,
            interval: Duration::ZERO,
            ..WatchPlan::default()
        }
    }

    #[test]
    fn test_watch_reports_initial_values_then_changes_only() {
        let mut mock = MockTransport::new();
        mock.set_register(0x63, &[0; 8]);
        let mut ctx = ProbeContext::new(ProbeConfig::default().without_delays());
        let observer = RecordingObserver::new();

        let report = RegisterWatch::new(&mut mock, &observer, &mut ctx)
            .run(&plan(3))
            .unwrap();

        assert_eq!(report.rounds, 3);
        // Round 0: 0x63 readable, 0x6A stalls.
        assert_eq!(
            report.changes,
            vec![
                RegisterChange {
                    round: 0,
                    address: 0x63,
                    old: None,
                    new: Some(vec![0; 8]),
                },
                RegisterChange {
                    round: 0,
                    address: 0x6A,
                    old: None,
                    new: None,
                },
            ]
        );
        assert!(report.bulk.is_empty());
        assert_eq!(mock.control_writes(), vec![(0x36, 1), (0x01, 1)]);
    }

    #[test]
    fn test_watch_sees_bulk_data() {
        let mut mock = MockTransport::new();
        // The prelude enable write queues a frame.
        mock.on_write(0x01, 1, crate::transport::MockEffect::bulk(&[0x5A; 128]));
        let mut ctx = ProbeContext::new(ProbeConfig::default().without_delays());
        let observer = RecordingObserver::new();

        let report = RegisterWatch::new(&mut mock, &observer, &mut ctx)
            .run(&plan(2))
            .unwrap();

        assert_eq!(report.bulk, vec![(0, 128)]);
        assert_eq!(ctx.stats.bulk_hits, 1);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            ProbeEvent::UnsolicitedBulk { byte_count: 128, preview } if preview.len() == PREVIEW_LEN
        )));
    }
}
