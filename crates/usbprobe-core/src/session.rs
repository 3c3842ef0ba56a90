//! Probe session - owns the transport and context for one device.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::config::ProbeConfig;
use crate::context::{ProbeContext, ProbeStats};
use crate::error::{Attempt, ProbeError};
use crate::events::{ProbeEvent, ProbeObserver, ProbePhase, TracingObserver};
use crate::fuzzer::{self, BulkFuzzer, FuzzOutcome};
use crate::protocol::{BulkPayload, RegisterAddress};
use crate::scanner::{RegisterReading, RegisterScanner, WritePlan, WriteScanReport};
use crate::sequence::{self, Sequence, SequenceExplorer, SequenceOutcome};
use crate::transport::{NusbTransport, ProbeTransport, TransportError};
use crate::watch::{RegisterWatch, WatchPlan, WatchReport};

/// One probing session against one device.
///
/// Phases run strictly one after another on the calling thread.
pub struct ProbeSession<T: ProbeTransport, O: ProbeObserver> {
    transport: T,
    observer: Arc<O>,
    ctx: ProbeContext,
    phase: ProbePhase,
}

impl ProbeSession<NusbTransport, TracingObserver> {
    /// Open the configured device with the default tracing observer.
    pub fn open(config: ProbeConfig) -> Result<Self, ProbeError> {
        Self::open_with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: ProbeObserver> ProbeSession<NusbTransport, O> {
    pub fn open_with_observer(config: ProbeConfig, observer: Arc<O>) -> Result<Self, ProbeError> {
        let transport =
            NusbTransport::open(config.vendor_id, config.product_id, config.interface)?;
        Ok(Self::with_transport(transport, config, observer))
    }

    /// Poll for the device until it appears or `timeout` elapses.
    #[instrument(skip(config, observer))]
    pub fn wait_for_device(
        config: ProbeConfig,
        observer: Arc<O>,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        info!("Waiting for device...");
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;
            match NusbTransport::open(config.vendor_id, config.product_id, config.interface) {
                Ok(transport) => {
                    info!("Device found after {} polls", poll_count);
                    return Ok(Self::with_transport(transport, config, observer));
                }
                Err(TransportError::DeviceNotFound { vid, pid }) => {
                    if start.elapsed() > timeout {
                        return Err(ProbeError::DeviceNotFound { vid, pid });
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<T: ProbeTransport, O: ProbeObserver> ProbeSession<T, O> {
    /// Build a session around an already-open transport.
    pub fn with_transport(transport: T, config: ProbeConfig, observer: Arc<O>) -> Self {
        observer.on_event(&ProbeEvent::DeviceOpened {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });
        Self {
            transport,
            observer,
            ctx: ProbeContext::new(config),
            phase: ProbePhase::Idle,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &ProbeContext {
        &self.ctx
    }

    pub fn stats(&self) -> ProbeStats {
        self.ctx.stats
    }

    pub fn phase(&self) -> ProbePhase {
        self.phase
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn enter(&mut self, phase: ProbePhase) {
        if self.phase != phase {
            self.observer.on_event(&ProbeEvent::PhaseChanged {
                from: self.phase,
                to: phase,
            });
            self.phase = phase;
        }
    }

    /// Built-in sequences followed by the configured ones.
    pub fn sequences(&self) -> Vec<Sequence> {
        let mut all = sequence::default_sequences();
        all.extend(self.ctx.config.sequences.iter().cloned().map(Sequence::from));
        all
    }

    /// Built-in base commands followed by the configured ones.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        let mut all = fuzzer::default_commands();
        all.extend(self.ctx.config.commands.iter().cloned());
        all
    }

    pub fn read_scan(
        &mut self,
        addresses: &[RegisterAddress],
    ) -> Result<Vec<RegisterReading>, ProbeError> {
        self.enter(ProbePhase::ReadScan);
        RegisterScanner::new(&mut self.transport, &*self.observer, &mut self.ctx)
            .read_scan(addresses)
    }

    /// Read `length` bytes from each register, reporting every answer.
    pub fn deep_read(
        &mut self,
        addresses: &[RegisterAddress],
        length: usize,
    ) -> Result<Vec<(RegisterAddress, Attempt<Vec<u8>>)>, ProbeError> {
        self.enter(ProbePhase::ReadScan);
        let results = RegisterScanner::new(&mut self.transport, &*self.observer, &mut self.ctx)
            .read_registers(addresses, length)?;
        for (address, attempt) in &results {
            if let Attempt::Done(data) = attempt {
                self.observer.on_event(&ProbeEvent::RegisterRead {
                    address: *address,
                    data: data.clone(),
                });
            }
        }
        Ok(results)
    }

    pub fn write_scan(&mut self, plan: &WritePlan) -> Result<WriteScanReport, ProbeError> {
        self.enter(ProbePhase::WriteScan);
        RegisterScanner::new(&mut self.transport, &*self.observer, &mut self.ctx).write_scan(plan)
    }

    pub fn run_sequences(
        &mut self,
        sequences: &[Sequence],
        active_prelude: bool,
    ) -> Result<SequenceOutcome, ProbeError> {
        self.enter(ProbePhase::SequenceScan);
        SequenceExplorer::new(&mut self.transport, &*self.observer, &mut self.ctx)
            .with_active_prelude(active_prelude)
            .run(sequences)
    }

    pub fn fuzz(
        &mut self,
        bases: &[Vec<u8>],
        frames: &[BulkPayload],
    ) -> Result<FuzzOutcome, ProbeError> {
        self.enter(ProbePhase::BulkFuzz);
        BulkFuzzer::new(&mut self.transport, &*self.observer, &mut self.ctx).run(bases, frames)
    }

    pub fn watch(&mut self, plan: &WatchPlan) -> Result<WatchReport, ProbeError> {
        self.enter(ProbePhase::Watch);
        RegisterWatch::new(&mut self.transport, &*self.observer, &mut self.ctx).run(plan)
    }

    /// Mark the session complete and return its counters.
    pub fn finish(&mut self) -> ProbeStats {
        self.enter(ProbePhase::Complete);
        info!(
            attempts = self.ctx.stats.attempts,
            failures = self.ctx.stats.failures,
            status_changes = self.ctx.stats.status_changes,
            recoveries = self.ctx.stats.recoveries,
            bulk_hits = self.ctx.stats.bulk_hits,
            "Session complete"
        );
        self.ctx.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequenceSpec;
    use crate::events::RecordingObserver;
    use crate::transport::{MockEffect, MockTransport};

    fn session(mock: MockTransport) -> (ProbeSession<MockTransport, RecordingObserver>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let session = ProbeSession::with_transport(
            mock,
            ProbeConfig::default().without_delays(),
            Arc::clone(&observer),
        );
        (session, observer)
    }

    #[test]
    fn test_session_phases_are_reported() {
        let (mut session, observer) = session(MockTransport::new());
        session.read_scan(&[0x00, 0x01]).unwrap();
        session
            .write_scan(&WritePlan::targeted(&[0x01]).with_values(&[0, 1]))
            .unwrap();
        let stats = session.finish();

        let phases: Vec<(ProbePhase, ProbePhase)> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ProbeEvent::PhaseChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                (ProbePhase::Idle, ProbePhase::ReadScan),
                (ProbePhase::ReadScan, ProbePhase::WriteScan),
                (ProbePhase::WriteScan, ProbePhase::Complete),
            ]
        );
        assert!(matches!(
            observer.events()[0],
            ProbeEvent::DeviceOpened {
                vid: 0x2808,
                pid: 0x93A9
            }
        ));
        assert_eq!(stats.attempts, 4);
    }

    #[test]
    fn test_configured_hypotheses_follow_builtins() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::new());
        let config = ProbeConfig {
            sequences: vec![SequenceSpec {
                label: Some("mine".into()),
                steps: vec![(0x20, 1)],
            }],
            commands: vec![vec![0x12, 0x34]],
            ..ProbeConfig::default().without_delays()
        };
        let session = ProbeSession::with_transport(mock, config, observer);

        let sequences = session.sequences();
        assert_eq!(sequences.len(), 8);
        assert_eq!(sequences[7].label.as_deref(), Some("mine"));
        let commands = session.commands();
        assert_eq!(commands.last(), Some(&vec![0x12, 0x34]));
    }

    #[test]
    fn test_fuzz_through_session() {
        let mock = MockTransport::new();
        let frame = fuzzer::raw_frames()[0];
        mock.on_frame(frame.as_bytes(), MockEffect::bulk(&[1; 16]));
        let (mut session, _observer) = session(mock);

        let outcome = session.fuzz(&[], &fuzzer::raw_frames()).unwrap();
        assert!(matches!(outcome, FuzzOutcome::Hit { index: 0, .. }));
        assert_eq!(session.stats().bulk_hits, 1);
        assert_eq!(session.phase(), ProbePhase::BulkFuzz);
    }

    #[test]
    fn test_deep_read_reports_answers() {
        let mock = MockTransport::new();
        mock.set_register(0x3C, &[9, 8, 7, 6, 5, 4, 3, 2]);
        let (mut session, observer) = session(mock);

        let results = session.deep_read(&[0x00, 0x3C], 8).unwrap();
        assert!(!results[0].1.is_done());
        assert_eq!(results[1].1, Attempt::Done(vec![9, 8, 7, 6, 5, 4, 3, 2]));
        assert_eq!(
            observer
                .events()
                .iter()
                .filter(|e| matches!(e, ProbeEvent::RegisterRead { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_disconnect_ends_session() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let (mut session, _observer) = session(mock);
        handle.disconnect();

        let err = session
            .run_sequences(&sequence::default_sequences(), false)
            .unwrap_err();
        assert!(matches!(err, ProbeError::UnexpectedDisconnect { .. }));
    }
}
