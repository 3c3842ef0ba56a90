//! Register space scanning.
//!
//! The read scan lists registers that answer a vendor read with something
//! other than a sentinel. The write-and-observe scan writes every candidate
//! value to every candidate register and watches the status word and bulk IN.

use tracing::{debug, info};

use crate::context::{ProbeContext, Reference};
use crate::error::{Attempt, ProbeError, triage};
use crate::events::{Finding, ProbeEvent, ProbeObserver, ProbePhase};
use crate::explorer::{Detection, ExploreOutcome, Explorer, HaltOn, Stimulus, Strategy, Trial};
use crate::probe::StatusProbe;
use crate::protocol::constants::{REGISTER_READ_LEN, REQUEST_TYPE_VENDOR_IN};
use crate::protocol::{RegisterAddress, RegisterValue};
use crate::recovery::{RecoveryPolicy, SessionRecovery};
use crate::transport::ProbeTransport;

/// A register that returned an informative value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterReading {
    pub address: RegisterAddress,
    pub data: Vec<u8>,
}

/// True for values that carry no information: all zeros, all ones, or the
/// vendor-IN request type echoed back.
pub fn is_sentinel(data: &[u8]) -> bool {
    data.is_empty()
        || data.iter().all(|&b| b == 0x00)
        || data.iter().all(|&b| b == 0xFF)
        || data.iter().all(|&b| b == REQUEST_TYPE_VENDOR_IN)
}

/// Which (address, value) pairs a write scan covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub addresses: Vec<RegisterAddress>,
    pub values: Vec<RegisterValue>,
    /// Addresses left out, e.g. known state changers.
    pub skip: Vec<RegisterAddress>,
}

impl WritePlan {
    /// Every address with every byte value.
    pub fn full() -> Self {
        Self {
            addresses: (0..=u8::MAX).collect(),
            values: (0..=u16::from(u8::MAX)).collect(),
            skip: Vec::new(),
        }
    }

    /// Every byte value on a restricted set of addresses.
    pub fn targeted(addresses: &[RegisterAddress]) -> Self {
        Self {
            addresses: addresses.to_vec(),
            ..Self::full()
        }
    }

    pub fn with_values(mut self, values: &[RegisterValue]) -> Self {
        self.values = values.to_vec();
        self
    }

    pub fn skipping(mut self, skip: &[RegisterAddress]) -> Self {
        self.skip = skip.to_vec();
        self
    }

    fn scanned_addresses(&self) -> impl Iterator<Item = RegisterAddress> + '_ {
        self.addresses
            .iter()
            .copied()
            .filter(|a| !self.skip.contains(a))
    }

    /// Number of writes a complete scan issues.
    pub fn len(&self) -> usize {
        self.scanned_addresses().count() * self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a write-and-observe scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteScanReport {
    /// Status changes and bulk hits, each distinct (address, status) once.
    pub findings: Vec<Finding>,
    /// The write that produced bulk data, if any.
    pub hit: Option<Trial>,
    pub attempts: usize,
}

pub struct RegisterScanner<'a, T: ProbeTransport, O: ProbeObserver> {
    transport: &'a mut T,
    observer: &'a O,
    ctx: &'a mut ProbeContext,
}

impl<'a, T: ProbeTransport, O: ProbeObserver> RegisterScanner<'a, T, O> {
    pub fn new(transport: &'a mut T, observer: &'a O, ctx: &'a mut ProbeContext) -> Self {
        Self {
            transport,
            observer,
            ctx,
        }
    }

    fn recovery(&self) -> SessionRecovery {
        SessionRecovery::new(StatusProbe::from_config(&self.ctx.config), self.ctx)
    }

    /// Read every address in `addresses` with a 2-byte vendor read and keep
    /// the informative answers.
    pub fn read_scan(
        &mut self,
        addresses: &[RegisterAddress],
    ) -> Result<Vec<RegisterReading>, ProbeError> {
        self.recovery()
            .establish_baseline(self.transport, self.observer, self.ctx, true)?;

        let mut found = Vec::new();
        for (address, attempt) in self.read_registers(addresses, REGISTER_READ_LEN)? {
            let Attempt::Done(data) = attempt else {
                continue;
            };
            if is_sentinel(&data) {
                debug!(register = %format!("0x{:02X}", address), "Sentinel value");
                continue;
            }
            self.observer.on_event(&ProbeEvent::RegisterRead {
                address,
                data: data.clone(),
            });
            found.push(RegisterReading { address, data });
        }
        info!(readable = found.len(), "Read scan complete");
        Ok(found)
    }

    /// Read `length` bytes from each address, without filtering.
    pub fn read_registers(
        &mut self,
        addresses: &[RegisterAddress],
        length: usize,
    ) -> Result<Vec<(RegisterAddress, Attempt<Vec<u8>>)>, ProbeError> {
        let timeout = self.ctx.config.control_timeout();
        let mut results = Vec::with_capacity(addresses.len());
        for &address in addresses {
            self.ctx.stats.attempts += 1;
            let read = self
                .transport
                .control_read(address, 0, 0, length, timeout);
            let attempt = triage(read, "register read")?;
            if !attempt.is_done() {
                self.ctx.stats.failures += 1;
            }
            results.push((address, attempt));
        }
        Ok(results)
    }

    /// Write every value of `plan` to every address of `plan`, comparing the
    /// status against the pre-scan baseline after each write.
    ///
    /// Stops early only when bulk data arrives.
    pub fn write_scan(&mut self, plan: &WritePlan) -> Result<WriteScanReport, ProbeError> {
        self.recovery()
            .establish_baseline(self.transport, self.observer, self.ctx, true)?;

        let strategy = Strategy {
            detection: Detection::StatusThenBulkOnChange,
            reference: Reference::Baseline,
            halt_on: HaltOn::BulkData,
            recovery: RecoveryPolicy::ReassertActive,
            settle: std::time::Duration::ZERO,
            interval: std::time::Duration::ZERO,
            report_once: true,
            observe_after_failure: false,
        };

        let addresses: Vec<RegisterAddress> = plan.scanned_addresses().collect();
        let total = addresses.len() as u64;
        let mut report = WriteScanReport {
            findings: Vec::new(),
            hit: None,
            attempts: 0,
        };

        for (i, &address) in addresses.iter().enumerate() {
            debug!(register = %format!("0x{:02X}", address), "Scanning register");
            let mut explorer = Explorer::new(self.transport, self.observer, self.ctx, strategy);
            let outcome = explorer.run(
                plan.values
                    .iter()
                    .map(|&value| Stimulus::register(address, value)),
            )?;
            report.findings.extend(explorer.into_findings());

            match outcome {
                ExploreOutcome::Hit { index, trial } => {
                    report.attempts += index + 1;
                    report.hit = Some(trial);
                    return Ok(report);
                }
                ExploreOutcome::Exhausted { attempts } => report.attempts += attempts,
            }

            self.observer.on_event(&ProbeEvent::Progress {
                phase: ProbePhase::WriteScan,
                current: i as u64 + 1,
                total,
            });
        }

        self.observer.on_event(&ProbeEvent::Exhausted {
            phase: ProbePhase::WriteScan,
            attempts: report.attempts as u64,
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::events::{NullObserver, RecordingObserver};
    use crate::explorer::ProbeResult;
    use crate::protocol::StatusWord;
    use crate::protocol::constants::FORCE_ACTIVE_REQUEST;
    use crate::transport::mock::MOCK_ACTIVE_STATUS;
    use crate::transport::{MockCall, MockEffect, MockFailure, MockTransport};

    fn ctx() -> ProbeContext {
        ProbeContext::new(ProbeConfig::default().without_delays())
    }

    /// Control writes issued after the baseline's force-active write.
    fn scan_writes(mock: &MockTransport) -> Vec<(u8, u16)> {
        mock.control_writes().into_iter().skip(1).collect()
    }

    #[test]
    fn test_sentinels() {
        assert!(is_sentinel(&[0x00, 0x00]));
        assert!(is_sentinel(&[0xFF, 0xFF]));
        assert!(is_sentinel(&[0xC0, 0xC0]));
        assert!(is_sentinel(&[]));
        assert!(!is_sentinel(&[0x00, 0x24]));
        assert!(!is_sentinel(&[0xC0, 0x00]));
    }

    #[test]
    fn test_read_scan_filters_sentinels() {
        let mut mock = MockTransport::new();
        mock.set_register(0x00, &[0x93, 0xA9]);
        mock.set_register(0x24, &[0x00, 0x24]);
        mock.set_register(0x40, &[0x00, 0x00]);
        mock.set_register(0x41, &[0xFF, 0xFF]);
        mock.set_register(0x42, &[0xC0, 0xC0]);
        let mut ctx = ctx();
        let observer = RecordingObserver::new();

        let all: Vec<u8> = (0..=255).collect();
        let found = RegisterScanner::new(&mut mock, &observer, &mut ctx)
            .read_scan(&all)
            .unwrap();

        let addresses: Vec<u8> = found.iter().map(|r| r.address).collect();
        // 0x02 is the status register and always answers.
        assert_eq!(addresses, vec![0x00, 0x02, 0x24]);
        assert_eq!(found[0].data, vec![0x93, 0xA9]);
        assert!(mock.calls().contains(&MockCall::ControlRead {
            request: 0x24,
            value: 0,
            index: 0,
            length: 2
        }));
    }

    #[test]
    fn test_read_registers_keeps_failures() {
        let mut mock = MockTransport::new();
        mock.set_register(0x63, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut ctx = ctx();

        let results = RegisterScanner::new(&mut mock, &NullObserver, &mut ctx)
            .read_registers(&[0x63, 0x6A], 8)
            .unwrap();
        assert_eq!(results[0], (0x63, Attempt::Done(vec![1, 2, 3, 4, 5, 6, 7, 8])));
        assert!(!results[1].1.is_done());
        assert_eq!(ctx.stats.failures, 1);
    }

    #[test]
    fn test_full_write_scan_visits_every_pair_once() {
        let mut mock = MockTransport::new();
        let mut ctx = ctx();

        let report = RegisterScanner::new(&mut mock, &NullObserver, &mut ctx)
            .write_scan(&WritePlan::full())
            .unwrap();
        assert_eq!(report.attempts, 256 * 256);
        assert!(report.hit.is_none());

        let writes = scan_writes(&mock);
        let expected: Vec<(u8, u16)> = (0..=255u8)
            .flat_map(|a| (0..=255u16).map(move |v| (a, v)))
            .collect();
        assert_eq!(writes, expected);
    }

    #[test]
    fn test_timeout_does_not_abort_scan() {
        let mut mock = MockTransport::new();
        mock.fail_write(0x01, 0x10, MockFailure::Timeout);
        let mut ctx = ctx();

        let plan = WritePlan::targeted(&[0x01]).with_values(&[0x0F, 0x10, 0x11]);
        let report = RegisterScanner::new(&mut mock, &NullObserver, &mut ctx)
            .write_scan(&plan)
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(scan_writes(&mock), vec![(0x01, 0x0F), (0x01, 0x10), (0x01, 0x11)]);
        assert_eq!(ctx.stats.failures, 1);
    }

    #[test]
    fn test_write_scan_recovers_and_reports_distinct_statuses() {
        let a = StatusWord::new([0x00, 0x24, 0, 0, 0, 0, 0, 0]);
        let b = StatusWord::new([0x00, 0x25, 0, 0, 0, 0, 0, 0]);
        let mut mock = MockTransport::new();
        mock.on_write(0x0C, 1, MockEffect::status(a));
        mock.on_write(0x0C, 2, MockEffect::status(a));
        mock.on_write(0x0C, 3, MockEffect::status(b));
        let mut ctx = ctx();
        let observer = RecordingObserver::new();

        let plan = WritePlan::targeted(&[0x0C]).with_values(&[1, 2, 3, 4]);
        let report = RegisterScanner::new(&mut mock, &observer, &mut ctx)
            .write_scan(&plan)
            .unwrap();

        let news: Vec<_> = report.findings.iter().map(|f| f.new).collect();
        assert_eq!(news, vec![Some(a), Some(b)]);
        assert!(report.findings.iter().all(|f| f.old == Some(MOCK_ACTIVE_STATUS)));

        // Each divergence is followed by a force-active write.
        assert_eq!(
            scan_writes(&mock),
            vec![
                (0x0C, 1),
                (FORCE_ACTIVE_REQUEST, 1),
                (0x0C, 2),
                (FORCE_ACTIVE_REQUEST, 1),
                (0x0C, 3),
                (FORCE_ACTIVE_REQUEST, 1),
                (0x0C, 4),
            ]
        );
        assert_eq!(ctx.stats.recoveries, 3);
    }

    #[test]
    fn test_write_scan_stops_on_bulk_data() {
        let changed = StatusWord::new([0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let mut mock = MockTransport::new();
        mock.on_write(
            0x24,
            0x01,
            MockEffect {
                status: Some(changed),
                bulk: Some(vec![0xAB; 1024]),
            },
        );
        let mut ctx = ctx();

        let plan = WritePlan::targeted(&[0x01, 0x24, 0x30]).with_values(&[0, 1, 2]);
        let report = RegisterScanner::new(&mut mock, &NullObserver, &mut ctx)
            .write_scan(&plan)
            .unwrap();

        let hit = report.hit.unwrap();
        assert_eq!(hit.stimulus, Stimulus::register(0x24, 0x01));
        assert_eq!(hit.result, ProbeResult::BulkDataReceived { byte_count: 1024 });
        assert_eq!(report.attempts, 5);
        assert!(!scan_writes(&mock).iter().any(|&(a, _)| a == 0x30));
    }

    #[test]
    fn test_skip_list() {
        let plan = WritePlan::full().skipping(&[0x36, 0x57]);
        assert_eq!(plan.len(), 254 * 256);

        let mut mock = MockTransport::new();
        let mut ctx = ctx();
        let plan = WritePlan::targeted(&[0x35, 0x36, 0x37])
            .with_values(&[1])
            .skipping(&[0x36]);
        RegisterScanner::new(&mut mock, &NullObserver, &mut ctx)
            .write_scan(&plan)
            .unwrap();
        assert_eq!(scan_writes(&mock), vec![(0x35, 1), (0x37, 1)]);
    }
}
