//! Status probing: the one confirmed read and the one confirmed write.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::ProbeConfig;
use crate::error::{Attempt, ProbeError, triage};
use crate::protocol::StatusWord;
use crate::transport::ProbeTransport;

/// Reads status snapshots and forces the active state.
#[derive(Debug, Clone, Copy)]
pub struct StatusProbe {
    status_request: u8,
    status_length: usize,
    force_active_request: u8,
    force_active_value: u16,
    timeout: Duration,
    active_settle: Duration,
}

impl StatusProbe {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            status_request: config.status_request,
            status_length: config.status_length,
            force_active_request: config.force_active_request,
            force_active_value: config.force_active_value,
            timeout: config.control_timeout(),
            active_settle: config.active_settle(),
        }
    }

    /// Issue the status control read.
    pub fn snapshot<T: ProbeTransport>(
        &self,
        transport: &T,
    ) -> Result<Attempt<StatusWord>, ProbeError> {
        let read = transport.control_read(
            self.status_request,
            0,
            0,
            self.status_length,
            self.timeout,
        );
        Ok(match triage(read, "status read")? {
            Attempt::Done(data) => Attempt::Done(StatusWord::from_slice(&data)),
            Attempt::Failed(failure) => {
                debug!(failure = %failure, "Status read failed");
                Attempt::Failed(failure)
            }
        })
    }

    /// Byte-wise inequality of two snapshots.
    pub fn changed(a: &StatusWord, b: &StatusWord) -> bool {
        a.changed(b)
    }

    /// Force the active state and wait for it to settle.
    ///
    /// Idempotent, so it is safe to repeat as a recovery action.
    pub fn assert_active<T: ProbeTransport>(&self, transport: &T) -> Result<Attempt<()>, ProbeError> {
        let write = transport.control_write(
            self.force_active_request,
            self.force_active_value,
            0,
            self.timeout,
        );
        let attempt = triage(write, "force active")?;
        if attempt.is_done() {
            thread::sleep(self.active_settle);
        }
        Ok(attempt)
    }

    pub fn force_active_request(&self) -> u8 {
        self.force_active_request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::FORCE_ACTIVE_REQUEST_ALT;
    use crate::transport::mock::{MOCK_ACTIVE_STATUS, MOCK_IDLE_STATUS};
    use crate::transport::{MockFailure, MockTransport, TransportError};

    fn probe() -> StatusProbe {
        StatusProbe::from_config(&ProbeConfig::default().without_delays())
    }

    #[test]
    fn test_snapshot_and_assert_active() {
        let mock = MockTransport::new();
        let probe = probe();

        assert_eq!(probe.snapshot(&mock).unwrap(), Attempt::Done(MOCK_IDLE_STATUS));
        assert!(probe.assert_active(&mock).unwrap().is_done());
        assert_eq!(probe.snapshot(&mock).unwrap(), Attempt::Done(MOCK_ACTIVE_STATUS));
    }

    #[test]
    fn test_assert_active_is_idempotent() {
        let mock = MockTransport::new();
        let probe = probe();

        for _ in 0..3 {
            assert!(probe.assert_active(&mock).unwrap().is_done());
            assert_eq!(probe.snapshot(&mock).unwrap(), Attempt::Done(MOCK_ACTIVE_STATUS));
        }
    }

    #[test]
    fn test_alternate_force_active_request() {
        let mock = MockTransport::new();
        mock.set_force_active(FORCE_ACTIVE_REQUEST_ALT, 1);
        let config = ProbeConfig {
            force_active_request: FORCE_ACTIVE_REQUEST_ALT,
            ..ProbeConfig::default().without_delays()
        };
        let probe = StatusProbe::from_config(&config);

        probe.assert_active(&mock).unwrap();
        assert_eq!(mock.control_writes(), vec![(FORCE_ACTIVE_REQUEST_ALT, 1)]);
        assert_eq!(mock.status(), MOCK_ACTIVE_STATUS);
    }

    #[test]
    fn test_assert_active_failure_is_not_fatal() {
        let mock = MockTransport::new();
        let probe = probe();
        mock.fail_write(probe.force_active_request(), 1, MockFailure::Stall);

        assert!(!probe.assert_active(&mock).unwrap().is_done());
    }

    #[test]
    fn test_snapshot_disconnect_is_fatal() {
        let mock = MockTransport::new();
        mock.disconnect();
        assert!(matches!(
            probe().snapshot(&mock),
            Err(ProbeError::UnexpectedDisconnect { .. })
        ));
        // Sanity check the raw error too.
        assert!(matches!(
            mock.control_read(0x02, 0, 0, 8, Duration::ZERO),
            Err(TransportError::Disconnected)
        ));
    }
}
