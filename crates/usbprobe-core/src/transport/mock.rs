//! Mock USB transport for testing.
//!
//! Simulates a sensor with a status word, a force-active request, scripted
//! register/frame effects and injectable transfer failures. Every call is
//! recorded so tests can assert on ordering.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::traits::{ProbeTransport, TransportError};
use crate::protocol::StatusWord;
use crate::protocol::constants::{
    FORCE_ACTIVE_REQUEST, FORCE_ACTIVE_VALUE, SENSOR_PRODUCT_ID, SENSOR_VENDOR_ID, STATUS_REQUEST,
};

/// Status reported right after a reset.
pub const MOCK_IDLE_STATUS: StatusWord = StatusWord::new([0x01, 0, 0, 0, 0, 0, 0, 0]);
/// Status reported once the force-active write has been seen.
pub const MOCK_ACTIVE_STATUS: StatusWord = StatusWord::new([0x04, 0, 0, 0, 0, 0, 0, 0]);

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Reset,
    ControlWrite { request: u8, value: u16, index: u16 },
    ControlRead { request: u8, value: u16, index: u16, length: usize },
    BulkWrite { endpoint: u8, data: Vec<u8> },
    BulkRead { endpoint: u8, max_len: usize },
}

/// What the simulated device does in response to a write.
#[derive(Debug, Clone, Default)]
pub struct MockEffect {
    /// New status word after the write.
    pub status: Option<StatusWord>,
    /// Data queued on bulk IN after the write.
    pub bulk: Option<Vec<u8>>,
}

impl MockEffect {
    pub fn status(status: StatusWord) -> Self {
        Self {
            status: Some(status),
            bulk: None,
        }
    }

    pub fn bulk(data: &[u8]) -> Self {
        Self {
            status: None,
            bulk: Some(data.to_vec()),
        }
    }
}

/// Failure injected on a specific control write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Stall,
    Timeout,
    /// The write takes effect but its status stage times out.
    TimeoutAfterApply,
}

struct MockState {
    status: StatusWord,
    idle_status: StatusWord,
    active_status: StatusWord,
    force_active: (u8, u16),
    write_effects: HashMap<(u8, u16), MockEffect>,
    frame_effects: HashMap<Vec<u8>, MockEffect>,
    registers: HashMap<u8, Vec<u8>>,
    write_failures: HashMap<(u8, u16), MockFailure>,
    stalled_requests: HashSet<u8>,
    bulk_in: VecDeque<Vec<u8>>,
    connected: bool,
    calls: Vec<MockCall>,
}

impl MockState {
    fn apply(&mut self, effect: &MockEffect) {
        if let Some(status) = effect.status {
            self.status = status;
        }
        if let Some(data) = &effect.bulk {
            self.bulk_in.push_back(data.clone());
        }
    }
}

/// Mock transport for unit testing the explorers.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                status: MOCK_IDLE_STATUS,
                idle_status: MOCK_IDLE_STATUS,
                active_status: MOCK_ACTIVE_STATUS,
                force_active: (FORCE_ACTIVE_REQUEST, FORCE_ACTIVE_VALUE),
                write_effects: HashMap::new(),
                frame_effects: HashMap::new(),
                registers: HashMap::new(),
                write_failures: HashMap::new(),
                stalled_requests: HashSet::new(),
                bulk_in: VecDeque::new(),
                connected: true,
                calls: Vec::new(),
            })),
            vid: SENSOR_VENDOR_ID,
            pid: SENSOR_PRODUCT_ID,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the effect of a control write.
    pub fn on_write(&self, request: u8, value: u16, effect: MockEffect) {
        self.lock().write_effects.insert((request, value), effect);
    }

    /// Script the effect of a bulk OUT frame.
    pub fn on_frame(&self, frame: &[u8], effect: MockEffect) {
        self.lock().frame_effects.insert(frame.to_vec(), effect);
    }

    /// Make a register readable with a fixed value.
    pub fn set_register(&self, request: u8, data: &[u8]) {
        self.lock().registers.insert(request, data.to_vec());
    }

    /// Fail one specific control write.
    pub fn fail_write(&self, request: u8, value: u16, failure: MockFailure) {
        self.lock().write_failures.insert((request, value), failure);
    }

    /// Stall every control write to `request`.
    pub fn stall_request(&self, request: u8) {
        self.lock().stalled_requests.insert(request);
    }

    /// Use a different request as the force-active write.
    pub fn set_force_active(&self, request: u8, value: u16) {
        self.lock().force_active = (request, value);
    }

    /// Queue data on bulk IN.
    pub fn queue_bulk(&self, data: &[u8]) {
        self.lock().bulk_in.push_back(data.to_vec());
    }

    /// Overwrite the current status word.
    pub fn set_status(&self, status: StatusWord) {
        self.lock().status = status;
    }

    pub fn status(&self) -> StatusWord {
        self.lock().status
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Recorded control writes as (request, value) pairs.
    pub fn control_writes(&self) -> Vec<(u8, u16)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::ControlWrite { request, value, .. } => Some((*request, *value)),
                _ => None,
            })
            .collect()
    }

    /// Recorded bulk OUT payloads.
    pub fn bulk_writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::BulkWrite { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of resets seen.
    pub fn reset_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Reset))
            .count()
    }

    /// Clear recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.lock().connected = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeTransport for MockTransport {
    fn reset(&mut self, _settle: Duration) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Reset);
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        state.status = state.idle_status;
        state.bulk_in.clear();
        Ok(())
    }

    fn control_write(
        &self,
        request: u8,
        value: u16,
        index: u16,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::ControlWrite {
            request,
            value,
            index,
        });
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        let failure = state.write_failures.get(&(request, value)).copied();
        match failure {
            Some(MockFailure::Stall) => return Err(TransportError::Stall),
            Some(MockFailure::Timeout) => return Err(TransportError::timeout(timeout)),
            Some(MockFailure::TimeoutAfterApply) | None => {}
        }
        if state.stalled_requests.contains(&request) {
            return Err(TransportError::Stall);
        }
        if (request, value) == state.force_active {
            state.status = state.active_status;
        } else if let Some(effect) = state.write_effects.get(&(request, value)).cloned() {
            state.apply(&effect);
        }
        match failure {
            Some(MockFailure::TimeoutAfterApply) => Err(TransportError::timeout(timeout)),
            _ => Ok(()),
        }
    }

    fn control_read(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::ControlRead {
            request,
            value,
            index,
            length,
        });
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        let data = if request == STATUS_REQUEST {
            state.status.as_bytes().to_vec()
        } else {
            state
                .registers
                .get(&request)
                .cloned()
                .ok_or(TransportError::Stall)?
        };
        Ok(data.into_iter().take(length).collect())
    }

    fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::BulkWrite {
            endpoint,
            data: data.to_vec(),
        });
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if let Some(effect) = state.frame_effects.get(data).cloned() {
            state.apply(&effect);
        }
        Ok(data.len())
    }

    fn bulk_read(
        &self,
        endpoint: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::BulkRead { endpoint, max_len });
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        match state.bulk_in.pop_front() {
            Some(mut data) => {
                data.truncate(max_len);
                Ok(data)
            }
            None => Err(TransportError::timeout(timeout)),
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_force_active() {
        let mut mock = MockTransport::new();
        mock.reset(Duration::ZERO).unwrap();
        assert_eq!(mock.status(), MOCK_IDLE_STATUS);

        mock.control_write(FORCE_ACTIVE_REQUEST, FORCE_ACTIVE_VALUE, 0, T)
            .unwrap();
        let status = mock.control_read(STATUS_REQUEST, 0, 0, 8, T).unwrap();
        assert_eq!(StatusWord::from_slice(&status), MOCK_ACTIVE_STATUS);
    }

    #[test]
    fn test_mock_write_effect_queues_bulk() {
        let mock = MockTransport::new();
        mock.on_write(0x01, 0x40, MockEffect::bulk(&[1, 2, 3]));

        assert!(mock.bulk_read(0x83, 64, T).is_err());
        mock.control_write(0x01, 0x40, 0, T).unwrap();
        assert_eq!(mock.bulk_read(0x83, 64, T).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_mock_injected_failures() {
        let mock = MockTransport::new();
        mock.fail_write(0x10, 5, MockFailure::Timeout);
        mock.stall_request(0x20);

        assert!(matches!(
            mock.control_write(0x10, 5, 0, T),
            Err(TransportError::Timeout { timeout_ms: 10 })
        ));
        assert!(mock.control_write(0x10, 6, 0, T).is_ok());
        assert!(matches!(
            mock.control_write(0x20, 0, 0, T),
            Err(TransportError::Stall)
        ));
        assert!(matches!(
            mock.control_read(0x55, 0, 0, 2, T),
            Err(TransportError::Stall)
        ));
    }

    #[test]
    fn test_mock_write_applied_before_timeout() {
        let mock = MockTransport::new();
        mock.on_write(0x24, 1, MockEffect::bulk(&[7; 4]));
        mock.fail_write(0x24, 1, MockFailure::TimeoutAfterApply);

        assert!(matches!(
            mock.control_write(0x24, 1, 0, T),
            Err(TransportError::Timeout { .. })
        ));
        assert_eq!(mock.bulk_read(0x83, 64, T).unwrap(), vec![7; 4]);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        mock.disconnect();
        let err = mock.control_write(0x01, 0, 0, T).unwrap_err();
        assert!(err.is_fatal());

        mock.reconnect();
        assert!(mock.control_write(0x01, 0, 0, T).is_ok());
    }

    #[test]
    fn test_mock_call_log() {
        let mock = MockTransport::new();
        mock.control_write(0x01, 1, 0, T).unwrap();
        mock.bulk_write(0x02, &[0xAA; 16], T).unwrap();

        assert_eq!(mock.control_writes(), vec![(0x01, 1)]);
        assert_eq!(mock.bulk_writes(), vec![vec![0xAA; 16]]);
        assert_eq!(mock.calls().len(), 2);

        mock.clear_calls();
        assert!(mock.calls().is_empty());
    }
}
