//! USB Transport layer abstraction.
//!
//! Defines the `ProbeTransport` trait: the raw control and bulk primitives
//! every explorer drives, allowing different implementations (nusb, mock).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Bus reset failed: {0}")]
    ResetFailed(String),

    #[error("Transfer stalled")]
    Stall,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Fatal errors end the session; everything else is a per-attempt failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::DeviceNotFound { .. } | TransportError::Disconnected
        )
    }

    pub(crate) fn timeout(timeout: Duration) -> Self {
        TransportError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Raw transfer primitives over one exclusively owned device handle.
///
/// Every call is blocking and bounded by the caller's timeout. Stalls and
/// timeouts come back as errors; the caller decides whether to continue.
pub trait ProbeTransport: Send + Sync {
    /// Bus reset, wait `settle`, then select the configuration again.
    fn reset(&mut self, settle: Duration) -> Result<(), TransportError>;

    /// Vendor control write (bmRequestType 0x40) with no data stage.
    fn control_write(
        &self,
        request: u8,
        value: u16,
        index: u16,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Vendor control read (bmRequestType 0xC0).
    fn control_read(
        &self,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Write one buffer to a bulk OUT endpoint.
    fn bulk_write(&self, endpoint: u8, data: &[u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes from a bulk IN endpoint.
    ///
    /// An empty vector means the device answered with a zero-length packet.
    fn bulk_read(
        &self,
        endpoint: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Get the VID of the open device.
    fn vendor_id(&self) -> u16;

    /// Get the PID of the open device.
    fn product_id(&self) -> u16;
}
