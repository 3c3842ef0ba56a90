//! Wire-level constants for the probed sensor.
//!
//! Only two control requests have a confirmed meaning: the status read and
//! the "force active" write. Every other request code is treated as opaque.

// ============================================================================
// Device Identification
// ============================================================================

/// Sensor vendor ID.
pub const SENSOR_VENDOR_ID: u16 = 0x2808;
/// Sensor product ID.
pub const SENSOR_PRODUCT_ID: u16 = 0x93A9;
/// The only interface the sensor exposes.
pub const SENSOR_INTERFACE: u8 = 0;
/// Configuration selected after every bus reset.
pub const SENSOR_CONFIGURATION: u8 = 1;

// ============================================================================
// Control Surface
// ============================================================================

/// bmRequestType for vendor writes (host -> device, vendor, device recipient).
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;
/// bmRequestType for vendor reads (device -> host, vendor, device recipient).
pub const REQUEST_TYPE_VENDOR_IN: u8 = 0xC0;

/// Control read returning the 8-byte status word.
pub const STATUS_REQUEST: u8 = 0x02;
/// Length of the status word.
pub const STATUS_LEN: usize = 8;

/// Control write forcing the device into its active state.
pub const FORCE_ACTIVE_REQUEST: u8 = 0x36;
/// Alternate force-active request seen in some captures.
pub const FORCE_ACTIVE_REQUEST_ALT: u8 = 0x57;
/// wValue carried by the force-active write.
pub const FORCE_ACTIVE_VALUE: u16 = 1;

/// Length of a register read during the read scan.
pub const REGISTER_READ_LEN: usize = 2;

// ============================================================================
// Bulk Endpoints
// ============================================================================

/// Bulk OUT endpoint (host -> device command frames).
pub const BULK_OUT_ENDPOINT: u8 = 0x02;
/// Bulk IN endpoint (device -> host sensor output).
pub const BULK_IN_ENDPOINT: u8 = 0x83;

/// Every bulk OUT frame is exactly this long.
pub const FRAME_LEN: usize = 16;
/// Default request size when polling bulk IN.
pub const BULK_READ_LEN: usize = 16384;

// ============================================================================
// Timing (milliseconds)
// ============================================================================

pub const CONTROL_TIMEOUT_MS: u64 = 100;
pub const BULK_WRITE_TIMEOUT_MS: u64 = 100;
pub const BULK_READ_TIMEOUT_MS: u64 = 50;

/// Settle time between bus reset and configuration selection.
pub const RESET_SETTLE_MS: u64 = 500;
/// Settle time after the force-active write.
pub const ACTIVE_SETTLE_MS: u64 = 100;
/// Settle time after each sequence step.
pub const STEP_SETTLE_MS: u64 = 50;
/// Settle time after a recovery write.
pub const RECOVERY_SETTLE_MS: u64 = 10;
/// Courtesy delay between fuzzer attempts.
pub const FUZZ_INTERVAL_MS: u64 = 10;
