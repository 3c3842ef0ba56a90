//! usbprobe-core: black-box probing of an undocumented USB fingerprint sensor.
//!
//! The crate drives a vendor-specific device through its control and bulk
//! endpoints and infers its state machine from status-word deltas, looking
//! for the stimulus that makes it stream data on bulk IN.
//!
//! # Architecture
//!
//! - **Protocol**: Constants, status word, bulk frame checksums
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Explorer**: The shared trial loop, with recovery and effect detection
//! - **Scanners**: Register read/write scans, sequences, bulk fuzzing, watch
//! - **Events**: Observer pattern for reporting findings
//! - **Session**: Owns the device and runs phases one after another
//!
//! # Example
//!
//! ```no_run
//! use usbprobe_core::{ProbeConfig, ProbeSession, WritePlan};
//!
//! let mut session = ProbeSession::open(ProbeConfig::default())?;
//! let report = session.write_scan(&WritePlan::targeted(&[0x01, 0x0C, 0x24]))?;
//! println!("{} findings", report.findings.len());
//! # Ok::<(), usbprobe_core::ProbeError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod explorer;
pub mod fuzzer;
pub mod probe;
pub mod protocol;
pub mod recovery;
pub mod scanner;
pub mod sequence;
pub mod session;
pub mod transport;
pub mod watch;

// Re-exports for convenience
pub use config::{ProbeConfig, SequenceSpec};
pub use context::{ProbeContext, ProbeStats, Reference};
pub use error::{Attempt, ProbeError, TransferFailure};
pub use events::{
    Finding, NullObserver, ProbeEvent, ProbeObserver, ProbePhase, RecordingObserver,
    TracingObserver,
};
pub use explorer::{Detection, ExploreOutcome, Explorer, HaltOn, ProbeResult, Stimulus, Strategy};
pub use fuzzer::{BulkFuzzer, FuzzOutcome};
pub use probe::StatusProbe;
pub use protocol::{BulkPayload, FrameVariant, StatusWord};
pub use recovery::{RecoveryPolicy, SessionRecovery};
pub use scanner::{RegisterReading, RegisterScanner, WritePlan, WriteScanReport};
pub use sequence::{Sequence, SequenceExplorer, SequenceOutcome};
pub use session::ProbeSession;
pub use transport::{MockTransport, NusbTransport, ProbeTransport, TransportError};
pub use watch::{RegisterWatch, WatchPlan, WatchReport};
