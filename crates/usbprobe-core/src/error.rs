//! Error taxonomy for probing.
//!
//! Per-attempt transfer failures are carried as [`Attempt::Failed`] values and
//! consumed by the calling loop. Only [`ProbeError`] escapes a component.

use std::fmt;

use thiserror::Error;

use crate::protocol::CodecError;
use crate::transport::TransportError;

/// Errors that end a probing session.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Device disconnected during {during}")]
    UnexpectedDisconnect { during: String },

    #[error("Malformed candidate: {0}")]
    MalformedCandidate(#[from] CodecError),

    #[error("Transport setup failed: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for ProbeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::DeviceNotFound { vid, pid } => ProbeError::DeviceNotFound { vid, pid },
            TransportError::Disconnected => ProbeError::UnexpectedDisconnect {
                during: "setup".into(),
            },
            other => ProbeError::Transport(other),
        }
    }
}

/// A non-fatal transfer failure: the device rejected or ignored the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    Stall,
    Timeout { timeout_ms: u64 },
    Other(String),
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFailure::Stall => write!(f, "stall"),
            TransferFailure::Timeout { timeout_ms } => write!(f, "timeout after {timeout_ms}ms"),
            TransferFailure::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Outcome of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    Failed(TransferFailure),
}

impl<T> Attempt<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Attempt::Done(v) => Some(v),
            Attempt::Failed(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Attempt::Done(_))
    }
}

/// Split a transport result into a per-attempt outcome, escalating fatal errors.
///
/// `during` names the operation for the disconnect report.
pub fn triage<T>(result: Result<T, TransportError>, during: &str) -> Result<Attempt<T>, ProbeError> {
    match result {
        Ok(v) => Ok(Attempt::Done(v)),
        Err(err) if err.is_fatal() => Err(match err {
            TransportError::Disconnected => ProbeError::UnexpectedDisconnect {
                during: during.to_string(),
            },
            other => other.into(),
        }),
        Err(TransportError::Stall) => Ok(Attempt::Failed(TransferFailure::Stall)),
        Err(TransportError::Timeout { timeout_ms }) => {
            Ok(Attempt::Failed(TransferFailure::Timeout { timeout_ms }))
        }
        Err(other) => Ok(Attempt::Failed(TransferFailure::Other(other.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triage_absorbs_stall_and_timeout() {
        let stall: Result<(), _> = Err(TransportError::Stall);
        assert_eq!(
            triage(stall, "write").unwrap(),
            Attempt::Failed(TransferFailure::Stall)
        );

        let timeout: Result<(), _> = Err(TransportError::Timeout { timeout_ms: 100 });
        assert_eq!(
            triage(timeout, "write").unwrap(),
            Attempt::Failed(TransferFailure::Timeout { timeout_ms: 100 })
        );
    }

    #[test]
    fn test_triage_escalates_disconnect() {
        let gone: Result<(), _> = Err(TransportError::Disconnected);
        match triage(gone, "status read") {
            Err(ProbeError::UnexpectedDisconnect { during }) => assert_eq!(during, "status read"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_triage_escalates_every_fatal_error() {
        let missing: Result<(), _> = Err(TransportError::DeviceNotFound {
            vid: 0x2808,
            pid: 0x93A9,
        });
        assert!(matches!(
            triage(missing, "reset"),
            Err(ProbeError::DeviceNotFound {
                vid: 0x2808,
                pid: 0x93A9
            })
        ));

        let failures: [Result<(), TransportError>; 2] = [
            Err(TransportError::Stall),
            Err(TransportError::Timeout { timeout_ms: 5 }),
        ];
        for failure in failures {
            assert!(!failure.as_ref().unwrap_err().is_fatal());
            assert!(triage(failure, "write").is_ok());
        }
    }

    #[test]
    fn test_triage_passes_values() {
        assert_eq!(triage(Ok(7u8), "read").unwrap(), Attempt::Done(7));
    }
}
