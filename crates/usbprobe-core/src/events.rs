//! Event system for reporting findings.
//!
//! Explorers emit events; the console, a log file or a test decide what to
//! do with them.

use std::fmt;
use std::sync::Mutex;

use crate::error::TransferFailure;
use crate::explorer::Stimulus;
use crate::protocol::{RegisterAddress, StatusWord};

/// Probing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    Idle,
    ReadScan,
    WriteScan,
    SequenceScan,
    BulkFuzz,
    Watch,
    Complete,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbePhase::Idle => write!(f, "Idle"),
            ProbePhase::ReadScan => write!(f, "Read Scan"),
            ProbePhase::WriteScan => write!(f, "Write Scan"),
            ProbePhase::SequenceScan => write!(f, "Sequence Scan"),
            ProbePhase::BulkFuzz => write!(f, "Bulk Fuzz"),
            ProbePhase::Watch => write!(f, "Watch"),
            ProbePhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Structured record of one observed effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub stimulus: Stimulus,
    /// Status the observation was compared against.
    pub old: Option<StatusWord>,
    /// Status observed after the stimulus.
    pub new: Option<StatusWord>,
    /// Bytes received on bulk IN (0 for a pure status change).
    pub byte_count: usize,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stimulus)?;
        if let (Some(old), Some(new)) = (&self.old, &self.new) {
            write!(f, " status [{old}] -> [{new}]")?;
        }
        if self.byte_count > 0 {
            write!(f, " bulk {} bytes", self.byte_count)?;
        }
        Ok(())
    }
}

/// Events emitted during a probing session.
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    /// Device opened.
    DeviceOpened { vid: u16, pid: u16 },
    /// Phase changed.
    PhaseChanged { from: ProbePhase, to: ProbePhase },
    /// Fresh baseline captured after reset and active assertion.
    BaselineCaptured { epoch: u64, status: StatusWord },
    /// A register read returned an informative value.
    RegisterRead {
        address: RegisterAddress,
        data: Vec<u8>,
    },
    /// A watched register changed value.
    RegisterChanged {
        address: RegisterAddress,
        old: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    },
    /// Status word moved away from its reference.
    StatusChanged(Finding),
    /// Data arrived on bulk IN.
    BulkData {
        finding: Finding,
        preview: Vec<u8>,
    },
    /// Bulk data seen while polling, not tied to a stimulus.
    UnsolicitedBulk { byte_count: usize, preview: Vec<u8> },
    /// Active state was re-asserted after a divergence.
    Recovered {
        diverged: StatusWord,
        restored: Option<StatusWord>,
    },
    /// A transfer was rejected or timed out.
    TransferFailed {
        stimulus: Option<Stimulus>,
        failure: TransferFailure,
    },
    /// Progress update for the current phase.
    Progress {
        phase: ProbePhase,
        current: u64,
        total: u64,
    },
    /// Candidates exhausted without a bulk hit.
    Exhausted { phase: ProbePhase, attempts: u64 },
}

/// Observer trait for receiving probe events.
pub trait ProbeObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ProbeEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ProbeObserver for NullObserver {
    fn on_event(&self, _event: &ProbeEvent) {}
}

/// Observer that keeps every event in memory.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProbeEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Findings from status-change and bulk-data events, in order.
    pub fn findings(&self) -> Vec<Finding> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProbeEvent::StatusChanged(finding) => Some(finding),
                ProbeEvent::BulkData { finding, .. } => Some(finding),
                _ => None,
            })
            .collect()
    }
}

impl ProbeObserver for RecordingObserver {
    fn on_event(&self, event: &ProbeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ProbeObserver for TracingObserver {
    fn on_event(&self, event: &ProbeEvent) {
        match event {
            ProbeEvent::DeviceOpened { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device opened");
            }
            ProbeEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            ProbeEvent::BaselineCaptured { epoch, status } => {
                tracing::info!(epoch, status = %status, "Baseline captured");
            }
            ProbeEvent::RegisterRead { address, data } => {
                tracing::info!(register = %format!("0x{:02X}", address), data = ?data, "Readable register");
            }
            ProbeEvent::RegisterChanged { address, old, new } => {
                tracing::info!(register = %format!("0x{:02X}", address), old = ?old, new = ?new, "Register changed");
            }
            ProbeEvent::StatusChanged(finding) => {
                tracing::warn!("[!] {}", finding);
            }
            ProbeEvent::BulkData { finding, preview } => {
                tracing::warn!(preview = ?preview, "[!!!] {}", finding);
            }
            ProbeEvent::UnsolicitedBulk {
                byte_count,
                preview,
            } => {
                tracing::warn!(bytes = byte_count, preview = ?preview, "[!!!] Bulk data");
            }
            ProbeEvent::Recovered { diverged, restored } => match restored {
                Some(restored) => {
                    tracing::warn!(diverged = %diverged, restored = %restored, "Re-asserted active state")
                }
                None => tracing::warn!(diverged = %diverged, "Re-asserted active state, status unreadable"),
            },
            ProbeEvent::TransferFailed { stimulus, failure } => match stimulus {
                Some(stimulus) => tracing::debug!(stimulus = %stimulus, "Transfer failed: {}", failure),
                None => tracing::debug!("Transfer failed: {}", failure),
            },
            ProbeEvent::Progress {
                phase,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, progress = %format!("{}%", pct), "Progress");
            }
            ProbeEvent::Exhausted { phase, attempts } => {
                tracing::info!(phase = %phase, attempts, "Candidates exhausted");
            }
        }
    }
}
