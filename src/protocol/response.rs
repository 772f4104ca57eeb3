//! Command response correlation.
//!
//! Response frame layout:
//! - Byte 0: bits 6-7 status (`10` ok, `11` error), bits 0-5 echo of the
//!   command's byte 0
//! - Byte 1: echo of the command's byte 1
//! - Byte 2: length of the reason code (1 or 2)
//! - Bytes 3-4: reason code, big-endian

use std::fmt;
use tracing::warn;

use crate::error::{Error, Result};

const STATUS_MASK: u8 = 0xC0;
const STATUS_OK: u8 = 0x80;
const ECHO_MASK: u8 = 0x3F;

/// Reason code reported for an accepted command.
pub const REASON_OK: u16 = 0x20;
/// Reason code reported for a cancelled brew.
pub const REASON_CANCELLED: u16 = 0x21;
/// Reason code reported when no capsule is inserted.
pub const REASON_NO_CAPSULE: u16 = 0x2412;
/// Reason code reported when the tray is open.
pub const REASON_TRAY_OPEN: u16 = 0x2408;
/// Reason code reported for a malformed command.
pub const REASON_COMMAND_ERROR: u16 = 0x3603;

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseOutcome {
    /// The machine accepted the command.
    Success,
    /// The machine answered the command with an error.
    Failed,
    /// The frame answers some other command.
    Mismatch,
}

/// Human-readable reason decoded from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseReason {
    /// Command accepted.
    Ok,
    /// Brew cancelled.
    Cancelled,
    /// No capsule inserted.
    NoCapsule,
    /// Tray open.
    TrayOpen,
    /// Command error.
    CommandError,
    /// Reason code outside the known table, or an unreadable frame.
    Unknown,
    /// The frame carries no reason code.
    NoCode,
    /// The frame does not correlate with the sent command.
    WrongPacket,
}

impl ResponseReason {
    /// Map a reason code to its meaning.
    pub fn from_code(code: u16) -> Self {
        match code {
            REASON_OK => Self::Ok,
            REASON_CANCELLED => Self::Cancelled,
            REASON_NO_CAPSULE => Self::NoCapsule,
            REASON_TRAY_OPEN => Self::TrayOpen,
            REASON_COMMAND_ERROR => Self::CommandError,
            _ => Self::Unknown,
        }
    }

    /// The machine refused the command for this reason.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::NoCapsule | Self::TrayOpen | Self::CommandError)
    }
}

impl fmt::Display for ResponseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "Ok",
            Self::Cancelled => "Brew cancelled",
            Self::NoCapsule => "No capsule inserted",
            Self::TrayOpen => "Tray open",
            Self::CommandError => "Command error",
            Self::Unknown => "Unknown error",
            Self::NoCode => "Unknown command",
            Self::WrongPacket => "Received wrong response packet",
        };
        f.write_str(text)
    }
}

/// A response frame correlated with the command that was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    /// How the command ended.
    pub outcome: ResponseOutcome,
    /// Why.
    pub reason: ResponseReason,
    /// The raw reason code, if the frame carried one.
    pub code: Option<u16>,
    /// The command frame.
    pub sent: Vec<u8>,
    /// The response frame.
    pub received: Vec<u8>,
}

impl ResponseStatus {
    /// The machine accepted the command.
    pub fn is_success(&self) -> bool {
        self.outcome == ResponseOutcome::Success
    }

    /// The frame answers some other command.
    pub fn is_mismatch(&self) -> bool {
        self.outcome == ResponseOutcome::Mismatch
    }

    /// Turn a mismatched frame into [`Error::ResponseMismatch`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_mismatch() {
            return Err(Error::ResponseMismatch {
                sent: self.sent,
                received: self.received,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?}: {} ({:#06x})", self.outcome, self.reason, code),
            None => write!(f, "{:?}: {}", self.outcome, self.reason),
        }
    }
}

/// Extract the reason code, either one byte or two bytes big-endian.
fn reason_code(received: &[u8]) -> Option<std::result::Result<u16, ()>> {
    match received.get(2) {
        Some(1) => Some(received.get(3).map(|b| u16::from(*b)).ok_or(())),
        Some(2) => Some(match (received.get(3), received.get(4)) {
            (Some(hi), Some(lo)) => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(()),
        }),
        _ => None,
    }
}

/// Correlate a response frame with the command that was sent.
///
/// The command succeeded when the frame echoes the command and its status
/// bits are `10`. A known error reason (no capsule, tray open, command
/// error) overrides `10` status bits. Status bits that disagree with the
/// reason are logged.
pub fn validate(sent: &[u8], received: &[u8]) -> ResponseStatus {
    let status = |outcome, reason, code| ResponseStatus {
        outcome,
        reason,
        code,
        sent: sent.to_vec(),
        received: received.to_vec(),
    };

    if sent.len() < 2 || received.len() < 2 {
        return status(ResponseOutcome::Failed, ResponseReason::Unknown, None);
    }

    if sent[0] != (received[0] & ECHO_MASK) || sent[1] != received[1] {
        return status(ResponseOutcome::Mismatch, ResponseReason::WrongPacket, None);
    }

    let status_ok = received[0] & STATUS_MASK == STATUS_OK;

    match reason_code(received) {
        None => {
            let outcome = if status_ok {
                ResponseOutcome::Success
            } else {
                ResponseOutcome::Failed
            };
            status(outcome, ResponseReason::NoCode, None)
        }
        Some(Err(())) => status(ResponseOutcome::Failed, ResponseReason::Unknown, None),
        Some(Ok(code)) => {
            let reason = ResponseReason::from_code(code);
            let inconsistent = (status_ok && reason.is_error())
                || (!status_ok && reason == ResponseReason::Ok);
            if inconsistent {
                warn!(
                    "Inconsistent response {:02X?}: status bits {:#04x} with reason {} ({:#06x})",
                    received,
                    received[0] & STATUS_MASK,
                    reason,
                    code
                );
            }
            let outcome = if status_ok && !reason.is_error() {
                ResponseOutcome::Success
            } else {
                ResponseOutcome::Failed
            };
            status(outcome, reason, Some(code))
        }
    }
}
