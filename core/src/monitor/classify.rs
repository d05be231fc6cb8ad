//! Error classifier — interprets a failed or eventful transport reply.
//!
//! Combines the reply status with the structured error info the transport
//! reports and produces a `Verdict` the link monitor acts on: continue,
//! drop the handle and reconnect later, keep the handle, or abort.

use crate::transport::{ErrorCode, ErrorInfo, EventFlags, Reply};

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// What a reply means for the core it was issued against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The call succeeded.
    NoError,
    /// The call completed; only event notifications were pending.
    Event(EventFlags),
    /// The link to the target was lost. The handle must be discarded and
    /// reconnection attempted on a later round.
    ConnectionLost { message: String },
    /// A handle error unrelated to link loss. The handle is kept.
    HandleError { code: ErrorCode, message: String },
    /// The transport is in an undefined state; the process must stop.
    Fatal(FatalReason),
}

/// Why a verdict is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    /// Event bits outside `EventFlags::all()` were set.
    UnrecognizedEvent(u32),
    /// An error reply came without an error message.
    EmptyErrorMessage,
}

impl Verdict {
    /// Whether the caller may use the reply's value and carry on.
    pub fn allows_continue(&self) -> bool {
        matches!(self, Verdict::NoError | Verdict::Event(_))
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a reply status against the error info queried for it.
///
/// # Logic
///
/// - Unknown event bits -> `Fatal`, whatever the status
/// - `Done` -> `NoError`
/// - `Event` -> `Event(flags)`
/// - `Error` with an empty message -> `Fatal`
/// - `Error` with `ErrorCode::Connection` -> `ConnectionLost`
/// - any other `Error` -> `HandleError`
pub fn classify(status: &Reply<()>, info: &ErrorInfo) -> Verdict {
    let unknown = info.events.unknown_bits();
    if unknown != 0 {
        return Verdict::Fatal(FatalReason::UnrecognizedEvent(unknown));
    }

    match status {
        Reply::Done(()) => Verdict::NoError,
        Reply::Event(()) => Verdict::Event(info.events),
        Reply::Error => {
            if info.message.is_empty() {
                Verdict::Fatal(FatalReason::EmptyErrorMessage)
            } else if info.code == ErrorCode::Connection {
                Verdict::ConnectionLost {
                    message: info.message.clone(),
                }
            } else {
                Verdict::HandleError {
                    code: info.code,
                    message: info.message.clone(),
                }
            }
        }
    }
}

/// Operator notices for each known event flag that is set.
pub fn event_notices(events: EventFlags) -> Vec<&'static str> {
    let mut notices = Vec::new();
    if events.contains(EventFlags::RESET) {
        notices.push("target has been reset");
    }
    if events.contains(EventFlags::POWER_DOWN) {
        notices.push("target has been powered down");
    }
    if events.contains(EventFlags::HW_FAILURE) {
        notices.push("target hardware failure");
    }
    notices
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
