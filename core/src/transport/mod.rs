//! Debug transport boundary.
//!
//! Provides the `DebugTransport` trait and implementations for a scripted
//! mock (testing) and a simulated multi-core target (demo runs). The trait is
//! the only way the rest of the crate touches a target; it knows nothing of
//! the underlying probe protocol or driver.

pub mod mock;
pub mod sim;

use bitflags::bitflags;

use crate::types::{CoreConnInfo, CoreHandle, CoreState, RegisterInfo};


// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Outcome of a single transport call.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// The call completed.
    Done(T),
    /// The call completed, but the transport has event notifications pending.
    /// Details are available via `DebugTransport::error_info`.
    Event(T),
    /// The call failed. Details are available via `DebugTransport::error_info`.
    Error,
}

impl<T> Reply<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Reply::Done(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error)
    }

    /// The carried value, if the call completed.
    pub fn value(self) -> Option<T> {
        match self {
            Reply::Done(v) | Reply::Event(v) => Some(v),
            Reply::Error => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Reply<U> {
        match self {
            Reply::Done(v) => Reply::Done(f(v)),
            Reply::Event(v) => Reply::Event(f(v)),
            Reply::Error => Reply::Error,
        }
    }

    /// The reply's status with the value stripped.
    pub fn status(&self) -> Reply<()> {
        match self {
            Reply::Done(_) => Reply::Done(()),
            Reply::Event(_) => Reply::Event(()),
            Reply::Error => Reply::Error,
        }
    }
}


// ---------------------------------------------------------------------------
// Error info
// ---------------------------------------------------------------------------

bitflags! {
    /// Informational target events reported alongside a reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        const RESET = 0x1;
        const POWER_DOWN = 0x2;
        const HW_FAILURE = 0x4;
    }
}

impl EventFlags {
    /// Bits set outside the known flags.
    pub fn unknown_bits(&self) -> u32 {
        self.bits() & !EventFlags::all().bits()
    }
}

/// Error code of the last failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    /// The physical or logical link to the target was lost
    /// (e.g. the probe was unplugged).
    Connection,
    /// Any other transport-specific code.
    Other(u32),
}

/// Structured error information queried after a non-`Done` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub events: EventFlags,
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn none() -> Self {
        ErrorInfo {
            events: EventFlags::empty(),
            code: ErrorCode::None,
            message: String::new(),
        }
    }

    pub fn error(code: ErrorCode, message: &str) -> Self {
        ErrorInfo {
            events: EventFlags::empty(),
            code,
            message: message.to_string(),
        }
    }

    /// Build from raw event bits, keeping any unknown bits.
    pub fn events(bits: u32) -> Self {
        ErrorInfo {
            events: EventFlags::from_bits_retain(bits),
            code: ErrorCode::None,
            message: String::new(),
        }
    }

    pub fn with_events(mut self, bits: u32) -> Self {
        self.events = EventFlags::from_bits_retain(bits);
        self
    }
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self::none()
    }
}


// ---------------------------------------------------------------------------
// DebugTransport
// ---------------------------------------------------------------------------

/// Addressable access to the memory and lifecycle of target cores.
///
/// Calls are blocking and the transport is assumed non-reentrant; callers
/// use it from a single thread, one call at a time.
pub trait DebugTransport {
    /// List the cores of device `device` in the first system on `host`.
    fn query_cores(&mut self, host: &str, device: u32) -> Reply<Vec<CoreConnInfo>>;

    fn open_core(&mut self, info: &CoreConnInfo) -> Reply<CoreHandle>;

    fn close_core(&mut self, core: CoreHandle) -> Reply<()>;

    fn query_state(&mut self, core: CoreHandle) -> Reply<CoreState>;

    /// Error details for the last failed call, scoped to `core`, or to the
    /// transport globally when no handle exists.
    fn error_info(&mut self, core: Option<CoreHandle>) -> ErrorInfo;

    fn register_map(&mut self, core: CoreHandle, group_id: u32) -> Reply<Vec<RegisterInfo>>;

    fn read16(&mut self, core: CoreHandle, address: u64) -> Reply<u16>;

    fn read32(&mut self, core: CoreHandle, address: u64) -> Reply<u32>;

    fn read64(&mut self, core: CoreHandle, address: u64) -> Reply<u64>;

    fn write16(&mut self, core: CoreHandle, address: u64, value: u16) -> Reply<()>;
}
