//! Per-core link state.
//!
//! `CoreLink` holds everything the scheduler keeps about one logical core:
//! its immutable connection info, the current handle (absent while
//! disconnected), the instruction-pointer register resolved at startup, and
//! running statistics. Every non-success transport reply for the core is
//! routed through `CoreLink::handle_fault`, which logs, classifies, and
//! drops the handle on link loss.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::TraceError;
use crate::monitor::classify::{classify, event_notices, FatalReason, Verdict};
use crate::transport::{DebugTransport, Reply};
use crate::types::{CoreConnInfo, CoreHandle, CoreState, RegisterInfo};


// ---------------------------------------------------------------------------
// LinkState
// ---------------------------------------------------------------------------

/// Connection state of a logical core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No valid handle. Reconnection is attempted on the next visit.
    Disconnected,
    /// A reopen is in progress during the current visit.
    Reconnecting,
    /// A valid handle is held.
    Connected,
}


// ---------------------------------------------------------------------------
// CoreStats
// ---------------------------------------------------------------------------

/// Running counters for one logical core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStats {
    /// Scheduler visits.
    pub rounds: u64,
    /// Entries written to the core's output stream.
    pub entries: u64,
    /// Successful reopens after a link loss.
    pub reconnects: u64,
    /// Link losses that cost an open handle.
    pub link_losses: u64,
    /// Reopen attempts that failed while the core was already down.
    pub reconnect_failures: u64,
    /// Handle errors unrelated to link loss.
    pub handle_errors: u64,
    /// Replies that carried event notifications.
    pub events: u64,
    pub aborted_drains: u64,
    /// Instruction pointer seen by the most recent liveness probe.
    pub last_ip: Option<u32>,
}


// ---------------------------------------------------------------------------
// CoreLink
// ---------------------------------------------------------------------------

/// Runtime state of one logical core.
#[derive(Debug)]
pub struct CoreLink {
    info: CoreConnInfo,
    handle: Option<CoreHandle>,
    state: LinkState,
    core_state: CoreState,
    ip_register: RegisterInfo,
    stats: CoreStats,
}

impl CoreLink {
    /// A link for a core that has just been opened successfully.
    pub fn new(info: CoreConnInfo, handle: CoreHandle, ip_register: RegisterInfo) -> Self {
        CoreLink {
            info,
            handle: Some(handle),
            state: LinkState::Connected,
            core_state: CoreState::Unknown,
            ip_register,
            stats: CoreStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.core
    }

    pub fn info(&self) -> &CoreConnInfo {
        &self.info
    }

    pub fn handle(&self) -> Option<CoreHandle> {
        self.handle
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Last execution state reported by the core.
    pub fn core_state(&self) -> CoreState {
        self.core_state
    }

    pub fn ip_register(&self) -> &RegisterInfo {
        &self.ip_register
    }

    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut CoreStats {
        &mut self.stats
    }

    /// Health check run once per scheduler visit.
    ///
    /// Reopens the core if it is disconnected, then probes the link by
    /// querying the execution state and reading the instruction pointer.
    /// Returns the state the core is left in.
    pub fn check_status(&mut self, transport: &mut dyn DebugTransport) -> Result<LinkState, TraceError> {
        if self.handle.is_none() {
            self.reconnect(transport)?;
        }
        let Some(handle) = self.handle else {
            return Ok(self.state);
        };

        match transport.query_state(handle) {
            // Report the failure once; probing the IP would only repeat it.
            Reply::Error => {
                self.handle_fault(transport, Reply::Error)?;
            }
            reply => {
                if let Some(state) = self.guard(transport, reply)? {
                    self.core_state = state;
                }
                let reply = self.read_ip(transport, handle)?;
                if let Some(ip) = self.guard(transport, reply)? {
                    self.stats.last_ip = Some(ip);
                }
            }
        }
        Ok(self.state)
    }

    /// Route a reply through classification.
    ///
    /// Returns the value when the caller may continue, `None` when the call
    /// failed, and `Err` when the failure is fatal for the process.
    pub fn guard<T>(
        &mut self,
        transport: &mut dyn DebugTransport,
        reply: Reply<T>,
    ) -> Result<Option<T>, TraceError> {
        match reply {
            Reply::Done(value) => Ok(Some(value)),
            Reply::Event(value) => {
                self.handle_fault(transport, Reply::Event(()))?;
                Ok(Some(value))
            }
            Reply::Error => {
                self.handle_fault(transport, Reply::Error)?;
                Ok(None)
            }
        }
    }

    /// Query error info for a non-`Done` reply, log it, and act on it.
    pub fn handle_fault(
        &mut self,
        transport: &mut dyn DebugTransport,
        status: Reply<()>,
    ) -> Result<Verdict, TraceError> {
        let err_info = transport.error_info(self.handle);

        for notice in event_notices(err_info.events) {
            warn!(core = %self.name(), "EVENT: {}", notice);
        }
        if !err_info.events.is_empty() {
            self.stats.events += 1;
        }

        let verdict = classify(&status, &err_info);
        match &verdict {
            Verdict::NoError | Verdict::Event(_) => {}
            Verdict::ConnectionLost { message } => {
                error!(core = %self.name(), "ERROR: {}", message);
                if self.handle.is_some() {
                    self.stats.link_losses += 1;
                    self.drop_handle(transport);
                } else {
                    self.stats.reconnect_failures += 1;
                }
            }
            Verdict::HandleError { code, message } => {
                error!(core = %self.name(), code = ?code, "ERROR: {}", message);
                self.stats.handle_errors += 1;
            }
            Verdict::Fatal(FatalReason::UnrecognizedEvent(bits)) => {
                error!(core = %self.name(), bits = *bits, "EVENT: unknown event");
                return Err(TraceError::UnrecognizedEvent {
                    core: self.name().to_string(),
                    bits: *bits,
                });
            }
            Verdict::Fatal(FatalReason::EmptyErrorMessage) => {
                return Err(TraceError::Protocol(format!(
                    "error reply without a message on {}",
                    self.name()
                )));
            }
        }
        Ok(verdict)
    }

    /// Close the handle if one is open. Used at shutdown.
    pub fn close(&mut self, transport: &mut dyn DebugTransport) {
        if let Some(handle) = self.handle.take() {
            if transport.close_core(handle).is_error() {
                let err_info = transport.error_info(Some(handle));
                warn!(core = %self.name(), "failed to close core: {}", err_info.message);
            }
        }
        self.state = LinkState::Disconnected;
    }

    fn reconnect(&mut self, transport: &mut dyn DebugTransport) -> Result<(), TraceError> {
        self.state = LinkState::Reconnecting;
        match transport.open_core(&self.info) {
            Reply::Error => {
                // No handle yet, so error info is queried globally.
                self.handle_fault(transport, Reply::Error)?;
                self.state = LinkState::Disconnected;
            }
            reply => {
                let had_event = !reply.is_done();
                self.handle = reply.value();
                self.state = LinkState::Connected;
                self.stats.reconnects += 1;
                info!(core = %self.name(), "core successfully reconnected");
                if had_event {
                    self.handle_fault(transport, Reply::Event(()))?;
                }
            }
        }
        Ok(())
    }

    fn read_ip(
        &self,
        transport: &mut dyn DebugTransport,
        handle: CoreHandle,
    ) -> Result<Reply<u32>, TraceError> {
        let address = self.ip_register.address;
        match self.ip_register.width_bits {
            32 => Ok(transport.read32(handle, address)),
            16 => Ok(transport.read16(handle, address).map(u32::from)),
            width => Err(TraceError::Protocol(format!(
                "instruction pointer register {} has unsupported width {}",
                self.ip_register.name, width
            ))),
        }
    }

    fn drop_handle(&mut self, transport: &mut dyn DebugTransport) {
        if let Some(handle) = self.handle.take() {
            // The link is gone; a failing close is expected and not reported.
            if transport.close_core(handle).is_error() {
                debug!(core = %self.name(), handle = %handle, "close after link loss failed");
            }
        }
        self.state = LinkState::Disconnected;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
