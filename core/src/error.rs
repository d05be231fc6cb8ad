use std::io;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Trace errors
// ---------------------------------------------------------------------------

/// Process-fatal failures.
///
/// Recoverable conditions (event notifications, link loss, handle errors
/// unrelated to link loss) are not errors; see `monitor::classify::Verdict`.
#[derive(Debug, Error)]
pub enum TraceError {
    /// One-time initialization failed before polling started.
    #[error("setup failed: {0}")]
    Setup(String),

    /// The transport reported event bits outside the known set.
    #[error("unrecognized transport event flags {bits:#x} on {core}")]
    UnrecognizedEvent { core: String, bits: u32 },

    /// The transport broke its own contract.
    #[error("transport contract violation: {0}")]
    Protocol(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Writing to a core's output stream failed.
    #[error("cannot write trace output for {core}: {source}")]
    Sink {
        core: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TraceError {
    /// Whether this error happened before the polling loop started.
    pub fn is_setup(&self) -> bool {
        matches!(self, TraceError::Setup(_) | TraceError::Config(_))
    }
}
