//! Link monitoring — error classification and per-core health.
//!
//! The `classify` module turns a non-success reply plus the transport's
//! error info into a `Verdict`.
//! The `link` module owns each logical core's handle and drives the
//! disconnect → reconnect → connected state machine from those verdicts.

pub mod classify;
pub mod link;

pub use classify::{classify, FatalReason, Verdict};
pub use link::{CoreLink, CoreStats, LinkState};
