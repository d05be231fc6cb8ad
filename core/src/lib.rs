//! Ring-buffer trace collection over a debug transport.
//!
//! Polls a single-producer/single-consumer ring buffer in the memory of one
//! or more target cores, writes each drained `(id, timestamp)` entry to a
//! per-core output stream, and reconnects cores whose debug link drops.
//!
//! Entry points: `setup::attach` opens the cores, `setup::open_outputs`
//! pairs them with sinks, and `scheduler::PollScheduler` runs the loop.

pub mod config;
pub mod error;
pub mod monitor;
pub mod ring;
pub mod scheduler;
pub mod setup;
pub mod sink;
pub mod transport;
pub mod types;

pub use config::TraceConfig;
pub use error::TraceError;
pub use scheduler::{Interruptor, PollScheduler};
