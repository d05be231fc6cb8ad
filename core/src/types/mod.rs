//! Plain data types shared by the transport, ring reader, and scheduler.

pub mod entry;
pub mod target;

pub use entry::TraceEntry;
pub use target::{CoreConnInfo, CoreHandle, CoreState, RegisterInfo};
