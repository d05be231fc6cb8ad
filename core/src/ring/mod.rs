//! Single-producer/single-consumer trace ring in target memory.
//!
//! The `layout` module describes where the index words and entry slots live.
//! The `reader` module drains newly produced entries, in production order,
//! and hands the consumed slots back to the target.

pub mod layout;
pub mod reader;

pub use layout::{RingDescriptor, RingLayout};
pub use reader::{drain, pending_slots, DrainOutcome, DrainReport};
