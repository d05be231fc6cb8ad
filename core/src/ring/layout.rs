//! Ring buffer geometry.
//!
//! ```text
//! base + read_index_offset   u16 read index   (host advances)
//! base + write_index_offset  u16 write index  (target advances)
//! base + entries_offset + k*entry_size                      u32 id
//! base + entries_offset + k*entry_size + timestamp_offset   u64 timestamp
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TraceError;

pub const DEFAULT_BUFFER_ADDRESS: u64 = 0xD000_0000;
pub const DEFAULT_CAPACITY: u32 = 1024;


// ---------------------------------------------------------------------------
// RingLayout
// ---------------------------------------------------------------------------

/// Offsets and sizes of the ring, relative to its base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingLayout {
    /// Number of entry slots.
    pub capacity: u32,
    pub read_index_offset: u64,
    pub write_index_offset: u64,
    /// Offset of slot 0.
    pub entries_offset: u64,
    pub entry_size: u64,
    /// Offset of the timestamp within a slot. The id is at offset 0.
    pub timestamp_offset: u64,
}

impl Default for RingLayout {
    fn default() -> Self {
        RingLayout {
            capacity: DEFAULT_CAPACITY,
            read_index_offset: 0,
            write_index_offset: 2,
            entries_offset: 4,
            entry_size: 12,
            timestamp_offset: 4,
        }
    }
}

impl RingLayout {
    /// Reject geometries the reader cannot traverse safely.
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.capacity == 0 {
            return Err(TraceError::Config("ring capacity must be at least 1".into()));
        }
        if self.capacity > u16::MAX as u32 + 1 {
            return Err(TraceError::Config(format!(
                "ring capacity {} exceeds the 16-bit index range",
                self.capacity
            )));
        }
        if self.timestamp_offset < 4 {
            return Err(TraceError::Config(format!(
                "timestamp offset {} overlaps the 4-byte id",
                self.timestamp_offset
            )));
        }
        if self.entry_size < self.timestamp_offset + 8 {
            return Err(TraceError::Config(format!(
                "entry size {} cannot hold a timestamp at offset {}",
                self.entry_size, self.timestamp_offset
            )));
        }
        if overlaps(self.read_index_offset, 2, self.write_index_offset, 2) {
            return Err(TraceError::Config("read and write index words overlap".into()));
        }
        let entries_len = self.entry_size * self.capacity as u64;
        for (name, offset) in [
            ("read", self.read_index_offset),
            ("write", self.write_index_offset),
        ] {
            if overlaps(offset, 2, self.entries_offset, entries_len) {
                return Err(TraceError::Config(format!(
                    "{} index word overlaps the entry array",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Total bytes spanned by the index words and entry array.
    pub fn footprint(&self) -> u64 {
        let entries_end = self.entries_offset + self.entry_size * self.capacity as u64;
        entries_end
            .max(self.read_index_offset + 2)
            .max(self.write_index_offset + 2)
    }
}

fn overlaps(a: u64, a_len: u64, b: u64, b_len: u64) -> bool {
    a < b + b_len && b < a + a_len
}


// ---------------------------------------------------------------------------
// RingDescriptor
// ---------------------------------------------------------------------------

/// A ring at a concrete base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingDescriptor {
    pub base: u64,
    pub layout: RingLayout,
}

impl RingDescriptor {
    pub fn new(base: u64, layout: RingLayout) -> Self {
        RingDescriptor { base, layout }
    }

    pub fn capacity(&self) -> u32 {
        self.layout.capacity
    }

    pub fn read_index_addr(&self) -> u64 {
        self.base + self.layout.read_index_offset
    }

    pub fn write_index_addr(&self) -> u64 {
        self.base + self.layout.write_index_offset
    }

    pub fn slot_addr(&self, slot: u32) -> u64 {
        self.base + self.layout.entries_offset + slot as u64 * self.layout.entry_size
    }

    pub fn id_addr(&self, slot: u32) -> u64 {
        self.slot_addr(slot)
    }

    pub fn timestamp_addr(&self, slot: u32) -> u64 {
        self.slot_addr(slot) + self.layout.timestamp_offset
    }

    /// Whether an index word read from the target is a valid slot number.
    pub fn in_range(&self, index: u16) -> bool {
        (index as u32) < self.layout.capacity
    }
}

impl Default for RingDescriptor {
    fn default() -> Self {
        RingDescriptor::new(DEFAULT_BUFFER_ADDRESS, RingLayout::default())
    }
}
