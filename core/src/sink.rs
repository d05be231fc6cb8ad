//! Per-core output streams.
//!
//! Each logical core gets its own text stream. Every drained entry becomes
//! one line `"<id> <timestamp>"` in decimal, flushed as soon as it is
//! written so a crash never loses an entry that was already acknowledged
//! to the target.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::types::TraceEntry;

// ---------------------------------------------------------------------------
// EntrySink
// ---------------------------------------------------------------------------

/// Destination for drained trace entries.
pub trait EntrySink {
    /// Append one entry. Must be durable (flushed) when this returns `Ok`.
    fn append(&mut self, entry: &TraceEntry) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Output path for a core's stream: `<prefix>core<index>.txt`.
pub fn output_path(prefix: &str, index: usize) -> PathBuf {
    PathBuf::from(format!("{}core{}.txt", prefix, index))
}

// ---------------------------------------------------------------------------
// LineSink
// ---------------------------------------------------------------------------

/// Writes one decimal line per entry to any `Write`.
pub struct LineSink<W: Write> {
    writer: W,
    lines: u64,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        LineSink { writer, lines: 0 }
    }

    /// Lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl LineSink<File> {
    /// Open the stream file, truncating it unless `append` is set.
    pub fn create(path: &Path, append: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        Ok(LineSink::new(file))
    }
}

impl<W: Write> EntrySink for LineSink<W> {
    fn append(&mut self, entry: &TraceEntry) -> io::Result<()> {
        writeln!(self.writer, "{}", entry)?;
        self.writer.flush()?;
        self.lines += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Collects entries in memory. Used by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub entries: Vec<TraceEntry>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntrySink for MemorySink {
    fn append(&mut self, entry: &TraceEntry) -> io::Result<()> {
        self.entries.push(*entry);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
