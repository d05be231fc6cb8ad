//! Ring buffer reader: drains newly produced entries from one core.
//!
//! The producer (target firmware) advances the write index; the host only
//! ever advances the read index. The two never synchronize beyond those two
//! words, so each poll works from a snapshot of both indices and hands all
//! drained slots back with a single write of the read index.

use tracing::{debug, warn};

use crate::error::TraceError;
use crate::monitor::link::CoreLink;
use crate::ring::layout::RingDescriptor;
use crate::sink::EntrySink;
use crate::transport::DebugTransport;
use crate::types::TraceEntry;


// ---------------------------------------------------------------------------
// Drain report
// ---------------------------------------------------------------------------

/// How a single drain of one core ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The read index already equalled the write index. Nothing was written.
    Empty,
    /// All pending entries were emitted and the read index was advanced.
    Drained { advanced_to: u16 },
    /// A transport call failed part-way. The read index was left untouched,
    /// so the same slots are offered again on the next poll.
    Aborted,
    /// Nothing was attempted: no open handle, or indices out of range.
    Skipped,
}

/// Result of one drain: the outcome and how many entries reached the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub emitted: usize,
}

impl DrainReport {
    fn new(outcome: DrainOutcome) -> Self {
        DrainReport {
            outcome,
            emitted: 0,
        }
    }
}


// ---------------------------------------------------------------------------
// Slot traversal
// ---------------------------------------------------------------------------

/// Slots holding unconsumed entries, oldest first.
///
/// When the producer has wrapped (`read > write`) this yields
/// `read..capacity` followed by `0..write`.
pub fn pending_slots(read: u16, write: u16, capacity: u32) -> impl Iterator<Item = u32> {
    let (read, write) = (read as u32, write as u32);
    let (head, tail) = if read <= write {
        (read..write, 0..0)
    } else {
        (read..capacity, 0..write)
    };
    head.chain(tail)
}


// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

/// Drain every entry produced since the last poll into `sink`.
///
/// Every sub-read and the final index write is a separate transport call;
/// each non-`Done` reply is classified through `link`. An `Err` is returned
/// only for process-fatal conditions.
pub fn drain(
    ring: &RingDescriptor,
    transport: &mut dyn DebugTransport,
    link: &mut CoreLink,
    sink: &mut dyn EntrySink,
) -> Result<DrainReport, TraceError> {
    let mut report = DrainReport::new(DrainOutcome::Skipped);
    let Some(handle) = link.handle() else {
        return Ok(report);
    };

    let reply = transport.read16(handle, ring.read_index_addr());
    let Some(read_index) = link.guard(transport, reply)? else {
        return Ok(abort(link, report));
    };
    let reply = transport.read16(handle, ring.write_index_addr());
    let Some(write_index) = link.guard(transport, reply)? else {
        return Ok(abort(link, report));
    };

    if !ring.in_range(read_index) || !ring.in_range(write_index) {
        warn!(
            core = %link.name(),
            read_index,
            write_index,
            capacity = ring.capacity(),
            "ring indices out of range, skipping drain"
        );
        return Ok(report);
    }
    if read_index == write_index {
        report.outcome = DrainOutcome::Empty;
        return Ok(report);
    }

    for slot in pending_slots(read_index, write_index, ring.capacity()) {
        let reply = transport.read32(handle, ring.id_addr(slot));
        let Some(id) = link.guard(transport, reply)? else {
            return Ok(abort(link, report));
        };
        let reply = transport.read64(handle, ring.timestamp_addr(slot));
        let Some(timestamp) = link.guard(transport, reply)? else {
            return Ok(abort(link, report));
        };

        sink.append(&TraceEntry::new(id, timestamp))
            .map_err(|source| TraceError::Sink {
                core: link.name().to_string(),
                source,
            })?;
        report.emitted += 1;
        link.stats_mut().entries += 1;
    }

    let reply = transport.write16(handle, ring.read_index_addr(), write_index);
    if link.guard(transport, reply)?.is_none() {
        return Ok(abort(link, report));
    }

    debug!(
        core = %link.name(),
        entries = report.emitted,
        from = read_index,
        to = write_index,
        "drained ring"
    );
    report.outcome = DrainOutcome::Drained {
        advanced_to: write_index,
    };
    Ok(report)
}

fn abort(link: &mut CoreLink, mut report: DrainReport) -> DrainReport {
    link.stats_mut().aborted_drains += 1;
    warn!(
        core = %link.name(),
        emitted = report.emitted,
        "drain aborted, read index not advanced"
    );
    report.outcome = DrainOutcome::Aborted;
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::monitor::link::LinkState;
    use crate::ring::layout::RingLayout;
    use crate::sink::MemorySink;
    use crate::transport::mock::{CallKind, FaultReply, MockTransport, MOCK_PC_ADDRESS};
    use crate::transport::{ErrorCode, ErrorInfo};
    use crate::types::RegisterInfo;

    fn ring(capacity: u32) -> RingDescriptor {
        RingDescriptor::new(
            0xD000_0000,
            RingLayout {
                capacity,
                ..RingLayout::default()
            },
        )
    }

    fn connect(mock: &mut MockTransport, core_id: u32) -> CoreLink {
        let info = mock.conn_info(core_id);
        let handle = mock.open_core(&info).value().unwrap();
        CoreLink::new(info, handle, RegisterInfo::new("PC", MOCK_PC_ADDRESS, 32, 0))
    }

    /// Write indices and `(slot, id, timestamp)` entries into core memory.
    fn load(mock: &mut MockTransport, ring: &RingDescriptor, read: u16, write: u16, entries: &[(u32, u32, u64)]) {
        mock.poke_u16(0, ring.read_index_addr(), read);
        mock.poke_u16(0, ring.write_index_addr(), write);
        for &(slot, id, ts) in entries {
            mock.poke_u32(0, ring.id_addr(slot), id);
            mock.poke_u64(0, ring.timestamp_addr(slot), ts);
        }
    }

    fn pairs(sink: &MemorySink) -> Vec<(u32, u64)> {
        sink.entries.iter().map(|e| (e.id, e.timestamp)).collect()
    }

    struct FailingSink;

    impl EntrySink for FailingSink {
        fn append(&mut self, _entry: &TraceEntry) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    // -- pending_slots --

    #[test]
    fn slots_forward() {
        let slots: Vec<u32> = pending_slots(2, 5, 8).collect();
        assert_eq!(slots, vec![2, 3, 4]);
    }

    #[test]
    fn slots_wrapped() {
        let slots: Vec<u32> = pending_slots(6, 2, 8).collect();
        assert_eq!(slots, vec![6, 7, 0, 1]);
    }

    #[test]
    fn slots_wrapped_to_zero() {
        let slots: Vec<u32> = pending_slots(5, 0, 8).collect();
        assert_eq!(slots, vec![5, 6, 7]);
    }

    #[test]
    fn slots_caught_up() {
        assert_eq!(pending_slots(3, 3, 8).count(), 0);
    }

    #[test]
    fn slots_wrapped_every_pair() {
        let capacity = 6u32;
        for read in 0..capacity as u16 {
            for write in 0..read {
                let got: Vec<u32> = pending_slots(read, write, capacity).collect();
                let mut want: Vec<u32> = (read as u32..capacity).collect();
                want.extend(0..write as u32);
                assert_eq!(got, want, "read={} write={}", read, write);
            }
        }
    }

    // -- drain --

    #[test]
    fn wrapped_scenario_drains_in_production_order() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(
            &mut mock,
            &ring,
            6,
            2,
            &[(6, 10, 100), (7, 11, 101), (0, 12, 102), (1, 13, 103)],
        );
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Drained { advanced_to: 2 });
        assert_eq!(report.emitted, 4);
        assert_eq!(pairs(&sink), vec![(10, 100), (11, 101), (12, 102), (13, 103)]);
        assert_eq!(mock.peek_u16(0, ring.read_index_addr()), 2);
        assert_eq!(mock.writes(0), vec![(ring.read_index_addr(), 2)]);
        assert_eq!(link.stats().entries, 4);
    }

    #[test]
    fn forward_range() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 1, 3, &[(1, 7, 70), (2, 8, 80), (3, 9, 90)]);
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Drained { advanced_to: 3 });
        assert_eq!(pairs(&sink), vec![(7, 70), (8, 80)]);
    }

    #[test]
    fn caught_up_issues_no_write() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 4, 4, &[]);
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Empty);
        assert!(sink.entries.is_empty());
        assert_eq!(mock.count(CallKind::Write16), 0);
        assert_eq!(mock.count(CallKind::Read32), 0);
    }

    #[test]
    fn repeated_drain_is_empty() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 0, 2, &[(0, 1, 10), (1, 2, 20)]);
        let mut sink = MemorySink::new();

        drain(&ring, &mut mock, &mut link, &mut sink).unwrap();
        let second = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(second.outcome, DrainOutcome::Empty);
        assert_eq!(sink.entries.len(), 2);
        assert_eq!(mock.count(CallKind::Write16), 1);
    }

    #[test]
    fn failed_read_aborts_without_advancing() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(
            &mut mock,
            &ring,
            6,
            2,
            &[(6, 10, 100), (7, 11, 101), (0, 12, 102), (1, 13, 103)],
        );
        // Slot 6 reads cleanly; the id read of slot 7 fails.
        mock.push_fault_after(
            CallKind::Read32,
            Some(0),
            1,
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Other(0x20), "access failed"),
        );
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Aborted);
        assert_eq!(report.emitted, 1);
        assert_eq!(pairs(&sink), vec![(10, 100)]);
        assert_eq!(mock.peek_u16(0, ring.read_index_addr()), 6);
        assert_eq!(mock.count(CallKind::Write16), 0);
        assert!(link.is_connected());
        assert_eq!(link.stats().aborted_drains, 1);
        assert_eq!(link.stats().handle_errors, 1);
    }

    #[test]
    fn failed_index_write_replays_next_poll() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 0, 2, &[(0, 1, 10), (1, 2, 20)]);
        mock.push_fault(
            CallKind::Write16,
            Some(0),
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Other(0x21), "write failed"),
        );
        let mut sink = MemorySink::new();

        let first = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();
        assert_eq!(first.outcome, DrainOutcome::Aborted);
        assert_eq!(mock.peek_u16(0, ring.read_index_addr()), 0);

        let second = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();
        assert_eq!(second.outcome, DrainOutcome::Drained { advanced_to: 2 });
        assert_eq!(pairs(&sink), vec![(1, 10), (2, 20), (1, 10), (2, 20)]);
    }

    #[test]
    fn link_loss_mid_drain_drops_handle() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 0, 3, &[(0, 1, 10), (1, 2, 20), (2, 3, 30)]);
        mock.fail_with_link_loss(CallKind::Read64, 0);
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Aborted);
        assert!(sink.entries.is_empty());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.handle().is_none());
        assert!(!mock.is_open(0));
        assert_eq!(mock.peek_u16(0, ring.read_index_addr()), 0);
    }

    #[test]
    fn event_reply_continues_drain() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 0, 1, &[(0, 5, 50)]);
        mock.push_fault(CallKind::Read64, Some(0), FaultReply::Event, ErrorInfo::events(0x1));
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Drained { advanced_to: 1 });
        assert_eq!(pairs(&sink), vec![(5, 50)]);
        assert_eq!(link.stats().events, 1);
    }

    #[test]
    fn out_of_range_indices_skip() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 2, 9, &[]);
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Skipped);
        assert_eq!(mock.count(CallKind::Read32), 0);
        assert_eq!(mock.count(CallKind::Write16), 0);
    }

    #[test]
    fn disconnected_core_is_skipped() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        link.close(&mut mock);
        mock.clear_calls();
        let mut sink = MemorySink::new();

        let report = drain(&ring, &mut mock, &mut link, &mut sink).unwrap();

        assert_eq!(report.outcome, DrainOutcome::Skipped);
        assert!(mock.calls.is_empty());
    }

    #[test]
    fn sink_failure_is_fatal() {
        let ring = ring(8);
        let mut mock = MockTransport::with_cores(1);
        let mut link = connect(&mut mock, 0);
        load(&mut mock, &ring, 0, 1, &[(0, 5, 50)]);

        let err = drain(&ring, &mut mock, &mut link, &mut FailingSink).unwrap_err();

        assert!(matches!(err, TraceError::Sink { .. }));
        assert_eq!(mock.count(CallKind::Write16), 0);
    }
}
