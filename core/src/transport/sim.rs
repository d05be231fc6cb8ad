//! Simulated multi-core target.
//!
//! Each simulated core runs "firmware" that appends trace entries to a ring
//! buffer in its memory every time the host probes it. Memory, handles and
//! the register map come from `MockTransport`; this layer adds the
//! producer and periodic link loss, so the full tracing pipeline can be
//! exercised without hardware.

use std::collections::{HashMap, HashSet};

use super::mock::{MockTransport, MOCK_PC_ADDRESS};
use super::{DebugTransport, ErrorCode, ErrorInfo, Reply};
use crate::ring::layout::{RingDescriptor, RingLayout, DEFAULT_BUFFER_ADDRESS};
use crate::types::{CoreConnInfo, CoreHandle, CoreState, RegisterInfo};

/// Settings for a simulated target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub cores: u32,
    /// Entries produced per core on each probe.
    pub burst: u32,
    /// Report a link loss on every Nth probe of a core. 0 disables.
    pub drop_every: u64,
    pub base: u64,
    pub layout: RingLayout,
    /// Timestamp increment between consecutive entries.
    pub timestamp_step: u64,
    pub host: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            cores: 2,
            burst: 3,
            drop_every: 0,
            base: DEFAULT_BUFFER_ADDRESS,
            layout: RingLayout::default(),
            timestamp_step: 250,
            host: "localhost".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Firmware {
    next_id: u32,
    clock: u64,
    probes: u64,
    ip: u32,
}

/// A `DebugTransport` backed by simulated cores.
pub struct SimTarget {
    config: SimConfig,
    ring: RingDescriptor,
    mock: MockTransport,
    firmware: HashMap<u32, Firmware>,
    /// Handles invalidated by a simulated link loss.
    stale: HashSet<u64>,
    pending_error: Option<ErrorInfo>,
}

impl SimTarget {
    pub fn new(config: SimConfig) -> Self {
        let mut mock = MockTransport::new();
        let mut firmware = HashMap::new();
        for i in 0..config.cores {
            let id = mock.add_core(CoreConnInfo::new(
                &config.host,
                "SimSystem",
                "SimDevice",
                &format!("core{}", i),
                i,
            ));
            firmware.insert(
                id,
                Firmware {
                    ip: 0x8000_0000,
                    ..Firmware::default()
                },
            );
        }
        let ring = RingDescriptor::new(config.base, config.layout);
        SimTarget {
            config,
            ring,
            mock,
            firmware,
            stale: HashSet::new(),
            pending_error: None,
        }
    }

    /// The underlying memory and call log.
    pub fn mock(&self) -> &MockTransport {
        &self.mock
    }

    /// Entries produced so far by a core.
    pub fn produced(&self, core_id: u32) -> u32 {
        self.firmware.get(&core_id).map_or(0, |fw| fw.next_id)
    }

    /// Append `burst` entries to the core's ring, overwriting unread slots.
    fn produce(&mut self, core_id: u32) {
        let capacity = self.ring.capacity();
        let step = self.config.timestamp_step;
        let burst = self.config.burst;
        let Some(fw) = self.firmware.get_mut(&core_id) else {
            return;
        };
        let mut write = self.mock.peek_u16(core_id, self.ring.write_index_addr()) as u32 % capacity;
        for _ in 0..burst {
            fw.clock += step;
            self.mock.poke_u32(core_id, self.ring.id_addr(write), fw.next_id);
            self.mock.poke_u64(core_id, self.ring.timestamp_addr(write), fw.clock);
            fw.next_id = fw.next_id.wrapping_add(1);
            write = (write + 1) % capacity;
        }
        fw.ip = fw.ip.wrapping_add(4 * burst.max(1));
        self.mock.poke_u16(core_id, self.ring.write_index_addr(), write as u16);
        self.mock.poke_u32(core_id, MOCK_PC_ADDRESS, fw.ip);
    }

    /// Whether this probe of the core should report a link loss.
    fn probe(&mut self, core_id: u32) -> bool {
        let drop_every = self.config.drop_every;
        match self.firmware.get_mut(&core_id) {
            Some(fw) => {
                fw.probes += 1;
                drop_every > 0 && fw.probes % drop_every == 0
            }
            None => false,
        }
    }

    fn link_lost<T>(&mut self) -> Reply<T> {
        self.pending_error = Some(ErrorInfo::error(
            ErrorCode::Connection,
            "connection to access hardware lost",
        ));
        Reply::Error
    }

    fn is_stale(&self, handle: CoreHandle) -> bool {
        self.stale.contains(&handle.0)
    }
}

impl DebugTransport for SimTarget {
    fn query_cores(&mut self, host: &str, device: u32) -> Reply<Vec<CoreConnInfo>> {
        if device != 0 {
            self.pending_error = Some(ErrorInfo::error(
                ErrorCode::Other(0x0300),
                "no such device",
            ));
            return Reply::Error;
        }
        self.mock.query_cores(host, device)
    }

    fn open_core(&mut self, info: &CoreConnInfo) -> Reply<CoreHandle> {
        self.mock.open_core(info)
    }

    fn close_core(&mut self, core: CoreHandle) -> Reply<()> {
        self.stale.remove(&core.0);
        self.mock.close_core(core)
    }

    fn query_state(&mut self, core: CoreHandle) -> Reply<CoreState> {
        if self.is_stale(core) {
            return self.link_lost();
        }
        let Some(core_id) = self.mock.core_of(core) else {
            return self.mock.query_state(core);
        };
        if self.probe(core_id) {
            self.stale.insert(core.0);
            return self.link_lost();
        }
        let reply = self.mock.query_state(core);
        if !reply.is_error() {
            self.produce(core_id);
        }
        reply
    }

    fn error_info(&mut self, core: Option<CoreHandle>) -> ErrorInfo {
        match self.pending_error.take() {
            Some(info) => info,
            None => self.mock.error_info(core),
        }
    }

    fn register_map(&mut self, core: CoreHandle, group_id: u32) -> Reply<Vec<RegisterInfo>> {
        if self.is_stale(core) {
            return self.link_lost();
        }
        self.mock.register_map(core, group_id)
    }

    fn read16(&mut self, core: CoreHandle, address: u64) -> Reply<u16> {
        if self.is_stale(core) {
            return self.link_lost();
        }
        self.mock.read16(core, address)
    }

    fn read32(&mut self, core: CoreHandle, address: u64) -> Reply<u32> {
        if self.is_stale(core) {
            return self.link_lost();
        }
        self.mock.read32(core, address)
    }

    fn read64(&mut self, core: CoreHandle, address: u64) -> Reply<u64> {
        if self.is_stale(core) {
            return self.link_lost();
        }
        self.mock.read64(core, address)
    }

    fn write16(&mut self, core: CoreHandle, address: u64, value: u16) -> Reply<()> {
        if self.is_stale(core) {
            return self.link_lost();
        }
        self.mock.write16(core, address, value)
    }
}
