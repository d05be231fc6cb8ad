//! Scripted transport for testing.
//!
//! Backs every core with a sparse byte-addressed memory, serves scripted
//! faults in FIFO order, and records every call, making it easy to write
//! deterministic tests for the ring reader, link monitor, and scheduler.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{DebugTransport, ErrorCode, ErrorInfo, Reply};
use crate::types::{CoreConnInfo, CoreHandle, CoreState, RegisterInfo};

/// Address of the default 32-bit `PC` register in mock register maps.
pub const MOCK_PC_ADDRESS: u64 = 0xF000_FE08;


// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// Kind of transport call, used for fault matching and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    QueryCores,
    Open,
    Close,
    QueryState,
    ErrorInfo,
    RegisterMap,
    Read16,
    Read32,
    Read64,
    Write16,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    /// Core the call targeted, if it could be resolved.
    pub core_id: Option<u32>,
    pub address: Option<u64>,
    /// Value written, for writes.
    pub value: Option<u64>,
}

/// How a scripted fault answers the matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReply {
    /// Perform the call, but answer `Reply::Event`.
    Event,
    /// Skip the call and answer `Reply::Error`.
    Error,
}

#[derive(Debug, Clone)]
struct ScriptedFault {
    kind: CallKind,
    /// `None` matches any core, including calls without a core.
    core_id: Option<u32>,
    /// Matching calls to let through before the fault fires.
    skip: usize,
    reply: FaultReply,
    info: ErrorInfo,
}


// ---------------------------------------------------------------------------
// MockCore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MockCore {
    info: CoreConnInfo,
    memory: BTreeMap<u64, u8>,
    registers: Vec<RegisterInfo>,
    state: CoreState,
    opens: u32,
}


// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// A test double with in-memory cores and a queue of scripted faults.
pub struct MockTransport {
    cores: Vec<MockCore>,
    handles: HashMap<u64, u32>,
    next_handle: u64,
    faults: VecDeque<ScriptedFault>,
    last_error: HashMap<u32, ErrorInfo>,
    global_error: ErrorInfo,
    /// All calls made against this transport, in order.
    pub calls: Vec<Call>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            cores: Vec::new(),
            handles: HashMap::new(),
            next_handle: 1,
            faults: VecDeque::new(),
            last_error: HashMap::new(),
            global_error: ErrorInfo::none(),
            calls: Vec::new(),
        }
    }

    /// Create a mock with `n` cores named `core0..core{n-1}`.
    pub fn with_cores(n: u32) -> Self {
        let mut mock = MockTransport::new();
        for i in 0..n {
            mock.add_core(CoreConnInfo::new(
                "localhost",
                "MockSystem",
                "MockDevice",
                &format!("core{}", i),
                i,
            ));
        }
        mock
    }

    /// Add a core. Its `core_id` is the index it is stored at.
    pub fn add_core(&mut self, mut info: CoreConnInfo) -> u32 {
        let core_id = self.cores.len() as u32;
        info.core_id = core_id;
        self.cores.push(MockCore {
            info,
            memory: BTreeMap::new(),
            registers: vec![
                RegisterInfo::new("PSW", 0xF000_FE04, 32, 0),
                RegisterInfo::new("PC", MOCK_PC_ADDRESS, 32, 0),
            ],
            state: CoreState::Running,
            opens: 0,
        });
        core_id
    }

    pub fn conn_info(&self, core_id: u32) -> CoreConnInfo {
        self.cores[core_id as usize].info.clone()
    }

    pub fn set_registers(&mut self, core_id: u32, registers: Vec<RegisterInfo>) {
        self.cores[core_id as usize].registers = registers;
    }

    pub fn set_state(&mut self, core_id: u32, state: CoreState) {
        self.cores[core_id as usize].state = state;
    }

    /// Queue a fault for the next `kind` call on `core_id` (`None` = any).
    pub fn push_fault(
        &mut self,
        kind: CallKind,
        core_id: Option<u32>,
        reply: FaultReply,
        info: ErrorInfo,
    ) {
        self.push_fault_after(kind, core_id, 0, reply, info);
    }

    /// Like `push_fault`, but let `skip` matching calls succeed first.
    pub fn push_fault_after(
        &mut self,
        kind: CallKind,
        core_id: Option<u32>,
        skip: usize,
        reply: FaultReply,
        info: ErrorInfo,
    ) {
        self.faults.push_back(ScriptedFault {
            kind,
            core_id,
            skip,
            reply,
            info,
        });
    }

    /// Queue a link-loss error for the next `kind` call on `core_id`.
    pub fn fail_with_link_loss(&mut self, kind: CallKind, core_id: u32) {
        self.push_fault(
            kind,
            Some(core_id),
            FaultReply::Error,
            ErrorInfo::error(ErrorCode::Connection, "connection to access hardware lost"),
        );
    }

    pub fn pending_faults(&self) -> usize {
        self.faults.len()
    }

    // -- memory ---------------------------------------------------------------

    pub fn poke(&mut self, core_id: u32, address: u64, bytes: &[u8]) {
        let memory = &mut self.cores[core_id as usize].memory;
        for (i, b) in bytes.iter().enumerate() {
            memory.insert(address + i as u64, *b);
        }
    }

    pub fn peek(&self, core_id: u32, address: u64, len: usize) -> Vec<u8> {
        let memory = &self.cores[core_id as usize].memory;
        (0..len as u64)
            .map(|i| *memory.get(&(address + i)).unwrap_or(&0))
            .collect()
    }

    pub fn poke_u16(&mut self, core_id: u32, address: u64, value: u16) {
        self.poke(core_id, address, &value.to_le_bytes());
    }

    pub fn poke_u32(&mut self, core_id: u32, address: u64, value: u32) {
        self.poke(core_id, address, &value.to_le_bytes());
    }

    pub fn poke_u64(&mut self, core_id: u32, address: u64, value: u64) {
        self.poke(core_id, address, &value.to_le_bytes());
    }

    pub fn peek_u16(&self, core_id: u32, address: u64) -> u16 {
        let b = self.peek(core_id, address, 2);
        u16::from_le_bytes([b[0], b[1]])
    }

    // -- inspection -----------------------------------------------------------

    /// Number of successful opens of a core.
    pub fn open_count(&self, core_id: u32) -> u32 {
        self.cores[core_id as usize].opens
    }

    /// Whether any handle to the core is currently open.
    pub fn is_open(&self, core_id: u32) -> bool {
        self.handles.values().any(|c| *c == core_id)
    }

    /// Core a handle was opened for, while the handle is open.
    pub fn core_of(&self, handle: CoreHandle) -> Option<u32> {
        self.handles.get(&handle.0).copied()
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.iter().filter(|c| c.kind == kind).count()
    }

    pub fn count_for(&self, kind: CallKind, core_id: u32) -> usize {
        self.calls
            .iter()
            .filter(|c| c.kind == kind && c.core_id == Some(core_id))
            .count()
    }

    /// Writes issued against a core, as `(address, value)` pairs.
    pub fn writes(&self, core_id: u32) -> Vec<(u64, u64)> {
        self.calls
            .iter()
            .filter(|c| c.kind == CallKind::Write16 && c.core_id == Some(core_id))
            .filter_map(|c| Some((c.address?, c.value?)))
            .collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    // -- internals ------------------------------------------------------------

    fn record(&mut self, kind: CallKind, core_id: Option<u32>, address: Option<u64>, value: Option<u64>) {
        self.calls.push(Call {
            kind,
            core_id,
            address,
            value,
        });
    }

    /// Consume the first scripted fault matching this call, if any.
    fn take_fault(&mut self, kind: CallKind, core_id: Option<u32>) -> Option<FaultReply> {
        let pos = self.faults.iter().position(|f| {
            f.kind == kind && (f.core_id.is_none() || f.core_id == core_id)
        })?;
        if self.faults[pos].skip > 0 {
            self.faults[pos].skip -= 1;
            return None;
        }
        let fault = self.faults.remove(pos)?;
        match core_id {
            Some(id) => {
                self.last_error.insert(id, fault.info);
            }
            None => self.global_error = fault.info,
        }
        Some(fault.reply)
    }

    /// Run `op` for a call against an open handle, applying scripted faults.
    fn call<T, F>(&mut self, kind: CallKind, handle: CoreHandle, address: Option<u64>, value: Option<u64>, op: F) -> Reply<T>
    where
        F: FnOnce(&mut MockCore) -> T,
    {
        let core_id = match self.handles.get(&handle.0) {
            Some(id) => *id,
            None => {
                self.record(kind, None, address, value);
                self.global_error =
                    ErrorInfo::error(ErrorCode::Other(0x0100), "invalid core handle");
                return Reply::Error;
            }
        };
        self.record(kind, Some(core_id), address, value);
        match self.take_fault(kind, Some(core_id)) {
            Some(FaultReply::Error) => Reply::Error,
            Some(FaultReply::Event) => Reply::Event(op(&mut self.cores[core_id as usize])),
            None => Reply::Done(op(&mut self.cores[core_id as usize])),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn read_le<const N: usize>(core: &MockCore, address: u64) -> [u8; N] {
    let mut out = [0u8; N];
    for (i, b) in out.iter_mut().enumerate() {
        *b = *core.memory.get(&(address + i as u64)).unwrap_or(&0);
    }
    out
}

impl DebugTransport for MockTransport {
    fn query_cores(&mut self, _host: &str, _device: u32) -> Reply<Vec<CoreConnInfo>> {
        self.record(CallKind::QueryCores, None, None, None);
        let infos: Vec<CoreConnInfo> = self.cores.iter().map(|c| c.info.clone()).collect();
        match self.take_fault(CallKind::QueryCores, None) {
            Some(FaultReply::Error) => Reply::Error,
            Some(FaultReply::Event) => Reply::Event(infos),
            None => Reply::Done(infos),
        }
    }

    fn open_core(&mut self, info: &CoreConnInfo) -> Reply<CoreHandle> {
        let core_id = self
            .cores
            .iter()
            .position(|c| c.info == *info)
            .map(|i| i as u32);
        self.record(CallKind::Open, core_id, None, None);
        let Some(core_id) = core_id else {
            self.global_error = ErrorInfo::error(ErrorCode::Other(0x0200), "no such core");
            return Reply::Error;
        };
        let fault = self.take_fault(CallKind::Open, Some(core_id));
        if fault == Some(FaultReply::Error) {
            // Open failures are reported globally; no handle exists yet.
            if let Some(info) = self.last_error.remove(&core_id) {
                self.global_error = info;
            }
            return Reply::Error;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, core_id);
        self.cores[core_id as usize].opens += 1;
        match fault {
            Some(FaultReply::Event) => Reply::Event(CoreHandle(handle)),
            _ => Reply::Done(CoreHandle(handle)),
        }
    }

    fn close_core(&mut self, core: CoreHandle) -> Reply<()> {
        let reply = self.call(CallKind::Close, core, None, None, |_| ());
        if !reply.is_error() {
            self.handles.remove(&core.0);
        }
        reply
    }

    fn query_state(&mut self, core: CoreHandle) -> Reply<CoreState> {
        self.call(CallKind::QueryState, core, None, None, |c| c.state)
    }

    fn error_info(&mut self, core: Option<CoreHandle>) -> ErrorInfo {
        let core_id = core.and_then(|h| self.handles.get(&h.0).copied());
        self.record(CallKind::ErrorInfo, core_id, None, None);
        match core_id.and_then(|id| self.last_error.remove(&id)) {
            Some(info) => info,
            None => std::mem::take(&mut self.global_error),
        }
    }

    fn register_map(&mut self, core: CoreHandle, group_id: u32) -> Reply<Vec<RegisterInfo>> {
        self.call(CallKind::RegisterMap, core, None, None, |c| {
            c.registers
                .iter()
                .filter(|r| r.group_id == group_id)
                .cloned()
                .collect()
        })
    }

    fn read16(&mut self, core: CoreHandle, address: u64) -> Reply<u16> {
        self.call(CallKind::Read16, core, Some(address), None, |c| {
            u16::from_le_bytes(read_le::<2>(c, address))
        })
    }

    fn read32(&mut self, core: CoreHandle, address: u64) -> Reply<u32> {
        self.call(CallKind::Read32, core, Some(address), None, |c| {
            u32::from_le_bytes(read_le::<4>(c, address))
        })
    }

    fn read64(&mut self, core: CoreHandle, address: u64) -> Reply<u64> {
        self.call(CallKind::Read64, core, Some(address), None, |c| {
            u64::from_le_bytes(read_le::<8>(c, address))
        })
    }

    fn write16(&mut self, core: CoreHandle, address: u64, value: u16) -> Reply<()> {
        self.call(CallKind::Write16, core, Some(address), Some(value as u64), |c| {
            for (i, b) in value.to_le_bytes().iter().enumerate() {
                c.memory.insert(address + i as u64, *b);
            }
        })
    }
}
