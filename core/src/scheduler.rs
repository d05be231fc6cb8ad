//! Polling scheduler — the sequential round-robin loop over all cores.
//!
//! Every round visits each core exactly once in enumeration order:
//! health check, then (if connected) drain into the core's sink. A core
//! that fails or has nothing to drain never holds up the cores after it.
//! Between rounds the scheduler sleeps for the configured period.
//!
//! The loop ends only when its `Interruptor` is set (checked before every
//! core visit and during the sleep) or when a fatal error is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::MIN_POLL_PERIOD;
use crate::error::TraceError;
use crate::monitor::link::{CoreLink, CoreStats, LinkState};
use crate::ring::layout::RingDescriptor;
use crate::ring::reader::{drain, DrainReport};
use crate::sink::EntrySink;
use crate::transport::DebugTransport;

/// Longest uninterrupted sleep while waiting for the next round.
const SLEEP_SLICE: Duration = Duration::from_millis(50);


// ---------------------------------------------------------------------------
// Interruptor
// ---------------------------------------------------------------------------

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interruptor(Arc<AtomicBool>);

impl Interruptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `period`, waking early if the flag is set.
    /// Returns `true` if interrupted.
    pub fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}


// ---------------------------------------------------------------------------
// CoreSlot
// ---------------------------------------------------------------------------

/// A traced core together with its output stream.
pub struct CoreSlot {
    pub link: CoreLink,
    pub sink: Box<dyn EntrySink>,
}

impl CoreSlot {
    pub fn new(link: CoreLink, sink: Box<dyn EntrySink>) -> Self {
        CoreSlot { link, sink }
    }
}


// ---------------------------------------------------------------------------
// Round report
// ---------------------------------------------------------------------------

/// What happened to one core during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreVisit {
    pub core: String,
    /// Link state after the health check.
    pub state: LinkState,
    /// Drain result, when the core was connected.
    pub drain: Option<DrainReport>,
}

/// Summary of one polling round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    pub visits: Vec<CoreVisit>,
    /// The round was cut short by the interruptor.
    pub interrupted: bool,
}

impl RoundReport {
    /// Entries emitted across all cores.
    pub fn entries(&self) -> usize {
        self.visits
            .iter()
            .filter_map(|v| v.drain.as_ref())
            .map(|d| d.emitted)
            .sum()
    }
}


// ---------------------------------------------------------------------------
// PollScheduler
// ---------------------------------------------------------------------------

/// Drives all traced cores through the same transport session.
pub struct PollScheduler<'a> {
    transport: &'a mut dyn DebugTransport,
    ring: RingDescriptor,
    cores: Vec<CoreSlot>,
    period: Duration,
    interruptor: Interruptor,
    rounds: u64,
}

impl<'a> PollScheduler<'a> {
    /// `period` is clamped to `MIN_POLL_PERIOD`.
    pub fn new(
        transport: &'a mut dyn DebugTransport,
        ring: RingDescriptor,
        cores: Vec<CoreSlot>,
        period: Duration,
    ) -> Self {
        PollScheduler {
            transport,
            ring,
            cores,
            period: period.max(MIN_POLL_PERIOD),
            interruptor: Interruptor::new(),
            rounds: 0,
        }
    }

    /// Use an interruptor created elsewhere, e.g. before setup.
    pub fn with_interruptor(mut self, interruptor: Interruptor) -> Self {
        self.interruptor = interruptor;
        self
    }

    /// A handle that stops the loop when set.
    pub fn interruptor(&self) -> Interruptor {
        self.interruptor.clone()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Rounds completed so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn cores(&self) -> &[CoreSlot] {
        &self.cores
    }

    /// Visit every core once.
    pub fn run_round(&mut self) -> Result<RoundReport, TraceError> {
        let mut report = RoundReport {
            round: self.rounds + 1,
            ..RoundReport::default()
        };

        for slot in self.cores.iter_mut() {
            if self.interruptor.is_set() {
                report.interrupted = true;
                return Ok(report);
            }
            slot.link.stats_mut().rounds += 1;

            let state = slot.link.check_status(&mut *self.transport)?;
            let drained = if state == LinkState::Connected {
                Some(drain(&self.ring, &mut *self.transport, &mut slot.link, slot.sink.as_mut())?)
            } else {
                None
            };
            report.visits.push(CoreVisit {
                core: slot.link.name().to_string(),
                state: slot.link.state(),
                drain: drained,
            });
        }

        self.rounds += 1;
        debug!(round = report.round, entries = report.entries(), "polling round complete");
        Ok(report)
    }

    /// Poll until interrupted. Returns the number of completed rounds.
    pub fn run(&mut self) -> Result<u64, TraceError> {
        info!(
            cores = self.cores.len(),
            period_us = self.period.as_micros() as u64,
            "polling started"
        );
        while !self.interruptor.is_set() {
            let report = self.run_round()?;
            if report.interrupted || self.interruptor.sleep(self.period) {
                break;
            }
        }
        info!(rounds = self.rounds, "polling stopped");
        Ok(self.rounds)
    }

    /// Close every handle, flush every sink, and return per-core statistics.
    pub fn shutdown(mut self) -> Vec<(String, CoreStats)> {
        let mut summary = Vec::with_capacity(self.cores.len());
        for slot in self.cores.iter_mut() {
            slot.link.close(&mut *self.transport);
            if let Err(e) = slot.sink.flush() {
                warn!(core = %slot.link.name(), "cannot flush trace output: {}", e);
            }
            let stats = slot.link.stats().clone();
            match serde_json::to_string(&stats) {
                Ok(json) => info!(core = %slot.link.name(), "stats {}", json),
                Err(e) => warn!(core = %slot.link.name(), "cannot encode stats: {}", e),
            }
            summary.push((slot.link.name().to_string(), stats));
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
