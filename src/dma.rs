//! DMA engine
//!
//! Single-unit-per-tick transfer state machine shared by every device that
//! moves sample data between host memory and the card. The engine paces
//! itself with a scheduler event; on each tick the owning device moves one
//! unit through a [`DmaTransport`] and reports back.
//!
//! When the unit count reaches zero (or the host controller signals its own
//! terminal count) the engine flags Terminal Count and either reloads
//! (auto-init) or stops.

use crate::scheduler::Timers;
use crate::{Gf1Error, Result};

/// One host DMA cycle as seen from the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaCycle {
    /// Byte moved during the cycle
    pub value: u8,
    /// Host controller reached its own terminal count on this cycle
    pub terminal_count: bool,
}

/// Host side of a DMA transfer
///
/// `None` from a cycle method means the host has not acknowledged the
/// request yet; the unit stays in flight and is retried on the next tick.
pub trait DmaTransport {
    /// Device-write direction: fetch one byte from host memory
    fn read_from_host(&mut self) -> Option<DmaCycle>;

    /// Device-read direction: deliver one byte to host memory.
    /// Returns the host terminal-count state.
    fn write_to_host(&mut self, value: u8) -> Option<bool>;

    /// Drop any outstanding request and return the transport to idle
    fn abort(&mut self);
}

/// Result of finishing one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStep {
    /// More units remain; tick again after the interval
    Continue,
    /// Terminal count reached in auto-init mode; count reloaded
    Reloaded,
    /// Terminal count reached; engine stopped
    Completed,
}

/// Parameters of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    /// Units to move before terminal count
    pub total_units: u32,
    /// Bytes moved per unit (1 or 2)
    pub bytes_per_unit: u32,
    /// Microseconds between units
    pub interval_us: u32,
    /// Reload the count at terminal count instead of stopping
    pub auto_init: bool,
}

/// Abstract DMA transfer state machine
#[derive(Debug, Clone)]
pub struct DmaEngine {
    kind: u16,
    total_units: u32,
    remaining_units: u32,
    bytes_per_unit: u32,
    interval_us: u32,
    auto_init: bool,
    running: bool,
    in_flight: bool,
    terminal_count: bool,
}

impl DmaEngine {
    /// Create an idle engine paced by the owner's handler `kind`
    pub fn new(kind: u16) -> Self {
        Self {
            kind,
            total_units: 0,
            remaining_units: 0,
            bytes_per_unit: 1,
            interval_us: 1,
            auto_init: false,
            running: false,
            in_flight: false,
            terminal_count: false,
        }
    }

    /// Handler kind that paces this engine
    pub fn kind(&self) -> u16 {
        self.kind
    }

    /// Start a transfer.
    ///
    /// A transfer already in progress wins: the new request is rejected with
    /// [`Gf1Error::DmaBusy`]. Clears any previous Terminal Count.
    pub fn start(&mut self, timers: &mut Timers<'_>, request: DmaRequest) -> Result<()> {
        if self.running {
            log::warn!("DMA start ignored, transfer already running ({} units left)", self.remaining_units);
            return Err(Gf1Error::DmaBusy);
        }

        let interval_us = request.interval_us.max(1);
        timers.add(self.kind, interval_us, 0)?;

        self.total_units = request.total_units.max(1);
        self.remaining_units = self.total_units;
        self.bytes_per_unit = request.bytes_per_unit.max(1);
        self.interval_us = interval_us;
        self.auto_init = request.auto_init;
        self.running = true;
        self.in_flight = false;
        self.terminal_count = false;
        Ok(())
    }

    /// Mark a unit as handed to the transport
    pub fn begin_unit(&mut self) {
        self.in_flight = true;
    }

    /// Account for a completed unit. `host_terminal_count` is the transport's
    /// own TC signal and ends the transfer early.
    pub fn finish_unit(&mut self, host_terminal_count: bool) -> DmaStep {
        self.in_flight = false;
        if !self.running {
            return DmaStep::Completed;
        }

        self.remaining_units = self.remaining_units.saturating_sub(1);
        if self.remaining_units > 0 && !host_terminal_count {
            return DmaStep::Continue;
        }

        self.terminal_count = true;
        if self.auto_init {
            self.remaining_units = self.total_units;
            DmaStep::Reloaded
        } else {
            self.running = false;
            DmaStep::Completed
        }
    }

    /// Stop the transfer. Safe to call when idle.
    ///
    /// Deactivates the pacing event and, if a unit was mid-flight, rolls the
    /// transport back to idle.
    pub fn cancel(&mut self, timers: &mut Timers<'_>, transport: Option<&mut dyn DmaTransport>) {
        timers.remove(self.kind);
        if let (true, Some(transport)) = (self.in_flight, transport) {
            transport.abort();
        }
        self.running = false;
        self.in_flight = false;
    }

    /// Is a transfer in progress?
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Is a unit waiting on the transport?
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Terminal Count flag
    pub fn terminal_count(&self) -> bool {
        self.terminal_count
    }

    /// Clear Terminal Count
    pub fn clear_terminal_count(&mut self) {
        self.terminal_count = false;
    }

    /// Units left before terminal count
    pub fn remaining_units(&self) -> u32 {
        self.remaining_units
    }

    /// Bytes moved per unit
    pub fn bytes_per_unit(&self) -> u32 {
        self.bytes_per_unit
    }

    /// Microseconds between units
    pub fn interval_us(&self) -> u32 {
        self.interval_us
    }
}

/// In-memory transport emulating a host DMA channel programmed with a buffer.
///
/// Reads walk `data` and signal terminal count on the last byte; writes append
/// to `received`.
#[derive(Debug, Clone, Default)]
pub struct BufferTransport {
    data: Vec<u8>,
    position: usize,
    /// Bytes written to the host
    pub received: Vec<u8>,
    /// Number of host write cycles before terminal count (0 = never)
    pub write_limit: usize,
    /// Number of times the transport was aborted
    pub aborts: usize,
    /// Withhold acknowledgements, leaving units in flight
    pub stalled: bool,
}

impl BufferTransport {
    /// Transport that feeds `data` to the card
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Bytes not yet consumed by the card
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }
}

impl DmaTransport for BufferTransport {
    fn read_from_host(&mut self) -> Option<DmaCycle> {
        if self.stalled {
            return None;
        }
        let value = self.data.get(self.position).copied().unwrap_or(0xFF);
        self.position += 1;
        Some(DmaCycle {
            value,
            terminal_count: self.position >= self.data.len(),
        })
    }

    fn write_to_host(&mut self, value: u8) -> Option<bool> {
        if self.stalled {
            return None;
        }
        self.received.push(value);
        Some(self.write_limit != 0 && self.received.len() >= self.write_limit)
    }

    fn abort(&mut self) {
        self.aborts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{EventKey, EventScheduler};

    const DMA: u16 = 9;

    fn request(units: u32, auto_init: bool) -> DmaRequest {
        DmaRequest {
            total_units: units,
            bytes_per_unit: 1,
            interval_us: 10,
            auto_init,
        }
    }

    #[test]
    fn test_counts_down_to_terminal_count() {
        let mut sched = EventScheduler::new();
        let mut dma = DmaEngine::new(DMA);
        dma.start(&mut Timers::new(&mut sched, 0), request(3, false)).unwrap();
        assert!(sched.is_active(EventKey::new(0, DMA)));

        assert_eq!(dma.finish_unit(false), DmaStep::Continue);
        assert_eq!(dma.finish_unit(false), DmaStep::Continue);
        assert!(!dma.terminal_count());
        assert_eq!(dma.finish_unit(false), DmaStep::Completed);
        assert!(dma.terminal_count());
        assert!(!dma.is_running());
    }

    #[test]
    fn test_auto_init_reloads() {
        let mut sched = EventScheduler::new();
        let mut dma = DmaEngine::new(DMA);
        dma.start(&mut Timers::new(&mut sched, 0), request(2, true)).unwrap();

        dma.finish_unit(false);
        assert_eq!(dma.finish_unit(false), DmaStep::Reloaded);
        assert!(dma.terminal_count());
        assert!(dma.is_running());
        assert_eq!(dma.remaining_units(), 2);
    }

    #[test]
    fn test_second_start_loses() {
        let mut sched = EventScheduler::new();
        let mut dma = DmaEngine::new(DMA);
        dma.start(&mut Timers::new(&mut sched, 0), request(5, false)).unwrap();
        let result = dma.start(&mut Timers::new(&mut sched, 0), request(1, false));
        assert!(matches!(result, Err(Gf1Error::DmaBusy)));
        assert_eq!(dma.remaining_units(), 5);
    }

    #[test]
    fn test_host_terminal_count_ends_early() {
        let mut sched = EventScheduler::new();
        let mut dma = DmaEngine::new(DMA);
        dma.start(&mut Timers::new(&mut sched, 0), request(100, false)).unwrap();
        assert_eq!(dma.finish_unit(true), DmaStep::Completed);
        assert!(dma.terminal_count());
    }

    #[test]
    fn test_cancel_rolls_back_in_flight_unit() {
        let mut sched = EventScheduler::new();
        let mut dma = DmaEngine::new(DMA);
        let mut transport = BufferTransport::new(vec![1, 2, 3]);
        transport.stalled = true;

        dma.start(&mut Timers::new(&mut sched, 0), request(3, false)).unwrap();
        dma.begin_unit();
        assert!(transport.read_from_host().is_none());

        dma.cancel(&mut Timers::new(&mut sched, 0), Some(&mut transport as &mut dyn DmaTransport));
        assert_eq!(transport.aborts, 1);
        assert!(!dma.is_running());
        assert!(!sched.is_active(EventKey::new(0, DMA)));

        // Idempotent, nothing in flight the second time
        dma.cancel(&mut Timers::new(&mut sched, 0), Some(&mut transport as &mut dyn DmaTransport));
        assert_eq!(transport.aborts, 1);
    }

    #[test]
    fn test_buffer_transport_signals_tc_on_last_byte() {
        let mut transport = BufferTransport::new(vec![0xAA, 0xBB]);
        let first = transport.read_from_host().unwrap();
        assert_eq!(first.value, 0xAA);
        assert!(!first.terminal_count);
        let last = transport.read_from_host().unwrap();
        assert!(last.terminal_count);
        assert_eq!(transport.remaining(), 0);
    }
}
