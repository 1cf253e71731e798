//! Two-context access to a shared bus
//!
//! The bus-servicing side and the audio-synthesis side run concurrently.
//! Both reach the devices through one [`SharedSystem`]: the virtual bus sits
//! behind a `parking_lot::Mutex` that each side holds only for the duration
//! of one port access or one audio tick. Before touching the
//! devices each side brings the scheduler up to the shared [`Clock`], so
//! alarms fire in time order no matter which side observes them first.
//!
//! The IRQ line is an atomic and can be sampled without the lock.

use crate::bus::{AccessClass, Direction, VirtualBus};
use crate::config::Settings;
use crate::fifo::{AudioFifo, StereoFrame};
use crate::irq::IrqLine;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Frames queued per output FIFO lock in [`SynthContext::render`]
const RENDER_CHUNK: usize = 64;

/// Source of bus time in microseconds
pub trait Clock: Send + Sync {
    /// Microseconds since the clock's origin
    fn now_us(&self) -> u64;
}

/// Wall clock starting at creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock reading zero now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock moved by hand, for tests and offline rendering
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move forward by `delta_us`
    pub fn advance_us(&self, delta_us: u64) {
        self.now.fetch_add(delta_us, Ordering::AcqRel);
    }

    /// Jump to `now_us`. Going backwards is ignored by the scheduler.
    pub fn set_us(&self, now_us: u64) {
        self.now.store(now_us, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Access and rendering statistics
#[derive(Debug, Clone, Default)]
pub struct ContextStats {
    /// Port accesses that went through the slow path
    pub slow_accesses: usize,
    /// Slow accesses that took longer than the stall budget
    pub stall_overruns: usize,
    /// Longest slow access seen, in microseconds
    pub worst_stall_us: u64,
    /// Scheduler handlers run by either side
    pub alarms_serviced: usize,
    /// Frames mixed by the synthesis side
    pub frames_rendered: usize,
    /// Frames dropped because the output FIFO was full
    pub frames_dropped: usize,
    /// Output FIFO fill (0.0 to 1.0)
    pub fill_percentage: f32,
}

/// Bus, output FIFO and clock shared by both contexts
pub struct SharedSystem {
    bus: Arc<Mutex<VirtualBus>>,
    clock: Arc<dyn Clock>,
    output: Arc<Mutex<AudioFifo<StereoFrame>>>,
    stats: Arc<Mutex<ContextStats>>,
    irq: IrqLine,
    max_stall_us: u32,
}

impl SharedSystem {
    /// Take ownership of a populated bus
    pub fn new(bus: VirtualBus, clock: Arc<dyn Clock>, settings: &Settings) -> Self {
        let irq = bus.irq_line().clone();
        Self {
            bus: Arc::new(Mutex::new(bus)),
            clock,
            output: Arc::new(Mutex::new(AudioFifo::new(settings.buffer_depth))),
            stats: Arc::new(Mutex::new(ContextStats::default())),
            irq,
            max_stall_us: settings.max_stall_us,
        }
    }

    /// Handle for the bus-servicing side
    pub fn bus_context(&self) -> BusContext {
        BusContext {
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
            irq: self.irq.clone(),
            max_stall_us: u64::from(self.max_stall_us),
        }
    }

    /// Handle for the audio-synthesis side
    pub fn synth_context(&self) -> SynthContext {
        SynthContext {
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
            output: Arc::clone(&self.output),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Shared interrupt line
    pub fn irq_line(&self) -> &IrqLine {
        &self.irq
    }

    /// Current statistics
    pub fn stats(&self) -> ContextStats {
        self.stats.lock().clone()
    }

    /// Run `f` with exclusive access to the bus
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut VirtualBus) -> R) -> R {
        f(&mut *self.bus.lock())
    }

    /// Re-read settings into every device and flush pending output
    pub fn reinitialize(&mut self, settings: &Settings) {
        self.bus.lock().reinitialize(settings);
        let mut output = self.output.lock();
        output.reset();
        output.set_threshold(settings.buffer_depth);
        self.max_stall_us = settings.max_stall_us;
    }
}

/// Bus-servicing handle: one call per host bus cycle
pub struct BusContext {
    bus: Arc<Mutex<VirtualBus>>,
    clock: Arc<dyn Clock>,
    stats: Arc<Mutex<ContextStats>>,
    irq: IrqLine,
    max_stall_us: u64,
}

impl BusContext {
    fn access<R>(&mut self, port: u16, direction: Direction, f: impl FnOnce(&mut VirtualBus) -> R) -> R {
        let now = self.clock.now_us();
        let mut bus = self.bus.lock();
        let alarms = bus.service(now);
        let class = bus.access_class(port, direction);
        let started = Instant::now();
        let result = f(&mut *bus);
        let elapsed = started.elapsed().as_micros() as u64;
        drop(bus);

        let mut stats = self.stats.lock();
        stats.alarms_serviced += alarms;
        if class == AccessClass::Slow {
            stats.slow_accesses += 1;
            stats.worst_stall_us = stats.worst_stall_us.max(elapsed);
            if elapsed > self.max_stall_us {
                stats.stall_overruns += 1;
                log::warn!("slow access to port {port:#05x} held the bus {elapsed} µs");
            }
        }
        result
    }

    /// Host byte write
    pub fn write(&mut self, port: u16, value: u8) {
        self.access(port, Direction::Write, |bus| bus.write(port, value));
    }

    /// Host byte read
    pub fn read(&mut self, port: u16) -> u8 {
        self.access(port, Direction::Read, |bus| bus.read(port))
    }

    /// Host word write
    pub fn write16(&mut self, port: u16, value: u16) {
        self.access(port, Direction::Write, |bus| bus.write16(port, value));
    }

    /// Host word read
    pub fn read16(&mut self, port: u16) -> u16 {
        self.access(port, Direction::Read, |bus| bus.read16(port))
    }

    /// Fire every alarm due by now without a port access
    pub fn service(&mut self) -> usize {
        let now = self.clock.now_us();
        let alarms = self.bus.lock().service(now);
        self.stats.lock().alarms_serviced += alarms;
        alarms
    }

    /// Sample the interrupt line without taking the bus lock
    pub fn irq_asserted(&self) -> bool {
        self.irq.is_asserted()
    }

    /// Current statistics
    pub fn stats(&self) -> ContextStats {
        self.stats.lock().clone()
    }
}

/// Audio-synthesis handle: mixes ticks into the output FIFO
pub struct SynthContext {
    bus: Arc<Mutex<VirtualBus>>,
    clock: Arc<dyn Clock>,
    output: Arc<Mutex<AudioFifo<StereoFrame>>>,
    stats: Arc<Mutex<ContextStats>>,
}

impl SynthContext {
    /// Mix `frames` audio ticks and queue them for output.
    /// Returns the number of frames queued.
    ///
    /// The bus lock is taken once per tick, so host port accesses interleave
    /// with a long render.
    pub fn render(&mut self, frames: usize) -> usize {
        let mut chunk = [StereoFrame::SILENCE; RENDER_CHUNK];
        let mut queued = 0;
        let mut remaining = frames;

        while remaining > 0 {
            let count = remaining.min(RENDER_CHUNK);
            let mut alarms = 0;
            for slot in &mut chunk[..count] {
                let now = self.clock.now_us();
                let mut bus = self.bus.lock();
                alarms += bus.service(now);
                *slot = bus.mix_frame();
            }

            let mut output = self.output.lock();
            let written = output.push_slice(&chunk[..count]);
            let fill = output.fill_percentage();
            drop(output);

            let mut stats = self.stats.lock();
            stats.alarms_serviced += alarms;
            stats.frames_rendered += count;
            stats.fill_percentage = fill;
            if written < count {
                stats.frames_dropped += count - written;
                log::warn!("output FIFO full, dropped {} frames", count - written);
            }
            drop(stats);

            queued += written;
            remaining -= count;
        }
        queued
    }

    /// Output transport side: take up to `dest.len()` frames. Returns nothing
    /// until the FIFO has filled to its threshold.
    pub fn pull(&mut self, dest: &mut [StereoFrame]) -> usize {
        let mut output = self.output.lock();
        let read = output.pop_into(dest);
        self.stats.lock().fill_percentage = output.fill_percentage();
        read
    }

    /// Frames waiting in the output FIFO
    pub fn queued(&self) -> usize {
        self.output.lock().len()
    }

    /// Current statistics
    pub fn stats(&self) -> ContextStats {
        self.stats.lock().clone()
    }
}
