//! Virtual ISA bus
//!
//! Every emulated card implements [`Peripheral`]. The [`VirtualBus`] routes
//! decoded port accesses to whichever peripheral claims the port, delivers
//! fired scheduler alarms to their owners, ORs interrupt requests onto one
//! shared line and sums every peripheral's audio into one clamped stream.

use crate::config::Settings;
use crate::fifo::StereoFrame;
use crate::irq::{IrqLine, IrqSource};
use crate::scheduler::{EventScheduler, Timers};

/// Value a read of an unclaimed port floats to
pub const OPEN_BUS: u8 = 0xFF;

/// Direction of a port access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host reads from the card
    Read,
    /// Host writes to the card
    Write,
}

/// Bus timing class of a port access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClass {
    /// Answered inside the bus cycle, no wait state
    Fast,
    /// Runs device state machines; may hold the bus with a wait state
    Slow,
}

/// Contract every emulated card implements
pub trait Peripheral: Send {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Called once when the card is plugged into a bus
    fn attach(&mut self, irq: IrqSource);

    /// Does the card decode `port`?
    fn claims(&self, port: u16) -> bool;

    /// Timing class of an access to `port`
    fn access_class(&self, port: u16, direction: Direction) -> AccessClass;

    /// Host wrote `value` to `port`
    fn on_port_write(&mut self, port: u16, value: u8, timers: &mut Timers<'_>);

    /// Host read `port`
    fn on_port_read(&mut self, port: u16, timers: &mut Timers<'_>) -> u8;

    /// 16-bit write: low byte to `port`, high byte to `port + 1`
    fn on_port_write16(&mut self, port: u16, value: u16, timers: &mut Timers<'_>) {
        self.on_port_write(port, value as u8, timers);
        self.on_port_write(port.wrapping_add(1), (value >> 8) as u8, timers);
    }

    /// 16-bit read: low byte from `port`, high byte from `port + 1`
    fn on_port_read16(&mut self, port: u16, timers: &mut Timers<'_>) -> u16 {
        let low = self.on_port_read(port, timers);
        let high = self.on_port_read(port.wrapping_add(1), timers);
        u16::from(low) | (u16::from(high) << 8)
    }

    /// A scheduler alarm of this card fired. Returns the reschedule interval
    /// in microseconds, 0 to deactivate.
    fn on_event(&mut self, kind: u16, value: u32, timers: &mut Timers<'_>) -> u32;

    /// Add one output tick to the accumulators (16-bit scale)
    fn mix(&mut self, acc_l: &mut i32, acc_r: &mut i32);

    /// Re-read the settings record and return to power-on state
    fn reinitialize(&mut self, settings: &Settings, timers: &mut Timers<'_>);
}

/// Bus with its peripherals, the shared scheduler and the shared IRQ line
pub struct VirtualBus {
    devices: Vec<Box<dyn Peripheral>>,
    scheduler: EventScheduler,
    irq: IrqLine,
    unclaimed_accesses: u64,
}

impl VirtualBus {
    /// Empty bus at time zero
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            scheduler: EventScheduler::new(),
            irq: IrqLine::new(),
            unclaimed_accesses: 0,
        }
    }

    /// Plug a card in. Returns its owner id on the scheduler.
    pub fn attach(&mut self, mut device: Box<dyn Peripheral>) -> u8 {
        let owner = self.devices.len() as u8;
        device.attach(self.irq.source(owner as usize));
        log::debug!("attached {} as device {owner}", device.name());
        self.devices.push(device);
        owner
    }

    /// Shared interrupt line
    pub fn irq_line(&self) -> &IrqLine {
        &self.irq
    }

    /// Shared scheduler
    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// Bus time in microseconds
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Number of accesses no card claimed
    pub fn unclaimed_accesses(&self) -> u64 {
        self.unclaimed_accesses
    }

    fn claimant(&self, port: u16) -> Option<usize> {
        self.devices.iter().position(|device| device.claims(port))
    }

    /// Timing class of an access; unclaimed ports are fast
    pub fn access_class(&self, port: u16, direction: Direction) -> AccessClass {
        self.claimant(port)
            .map(|index| self.devices[index].access_class(port, direction))
            .unwrap_or(AccessClass::Fast)
    }

    /// Host byte write
    pub fn write(&mut self, port: u16, value: u8) {
        match self.claimant(port) {
            Some(index) => {
                let mut timers = Timers::new(&mut self.scheduler, index as u8);
                self.devices[index].on_port_write(port, value, &mut timers);
            }
            None => self.unclaimed_accesses += 1,
        }
    }

    /// Host byte read
    pub fn read(&mut self, port: u16) -> u8 {
        match self.claimant(port) {
            Some(index) => {
                let mut timers = Timers::new(&mut self.scheduler, index as u8);
                self.devices[index].on_port_read(port, &mut timers)
            }
            None => {
                self.unclaimed_accesses += 1;
                OPEN_BUS
            }
        }
    }

    /// Host word write
    pub fn write16(&mut self, port: u16, value: u16) {
        match self.claimant(port) {
            Some(index) => {
                let mut timers = Timers::new(&mut self.scheduler, index as u8);
                self.devices[index].on_port_write16(port, value, &mut timers);
            }
            None => self.unclaimed_accesses += 1,
        }
    }

    /// Host word read
    pub fn read16(&mut self, port: u16) -> u16 {
        match self.claimant(port) {
            Some(index) => {
                let mut timers = Timers::new(&mut self.scheduler, index as u8);
                self.devices[index].on_port_read16(port, &mut timers)
            }
            None => {
                self.unclaimed_accesses += 1;
                u16::from_le_bytes([OPEN_BUS, OPEN_BUS])
            }
        }
    }

    /// Bring the clock to `now_us` and run every handler that fell due,
    /// earliest first. Returns the number of handlers run.
    pub fn service(&mut self, now_us: u64) -> usize {
        let mut handled = 0;
        loop {
            self.scheduler.advance(now_us);
            let Some(fired) = self.scheduler.next_fired() else {
                break;
            };
            let owner = fired.key.owner;
            let reschedule = match self.devices.get_mut(owner as usize) {
                Some(device) => {
                    let mut timers = Timers::new(&mut self.scheduler, owner);
                    device.on_event(fired.key.kind, fired.value, &mut timers)
                }
                None => {
                    log::warn!("alarm {:?} has no owning device", fired.key);
                    0
                }
            };
            self.scheduler.complete(fired, reschedule);
            handled += 1;
        }
        handled
    }

    /// One output tick from every card, summed and clamped to 16 bits
    pub fn mix_frame(&mut self) -> StereoFrame {
        let mut left = 0i32;
        let mut right = 0i32;
        for device in &mut self.devices {
            device.mix(&mut left, &mut right);
        }
        StereoFrame::new(clamp_i16(left), clamp_i16(right))
    }

    /// Hand every card the settings record again and drop all pending alarms
    pub fn reinitialize(&mut self, settings: &Settings) {
        self.scheduler.clear();
        for (owner, device) in self.devices.iter_mut().enumerate() {
            let mut timers = Timers::new(&mut self.scheduler, owner as u8);
            device.reinitialize(settings, &mut timers);
        }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturate an accumulator to the signed 16-bit range
#[inline]
pub fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Card with one latch port, a periodic alarm and a constant output
    struct Beeper {
        port: u16,
        latch: u8,
        level: i32,
        irq: IrqSource,
        ticks: u32,
    }

    impl Beeper {
        fn new(port: u16, level: i32) -> Self {
            Self {
                port,
                latch: 0,
                level,
                irq: IrqSource::default(),
                ticks: 0,
            }
        }
    }

    impl Peripheral for Beeper {
        fn name(&self) -> &'static str {
            "beeper"
        }

        fn attach(&mut self, irq: IrqSource) {
            self.irq = irq;
        }

        fn claims(&self, port: u16) -> bool {
            port == self.port
        }

        fn access_class(&self, _port: u16, direction: Direction) -> AccessClass {
            match direction {
                Direction::Read => AccessClass::Fast,
                Direction::Write => AccessClass::Slow,
            }
        }

        fn on_port_write(&mut self, _port: u16, value: u8, timers: &mut Timers<'_>) {
            self.latch = value;
            self.irq.set(value & 1 != 0);
            if value & 2 != 0 {
                timers.add(0, 100, 0).unwrap();
            }
        }

        fn on_port_read(&mut self, _port: u16, _timers: &mut Timers<'_>) -> u8 {
            self.latch
        }

        fn on_event(&mut self, _kind: u16, _value: u32, _timers: &mut Timers<'_>) -> u32 {
            self.ticks += 1;
            if self.ticks < 3 {
                100
            } else {
                0
            }
        }

        fn mix(&mut self, acc_l: &mut i32, acc_r: &mut i32) {
            *acc_l += self.level;
            *acc_r -= self.level;
        }

        fn reinitialize(&mut self, _settings: &Settings, _timers: &mut Timers<'_>) {
            self.latch = 0;
            self.ticks = 0;
        }
    }

    #[test]
    fn test_routes_by_port() {
        let mut bus = VirtualBus::new();
        bus.attach(Box::new(Beeper::new(0x300, 0)));
        bus.attach(Box::new(Beeper::new(0x301, 0)));

        bus.write(0x301, 0x40);
        assert_eq!(bus.read(0x300), 0);
        assert_eq!(bus.read(0x301), 0x40);
        assert_eq!(bus.read(0x302), OPEN_BUS);
        assert_eq!(bus.unclaimed_accesses(), 1);
        assert_eq!(bus.access_class(0x300, Direction::Write), AccessClass::Slow);
        assert_eq!(bus.access_class(0x302, Direction::Write), AccessClass::Fast);
    }

    #[test]
    fn test_irq_is_wired_or() {
        let mut bus = VirtualBus::new();
        bus.attach(Box::new(Beeper::new(0x300, 0)));
        bus.attach(Box::new(Beeper::new(0x301, 0)));

        bus.write(0x300, 1);
        bus.write(0x301, 1);
        bus.write(0x300, 0);
        assert!(bus.irq_line().is_asserted());
        bus.write(0x301, 0);
        assert!(!bus.irq_line().is_asserted());
    }

    #[test]
    fn test_audio_is_summed_and_clamped() {
        let mut bus = VirtualBus::new();
        bus.attach(Box::new(Beeper::new(0x300, 20_000)));
        bus.attach(Box::new(Beeper::new(0x301, 20_000)));
        assert_eq!(bus.mix_frame(), StereoFrame::new(i16::MAX, i16::MIN));
    }

    #[test]
    fn test_service_delivers_alarms_to_owner() {
        let mut bus = VirtualBus::new();
        bus.attach(Box::new(Beeper::new(0x300, 0)));
        let owner = bus.attach(Box::new(Beeper::new(0x301, 0)));
        bus.write(0x301, 2);
        assert!(bus.scheduler().is_active(crate::scheduler::EventKey::new(owner, 0)));

        assert_eq!(bus.service(250), 2);
        assert_eq!(bus.service(1_000), 1);
        assert_eq!(bus.scheduler().active_count(), 0);
    }

    #[test]
    fn test_reinitialize_drops_alarms() {
        let mut bus = VirtualBus::new();
        bus.attach(Box::new(Beeper::new(0x300, 0)));
        bus.write(0x300, 2);
        bus.reinitialize(&Settings::default());
        assert_eq!(bus.scheduler().active_count(), 0);
        assert_eq!(bus.read(0x300), 0);
    }
}
