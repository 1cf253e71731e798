//! GF1 wavetable synthesizer
//!
//! The card as the host sees it: a block of I/O ports that reach the global
//! register file, the selected voice and on-card DRAM, a DMA engine that
//! moves samples between host memory and DRAM, two timers and one IRQ.
//!
//! # Features
//! - Register-select / 16-bit data port protocol with exhaustive decoding
//! - DRAM peek/poke and DMA upload/download (8/16-bit, MSB inversion)
//! - Timer 1/2 driven by the shared scheduler with drift-free reload
//! - Voice IRQ round-robin and IRQ aggregation onto the shared line
//! - Fixed 44.1 kHz or native voice-count-dependent output rate

pub mod channel;
pub mod global;
pub mod memory;
pub mod registers;
pub mod tables;

use crate::bus::{AccessClass, Direction, Peripheral};
use crate::config::Settings;
use crate::dma::{DmaEngine, DmaRequest, DmaStep, DmaTransport};
use crate::irq::IrqSource;
use crate::scheduler::Timers;
use crate::Gf1Error;
use channel::ChannelBank;
use global::GlobalRegisterFile;
use memory::DRAM_MASK;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use registers::{port, DmaControl, GlobalRegister, IrqStatus, Register, VoiceRegister};

pub use channel::{Channel, VoiceEvents, VOICE_COUNT};
pub use registers::{RampControl, WaveControl};

/// Per-unit DMA interval in microseconds for each rate divisor setting
pub const DEFAULT_DMA_INTERVAL_US: [u32; 4] = [2, 4, 5, 7];

/// Unit budget of one GF1 DMA transfer; the host controller's own Terminal
/// Count normally ends it first
pub const MAX_DMA_UNITS: u32 = 0x10000;

/// Scheduler handlers owned by the GF1
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum GusEvent {
    /// Timer 1 expiry
    Timer1 = 0,
    /// Timer 2 expiry
    Timer2 = 1,
    /// DMA unit pacing
    Dma = 2,
}

impl GusEvent {
    fn timer(index: usize) -> Self {
        if index == 0 {
            GusEvent::Timer1
        } else {
            GusEvent::Timer2
        }
    }
}

/// GF1 card
pub struct Gf1 {
    base_port: u16,
    global: GlobalRegisterFile,
    voices: ChannelBank,
    dma: DmaEngine,
    dma_pointer: u32,
    dma_unit_progress: u32,
    dma_host_tc: bool,
    dma_interval_override: Option<u32>,
    transport: Option<Box<dyn DmaTransport + Send>>,
    irq: IrqSource,
}

impl Gf1 {
    /// Power-on card configured from `settings`
    pub fn new(settings: &Settings) -> Self {
        let global = GlobalRegisterFile::new(settings.fixed_sample_rate);
        let voices = ChannelBank::new(&global.rates());
        Self {
            base_port: settings.base_port,
            global,
            voices,
            dma: DmaEngine::new(GusEvent::Dma as u16),
            dma_pointer: 0,
            dma_unit_progress: 0,
            dma_host_tc: false,
            dma_interval_override: settings.dma_interval_us,
            transport: None,
            irq: IrqSource::default(),
        }
    }

    /// Connect the host side of the DMA channel
    pub fn set_dma_transport(&mut self, transport: Box<dyn DmaTransport + Send>) {
        self.transport = Some(transport);
    }

    /// Card base port
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Global register file
    pub fn global(&self) -> &GlobalRegisterFile {
        &self.global
    }

    /// Voices and sample memory
    pub fn voices(&self) -> &ChannelBank {
        &self.voices
    }

    /// Mutable voices and sample memory
    pub fn voices_mut(&mut self) -> &mut ChannelBank {
        &mut self.voices
    }

    /// DMA engine state
    pub fn dma(&self) -> &DmaEngine {
        &self.dma
    }

    /// Rate the mixer must be ticked at
    pub fn output_rate(&self) -> u32 {
        self.global.rates().output_rate
    }

    /// IRQ status as the host sees it
    pub fn effective_irq_status(&self) -> IrqStatus {
        self.global.effective_irq_status()
    }

    /// Drive the shared line from the current causes. Called after every
    /// mutation that can touch a cause.
    fn update_irq(&self) {
        self.irq.set(!self.global.effective_irq_status().is_empty());
    }

    /// Set the active voice count (clamped to 14..=32) and re-derive every
    /// voice's increments from the new chip rate.
    pub fn set_active_voice_count(&mut self, count: u8) {
        let rates = self.global.set_active_voice_count(count);
        self.voices.set_rates(&rates);
        self.global.check_voice_irq();
        self.update_irq();
    }

    /// Chip reset: silence and stop every voice, cancel DMA and both timers,
    /// clear every IRQ cause and restore the default voice count.
    pub fn reset(&mut self, timers: &mut Timers<'_>) {
        timers.remove(GusEvent::Timer1 as u16);
        timers.remove(GusEvent::Timer2 as u16);
        self.cancel_dma(timers);
        self.global.reset();
        self.voices.reset_voices();
        self.voices.set_rates(&self.global.rates());
        self.update_irq();
    }

    fn cancel_dma(&mut self, timers: &mut Timers<'_>) {
        let transport = self
            .transport
            .as_deref_mut()
            .map(|transport| transport as &mut dyn DmaTransport);
        self.dma.cancel(timers, transport);
        self.dma_unit_progress = 0;
        self.dma_host_tc = false;
    }

    fn offset(&self, port: u16) -> Option<u16> {
        let offset = port.wrapping_sub(self.base_port);
        match offset {
            0x000..=0x00F | 0x100..=0x107 => Some(offset),
            _ => None,
        }
    }

    fn write_timer_command(&mut self, value: u8, timers: &mut Timers<'_>) {
        if value & 0x80 != 0 {
            for timer in &mut self.global.timers {
                timer.reached = false;
            }
            return;
        }
        self.global.timers[0].masked = value & 0x40 != 0;
        self.global.timers[1].masked = value & 0x20 != 0;

        for index in 0..2 {
            let kind = GusEvent::timer(index) as u16;
            let timer = &mut self.global.timers[index];
            if value & (1 << index) != 0 {
                if !timer.running {
                    timer.running = true;
                    if let Err(err) = timers.add(kind, timer.delay_us(), 0) {
                        log::warn!("timer {} not started: {err}", index + 1);
                        timer.running = false;
                    }
                }
            } else {
                timer.running = false;
                timers.remove(kind);
            }
        }
    }

    fn write_reset(&mut self, value: u8, timers: &mut Timers<'_>) {
        if self.global.latch_reset(value) {
            self.reset(timers);
        }
    }

    fn dma_dram_address(&self) -> u32 {
        let address = u32::from(self.global.dma_address);
        let address = if self.global.dma_control.contains(DmaControl::CHANNEL_16BIT) {
            ((address & 0x1FFF) << 1) | (address & 0xC000)
        } else {
            address
        };
        (address << 4) & DRAM_MASK
    }

    fn write_dma_control(&mut self, value: u8, timers: &mut Timers<'_>) {
        let terminal_count = self.global.dma_control & DmaControl::TERMINAL_COUNT;
        self.global.dma_control = DmaControl::from_bits_truncate(u16::from(value)) | terminal_count;

        if !self.global.dma_control.contains(DmaControl::ENABLE) {
            if self.dma.is_running() {
                self.cancel_dma(timers);
            }
            return;
        }
        if self.transport.is_none() {
            log::debug!("DMA enabled with no host channel connected");
            return;
        }

        let control = self.global.dma_control;
        let request = DmaRequest {
            total_units: MAX_DMA_UNITS,
            bytes_per_unit: if control.contains(DmaControl::CHANNEL_16BIT) { 2 } else { 1 },
            interval_us: self
                .dma_interval_override
                .unwrap_or(DEFAULT_DMA_INTERVAL_US[control.rate()]),
            auto_init: false,
        };
        match self.dma.start(timers, request) {
            Ok(()) => {
                self.dma_pointer = self.dma_dram_address();
                self.dma_unit_progress = 0;
                self.dma_host_tc = false;
            }
            Err(Gf1Error::DmaBusy) => {}
            Err(err) => log::warn!("DMA not started: {err}"),
        }
    }

    /// One DMA tick: move one unit, then account for it
    fn dma_tick(&mut self) -> u32 {
        if !self.dma.is_running() {
            return 0;
        }
        let interval = self.dma.interval_us();
        let Some(transport) = self.transport.as_deref_mut() else {
            return 0;
        };

        let control = self.global.dma_control;
        self.dma.begin_unit();
        while self.dma_unit_progress < self.dma.bytes_per_unit() {
            if control.contains(DmaControl::TO_HOST) {
                let value = self.voices.peek(self.dma_pointer);
                let Some(host_tc) = transport.write_to_host(value) else {
                    return interval;
                };
                self.dma_host_tc |= host_tc;
            } else {
                let Some(cycle) = transport.read_from_host() else {
                    return interval;
                };
                let mut value = cycle.value;
                if control.contains(DmaControl::INVERT_MSB)
                    && (!control.contains(DmaControl::DATA_16BIT) || self.dma_pointer & 1 == 1)
                {
                    value ^= 0x80;
                }
                self.voices.poke(self.dma_pointer, value);
                self.dma_host_tc |= cycle.terminal_count;
            }
            self.dma_pointer = (self.dma_pointer + 1) & DRAM_MASK;
            self.dma_unit_progress += 1;
        }
        self.dma_unit_progress = 0;

        let host_tc = std::mem::take(&mut self.dma_host_tc);
        let step = self.dma.finish_unit(host_tc);
        if self.dma.terminal_count() {
            self.dma.clear_terminal_count();
            self.global.dma_control.insert(DmaControl::TERMINAL_COUNT);
            self.update_irq();
        }
        match step {
            DmaStep::Continue | DmaStep::Reloaded => interval,
            DmaStep::Completed => {
                self.global.dma_control.remove(DmaControl::ENABLE);
                0
            }
        }
    }

    fn timer_expired(&mut self, index: usize) -> u32 {
        let reschedule = self.global.timers[index].expire();
        self.update_irq();
        reschedule
    }

    fn commit_register(&mut self, timers: &mut Timers<'_>) {
        let select = self.global.register_select;
        match Register::for_write(select) {
            Some(Register::Voice(register)) => self.write_voice(register),
            Some(Register::Global(register)) => self.write_global(register, timers),
            None => log::debug!("write to unknown register {select:#04x}"),
        }
        self.update_irq();
    }

    fn write_voice(&mut self, register: VoiceRegister) {
        let voice = usize::from(self.global.voice_select);
        let data = self.global.data;
        let high = (data >> 8) as u8;
        match register {
            VoiceRegister::ActiveVoices => {
                self.set_active_voice_count(1 + (high & 0x3F));
            }
            VoiceRegister::IrqStatus => log::debug!("write to read-only {register}"),
            VoiceRegister::WaveControl => {
                self.voices.write_register(voice, register, data, &self.global.rates());
                self.global.set_wave_irq(voice, high & 0xA0 == 0xA0);
                self.global.check_voice_irq();
            }
            VoiceRegister::RampControl => {
                self.voices.write_register(voice, register, data, &self.global.rates());
                self.global.set_ramp_irq(voice, high & 0xA0 == 0xA0);
                self.global.check_voice_irq();
            }
            _ => self.voices.write_register(voice, register, data, &self.global.rates()),
        }
    }

    fn write_global(&mut self, register: GlobalRegister, timers: &mut Timers<'_>) {
        let data = self.global.data;
        let high = (data >> 8) as u8;
        match register {
            GlobalRegister::DmaControl => self.write_dma_control(high, timers),
            GlobalRegister::DmaAddress => self.global.dma_address = data,
            GlobalRegister::DramAddressLow => {
                self.global.dram_address = (self.global.dram_address & 0xF_0000) | u32::from(data);
            }
            GlobalRegister::DramAddressHigh => {
                self.global.dram_address =
                    (self.global.dram_address & 0xFFFF) | (u32::from(high & 0x0F) << 16);
            }
            GlobalRegister::TimerControl => self.global.write_timer_control(high),
            GlobalRegister::Timer1Count => self.global.timers[0].load(high),
            GlobalRegister::Timer2Count => self.global.timers[1].load(high),
            GlobalRegister::SamplingFrequency => self.global.sampling_frequency = high,
            GlobalRegister::SamplingControl => self.global.sampling_control = high,
            GlobalRegister::JoystickTrim => self.global.joystick_trim = high,
            GlobalRegister::Reset => self.write_reset(high, timers),
        }
    }

    /// Execute a read of the selected register
    fn read_register(&mut self) -> u16 {
        let select = self.global.register_select;
        let Some(register) = Register::for_read(select) else {
            log::debug!("read of unknown register {select:#04x}");
            return self.global.data;
        };
        let voice = usize::from(self.global.voice_select);
        let byte = |value: u8| u16::from(value) << 8;

        match register {
            Register::Voice(VoiceRegister::IrqStatus) => {
                let status = self.global.read_voice_irq_status();
                self.update_irq();
                byte(status)
            }
            Register::Voice(VoiceRegister::ActiveVoices) => byte(0xC0 | (self.global.active_voices() - 1)),
            Register::Voice(register) => {
                let mut value = self.voices.read_register(voice, register);
                let mask = 1u32 << voice;
                let pending = match register {
                    VoiceRegister::WaveControl => self.global.wave_irq & mask != 0,
                    VoiceRegister::RampControl => self.global.ramp_irq & mask != 0,
                    _ => false,
                };
                if pending {
                    value |= 0x8000;
                }
                value
            }
            Register::Global(GlobalRegister::DmaControl) => {
                let control = self.global.dma_control;
                let mut value = control.control_byte() & 0xBF;
                if control.contains(DmaControl::TERMINAL_COUNT) {
                    value |= 0x40;
                }
                self.global.dma_control.remove(DmaControl::TERMINAL_COUNT);
                self.update_irq();
                byte(value)
            }
            Register::Global(GlobalRegister::DmaAddress) => self.global.dma_address,
            Register::Global(GlobalRegister::DramAddressLow) => self.global.dram_address as u16,
            Register::Global(GlobalRegister::DramAddressHigh) => byte((self.global.dram_address >> 16) as u8),
            Register::Global(GlobalRegister::TimerControl) => byte(self.global.timer_control.bits()),
            Register::Global(GlobalRegister::Timer1Count) => byte(self.global.timers[0].value),
            Register::Global(GlobalRegister::Timer2Count) => byte(self.global.timers[1].value),
            Register::Global(GlobalRegister::SamplingFrequency) => byte(self.global.sampling_frequency),
            Register::Global(GlobalRegister::SamplingControl) => byte(self.global.sampling_control),
            Register::Global(GlobalRegister::JoystickTrim) => byte(self.global.joystick_trim),
            Register::Global(GlobalRegister::Reset) => byte(self.global.reset_control()),
        }
    }
}

impl Peripheral for Gf1 {
    fn name(&self) -> &'static str {
        "gf1"
    }

    fn attach(&mut self, irq: IrqSource) {
        self.irq = irq;
        self.update_irq();
    }

    fn claims(&self, port: u16) -> bool {
        self.offset(port).is_some()
    }

    fn access_class(&self, port: u16, direction: Direction) -> AccessClass {
        let Some(offset) = self.offset(port) else {
            return AccessClass::Fast;
        };
        match (offset, direction) {
            (port::IRQ_STATUS, Direction::Read)
            | (port::TIMER_CONTROL, Direction::Write)
            | (port::DATA_LOW, Direction::Read)
            | (port::DATA_HIGH, _)
            | (port::DRAM_IO, _) => AccessClass::Slow,
            _ => AccessClass::Fast,
        }
    }

    fn on_port_write(&mut self, port: u16, value: u8, timers: &mut Timers<'_>) {
        let Some(offset) = self.offset(port) else {
            return;
        };
        match offset {
            port::MIX_CONTROL => self.global.mix_control = value,
            port::TIMER_STATUS => self.global.adlib_command = value,
            port::TIMER_CONTROL => {
                self.write_timer_command(value, timers);
                self.update_irq();
            }
            port::IRQ_DMA_SELECT => self.global.irq_dma_select = value,
            port::VOICE_SELECT => self.global.voice_select = value & 0x1F,
            port::REGISTER_SELECT => {
                self.global.register_select = value;
                self.global.data = 0;
            }
            port::DATA_LOW => self.global.data = (self.global.data & 0xFF00) | u16::from(value),
            port::DATA_HIGH => {
                self.global.data = (self.global.data & 0x00FF) | (u16::from(value) << 8);
                self.commit_register(timers);
            }
            port::DRAM_IO => self.voices.poke(self.global.dram_address, value),
            _ => log::debug!("write {value:#04x} to unhandled port {port:#05x}"),
        }
    }

    fn on_port_read(&mut self, port: u16, _timers: &mut Timers<'_>) -> u8 {
        let Some(offset) = self.offset(port) else {
            return crate::bus::OPEN_BUS;
        };
        match offset {
            port::IRQ_STATUS => self.global.effective_irq_status().bits(),
            port::TIMER_STATUS => self.global.timer_status(),
            port::ADLIB_LATCH => self.global.adlib_command,
            port::VOICE_SELECT => self.global.voice_select,
            port::REGISTER_SELECT => self.global.register_select,
            port::DATA_LOW => self.read_register() as u8,
            port::DATA_HIGH => (self.read_register() >> 8) as u8,
            port::DRAM_IO => self.voices.peek(self.global.dram_address),
            _ => crate::bus::OPEN_BUS,
        }
    }

    fn on_port_write16(&mut self, port: u16, value: u16, timers: &mut Timers<'_>) {
        if self.offset(port) == Some(port::DATA_LOW) {
            self.global.data = value;
            self.commit_register(timers);
        } else {
            self.on_port_write(port, value as u8, timers);
            self.on_port_write(port.wrapping_add(1), (value >> 8) as u8, timers);
        }
    }

    fn on_port_read16(&mut self, port: u16, timers: &mut Timers<'_>) -> u16 {
        if self.offset(port) == Some(port::DATA_LOW) {
            return self.read_register();
        }
        let low = self.on_port_read(port, timers);
        let high = self.on_port_read(port.wrapping_add(1), timers);
        u16::from(low) | (u16::from(high) << 8)
    }

    fn on_event(&mut self, kind: u16, _value: u32, _timers: &mut Timers<'_>) -> u32 {
        match GusEvent::from_u16(kind) {
            Some(GusEvent::Timer1) => self.timer_expired(0),
            Some(GusEvent::Timer2) => self.timer_expired(1),
            Some(GusEvent::Dma) => self.dma_tick(),
            None => {
                log::warn!("unknown GF1 event kind {kind}");
                0
            }
        }
    }

    fn mix(&mut self, acc_l: &mut i32, acc_r: &mut i32) {
        let mut left = 0i64;
        let mut right = 0i64;
        let mut raised = false;
        for voice in 0..usize::from(self.global.active_voices()) {
            let events = self.voices.mix_voice(voice, &mut left, &mut right);
            if events.wave_irq {
                self.global.set_wave_irq(voice, true);
                raised = true;
            }
            if events.ramp_irq {
                self.global.set_ramp_irq(voice, true);
                raised = true;
            }
        }
        if raised {
            self.global.check_voice_irq();
            self.update_irq();
        }

        *acc_l += i32::from(clamp_output(left >> 13));
        *acc_r += i32::from(clamp_output(right >> 13));
    }

    fn reinitialize(&mut self, settings: &Settings, timers: &mut Timers<'_>) {
        self.base_port = settings.base_port;
        self.dma_interval_override = settings.dma_interval_us;
        self.global.set_fixed_output(settings.fixed_sample_rate);
        self.global.latch_reset(0);
        self.reset(timers);
    }
}

fn clamp_output(value: i64) -> i16 {
    value.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::BufferTransport;
    use crate::irq::IrqLine;
    use crate::scheduler::EventScheduler;

    const BASE: u16 = 0x240;

    struct Rig {
        gus: Gf1,
        sched: EventScheduler,
        line: IrqLine,
    }

    impl Rig {
        fn new() -> Self {
            let mut gus = Gf1::new(&Settings::default());
            let line = IrqLine::new();
            gus.attach(line.source(0));
            Self {
                gus,
                sched: EventScheduler::new(),
                line,
            }
        }

        fn out(&mut self, offset: u16, value: u8) {
            self.gus
                .on_port_write(BASE + offset, value, &mut Timers::new(&mut self.sched, 0));
        }

        fn inp(&mut self, offset: u16) -> u8 {
            self.gus.on_port_read(BASE + offset, &mut Timers::new(&mut self.sched, 0))
        }

        fn write_reg(&mut self, select: u8, value: u16) {
            self.out(port::REGISTER_SELECT, select);
            self.gus.on_port_write16(
                BASE + port::DATA_LOW,
                value,
                &mut Timers::new(&mut self.sched, 0),
            );
        }

        fn write_reg8(&mut self, select: u8, value: u8) {
            self.out(port::REGISTER_SELECT, select);
            self.out(port::DATA_HIGH, value);
        }

        fn read_reg(&mut self, select: u8) -> u16 {
            self.out(port::REGISTER_SELECT, select);
            self.gus
                .on_port_read16(BASE + port::DATA_LOW, &mut Timers::new(&mut self.sched, 0))
        }

        fn run_until(&mut self, now_us: u64) {
            loop {
                self.sched.advance(now_us);
                let Some(fired) = self.sched.next_fired() else {
                    break;
                };
                let mut timers = Timers::new(&mut self.sched, 0);
                let result = self.gus.on_event(fired.key.kind, fired.value, &mut timers);
                self.sched.complete(fired, result);
            }
        }
    }

    #[test]
    fn test_claims_only_its_ports() {
        let rig = Rig::new();
        assert!(rig.gus.claims(0x240));
        assert!(rig.gus.claims(0x346));
        assert!(rig.gus.claims(0x347));
        assert!(!rig.gus.claims(0x348));
        assert!(!rig.gus.claims(0x250));
    }

    #[test]
    fn test_unknown_register_reads_latch() {
        let mut rig = Rig::new();
        rig.out(port::REGISTER_SELECT, 0x7E);
        rig.out(port::DATA_LOW, 0x34);
        assert_eq!(rig.inp(port::DATA_LOW), 0x34);
        assert_eq!(rig.inp(0x00F), 0xFF);
    }

    #[test]
    fn test_register_select_clears_latch() {
        let mut rig = Rig::new();
        rig.out(port::DATA_LOW, 0x12);
        rig.out(port::REGISTER_SELECT, 0x01);
        rig.out(port::DATA_HIGH, 0x80);
        assert_eq!(rig.gus.global().data, 0x8000);
    }

    #[test]
    fn test_active_voice_register() {
        let mut rig = Rig::new();
        rig.write_reg8(0x0E, 0xC0 | 27);
        assert_eq!(rig.gus.global().active_voices(), 28);
        assert_eq!(rig.read_reg(0x8E) >> 8, 0xC0 | 27);
        assert_eq!(rig.gus.global().rates().voice_rate, 22050);

        rig.write_reg8(0x0E, 0xC0 | 3);
        assert_eq!(rig.gus.global().active_voices(), 14);
    }

    #[test]
    fn test_reset_write_without_run_reads_back_zeroed_bits() {
        let mut rig = Rig::new();
        rig.write_reg8(0x4C, 0x06);
        assert_eq!(rig.read_reg(0x4C) >> 8, 0x00);
        rig.write_reg8(0x4C, 0x07);
        assert_eq!(rig.read_reg(0x4C) >> 8, 0x07);
    }

    #[test]
    fn test_reset_silences_voices_and_cancels_timers() {
        let mut rig = Rig::new();
        rig.write_reg8(0x4C, 0x07);
        rig.out(port::VOICE_SELECT, 4);
        rig.write_reg(0x09, 0xFFF0);
        rig.write_reg8(0x00, 0x08);
        rig.write_reg8(0x0E, 0xC0 | 31);
        rig.write_reg8(0x46, 0xF0);
        rig.out(port::TIMER_CONTROL, 0x01);
        assert!(rig.sched.is_active(crate::scheduler::EventKey::new(0, GusEvent::Timer1 as u16)));

        rig.write_reg8(0x4C, 0x00);
        let channel = rig.gus.voices().channel(4);
        assert_eq!(channel.ramp_vol(), 0);
        assert_eq!(channel.wave_control(), WaveControl::STOPPED);
        assert_eq!(rig.gus.global().active_voices(), 14);
        assert_eq!(rig.sched.active_count(), 0);
        assert!(!rig.gus.global().timers[0].running);
    }

    #[test]
    fn test_timer_fires_and_raises_irq() {
        let mut rig = Rig::new();
        rig.write_reg8(0x46, 0xFF); // 80 µs
        rig.write_reg8(0x45, 0x04);
        rig.out(port::TIMER_CONTROL, 0x01);

        rig.run_until(79);
        assert!(!rig.line.is_asserted());
        rig.run_until(80);
        assert!(rig.line.is_asserted());
        assert_eq!(rig.inp(port::IRQ_STATUS), IrqStatus::TIMER1.bits());
        assert_eq!(rig.inp(port::TIMER_STATUS), 0xC4);

        // Acknowledge by dropping the IRQ enable
        rig.write_reg8(0x45, 0x00);
        assert!(!rig.line.is_asserted());

        // Still running: next expiry 80 µs after the first
        let key = crate::scheduler::EventKey::new(0, GusEvent::Timer1 as u16);
        assert_eq!(rig.sched.due_time(key), Some(160));
    }

    #[test]
    fn test_timer_command_clears_reached() {
        let mut rig = Rig::new();
        rig.out(port::TIMER_CONTROL, 0x02);
        rig.run_until(320);
        assert_eq!(rig.inp(port::TIMER_STATUS), 0xA0);
        rig.out(port::TIMER_CONTROL, 0x80);
        assert_eq!(rig.inp(port::TIMER_STATUS), 0x00);
        // 0x80 leaves the run bits alone
        assert!(rig.gus.global().timers[1].running);
    }

    #[test]
    fn test_masked_timer_does_not_set_reached() {
        let mut rig = Rig::new();
        rig.out(port::TIMER_CONTROL, 0x41);
        rig.run_until(80);
        assert_eq!(rig.inp(port::TIMER_STATUS), 0x00);
    }

    #[test]
    fn test_dram_peek_poke() {
        let mut rig = Rig::new();
        rig.write_reg(0x43, 0x2345);
        rig.write_reg8(0x44, 0x01);
        rig.out(port::DRAM_IO, 0x5A);
        assert_eq!(rig.gus.voices().peek(0x12345), 0x5A);
        assert_eq!(rig.inp(port::DRAM_IO), 0x5A);
    }

    #[test]
    fn test_dma_upload_with_msb_inversion() {
        let mut rig = Rig::new();
        rig.gus
            .set_dma_transport(Box::new(BufferTransport::new(vec![0x80, 0x81, 0x7F, 0x00])));
        rig.write_reg(0x42, 0x0010); // DRAM 0x100
        rig.write_reg8(0x41, 0xA1); // enable, IRQ on TC, invert MSB

        rig.run_until(1_000);
        let ram = rig.gus.voices().ram();
        assert_eq!(
            [ram.peek(0x100), ram.peek(0x101), ram.peek(0x102), ram.peek(0x103)],
            [0x00, 0x01, 0xFF, 0x80]
        );
        assert!(!rig.gus.dma().is_running());
        assert!(rig.line.is_asserted());

        let control = rig.read_reg(0x41) >> 8;
        assert_eq!(control & 0x41, 0x40, "TC reported, enable auto-cleared");
        assert!(!rig.line.is_asserted(), "reading DMA control acknowledges TC");
        assert_eq!(rig.read_reg(0x41) >> 8 & 0x40, 0);
    }

    #[test]
    fn test_dma_16bit_channel_address_and_units() {
        let mut rig = Rig::new();
        rig.gus
            .set_dma_transport(Box::new(BufferTransport::new(vec![1, 2, 3, 4, 5, 6])));
        rig.write_reg(0x42, 0x4001);
        rig.write_reg8(0x41, 0x05); // enable, 16-bit channel

        // Three 2-byte units at 2 µs each
        rig.run_until(4);
        assert!(rig.gus.dma().is_running());
        rig.run_until(6);
        assert!(!rig.gus.dma().is_running());
        // ((1 << 1) | 0x4000) << 4
        assert_eq!(rig.gus.voices().peek(0x40020), 1);
        assert_eq!(rig.gus.voices().peek(0x40025), 6);
    }

    #[test]
    fn test_dma_rejected_while_running() {
        let mut rig = Rig::new();
        rig.gus
            .set_dma_transport(Box::new(BufferTransport::new(vec![0x11; 8])));
        rig.write_reg(0x42, 0x0000);
        rig.write_reg8(0x41, 0x01);
        rig.run_until(4);
        let remaining = rig.gus.dma().remaining_units();

        // A second enable write does not restart the transfer
        rig.write_reg(0x42, 0x0100);
        rig.write_reg8(0x41, 0x01);
        assert_eq!(rig.gus.dma().remaining_units(), remaining);
        rig.run_until(100);
        assert_eq!(rig.gus.voices().peek(0x1000), 0);
        assert_eq!(rig.gus.voices().peek(0x0007), 0x11);
    }

    #[test]
    fn test_reset_cancels_stalled_dma() {
        let mut rig = Rig::new();
        let mut transport = BufferTransport::new(vec![1, 2, 3]);
        transport.stalled = true;
        rig.gus.set_dma_transport(Box::new(transport));
        rig.write_reg8(0x41, 0x01);
        rig.run_until(10);
        assert!(rig.gus.dma().is_in_flight());

        rig.write_reg8(0x4C, 0x00);
        assert!(!rig.gus.dma().is_running());
        assert!(!rig.gus.dma().is_in_flight());
        assert_eq!(rig.sched.active_count(), 0);
        assert_eq!(rig.gus.global().dma_control, DmaControl::empty());
    }

    #[test]
    fn test_wave_irq_through_status_register() {
        let mut rig = Rig::new();
        rig.write_reg8(0x4C, 0x07);
        rig.gus.voices_mut().load(0, &[0; 64]);
        rig.out(port::VOICE_SELECT, 2);
        rig.write_reg(0x02, 0);
        rig.write_reg(0x03, 0);
        rig.write_reg(0x04, 0);
        rig.write_reg(0x05, 4 << 9); // end at byte 4
        rig.write_reg(0x0A, 0);
        rig.write_reg(0x0B, 0);
        rig.write_reg(0x01, 1024); // one byte per tick
        rig.write_reg8(0x00, 0x20); // run, IRQ at end

        let mut left = 0;
        let mut right = 0;
        for _ in 0..4 {
            rig.gus.mix(&mut left, &mut right);
        }
        assert!(!rig.line.is_asserted(), "sitting on the end byte");
        rig.gus.mix(&mut left, &mut right);
        assert!(rig.line.is_asserted());
        assert_eq!(rig.inp(port::IRQ_STATUS), IrqStatus::WAVE.bits());
        assert_eq!(rig.read_reg(0x80) >> 8, 0x80 | 0x20 | 0x01);

        let status = (rig.read_reg(0x8F) >> 8) as u8;
        assert_eq!(status, 0x20 | 0x40 | 2);
        assert!(!rig.line.is_asserted());
    }

    #[test]
    fn test_wave_control_write_can_raise_and_clear_irq() {
        let mut rig = Rig::new();
        rig.write_reg8(0x4C, 0x07);
        rig.out(port::VOICE_SELECT, 1);
        rig.write_reg8(0x00, 0xA3);
        assert!(rig.line.is_asserted());
        rig.write_reg8(0x00, 0x03);
        assert!(!rig.line.is_asserted());
    }

    #[test]
    fn test_output_is_silent_at_power_on() {
        let mut rig = Rig::new();
        let mut left = 0;
        let mut right = 0;
        rig.gus.mix(&mut left, &mut right);
        assert_eq!((left, right), (0, 0));
    }

    #[test]
    fn test_access_classes() {
        let rig = Rig::new();
        let class = |offset: u16, direction| rig.gus.access_class(BASE + offset, direction);
        assert_eq!(class(port::VOICE_SELECT, Direction::Write), AccessClass::Fast);
        assert_eq!(class(port::DATA_LOW, Direction::Write), AccessClass::Fast);
        assert_eq!(class(port::DATA_HIGH, Direction::Write), AccessClass::Slow);
        assert_eq!(class(port::DRAM_IO, Direction::Read), AccessClass::Slow);
        assert_eq!(class(port::IRQ_STATUS, Direction::Read), AccessClass::Slow);
        assert_eq!(class(port::TIMER_STATUS, Direction::Read), AccessClass::Fast);
    }
}
