//! Voice channels
//!
//! Each of the 32 voices runs two small state machines every output tick:
//! a wave generator walking a 10-bit-fraction address through sample memory
//! and a volume ramp walking a log-domain level. Both share the same
//! boundary policy: raise an IRQ if enabled, then loop, bounce or stop.
//!
//! Features:
//! - 8-bit and 16-bit samples with linear interpolation
//! - Forward, backward and bidirectional loops
//! - Wave rollover (IRQ without loop or stop) for streaming
//! - Per-voice read-ahead cache of sample memory

use super::memory::{remap_16bit, Dram, DRAM_MASK};
use super::registers::{RampControl, VoiceRegister, WaveControl};
use super::tables::{PanTable, Rates, VolumeTable, MAX_RAMP, RAMP_FRACT, WAVE_FRACT, WAVE_FRACT_MASK};

/// Number of voices on the chip
pub const VOICE_COUNT: usize = 32;

/// Pan position a voice resets to
pub const PAN_CENTER: u8 = 7;

/// Read-ahead block alignment
const CACHE_BLOCK: u32 = 16;

/// Bytes held per cache fill; covers the block plus the interpolation tail
const CACHE_BYTES: usize = 20;

/// Address registers hold 9 fraction bits; internal addresses hold 10
const IMAGE_SHIFT: u32 = WAVE_FRACT - 9;

/// Internal address width: 20 integer bits over the fraction
const ADDRESS_MASK: u32 = (DRAM_MASK << WAVE_FRACT) | WAVE_FRACT_MASK;

/// Boundary events produced by one voice tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceEvents {
    /// Wave boundary reached with IRQ enabled
    pub wave_irq: bool,
    /// Ramp boundary reached with IRQ enabled
    pub ramp_irq: bool,
}

/// Small read-ahead window over sample memory
#[derive(Debug, Clone)]
struct SampleCache {
    tag: Option<u32>,
    data: [u8; CACHE_BYTES],
}

impl SampleCache {
    fn new() -> Self {
        Self {
            tag: None,
            data: [0; CACHE_BYTES],
        }
    }

    fn offset(&self, address: u32) -> Option<usize> {
        let tag = self.tag?;
        let offset = address.wrapping_sub(tag) & DRAM_MASK;
        ((offset as usize) < CACHE_BYTES).then_some(offset as usize)
    }

    fn byte(&mut self, ram: &Dram, address: u32) -> u8 {
        let address = address & DRAM_MASK;
        if let Some(offset) = self.offset(address) {
            return self.data[offset];
        }
        let tag = address & !(CACHE_BLOCK - 1);
        ram.read_block(tag, &mut self.data);
        self.tag = Some(tag);
        self.data[(address - tag) as usize]
    }

    fn covers(&self, address: u32) -> bool {
        self.offset(address & DRAM_MASK).is_some()
    }

    fn invalidate(&mut self) {
        self.tag = None;
    }
}

/// One voice
#[derive(Debug, Clone)]
pub struct Channel {
    wave_start: u32,
    wave_end: u32,
    wave_addr: u32,
    wave_increment: u32,
    wave_frequency: u16,
    wave_control: WaveControl,

    ramp_start: i32,
    ramp_end: i32,
    ramp_vol: i32,
    ramp_rate: u8,
    ramp_increment: i32,
    ramp_control: RampControl,

    pan: u8,
    pan_left: i32,
    pan_right: i32,

    cache: SampleCache,
}

impl Channel {
    /// A voice as it comes out of power-on: both generators stopped
    pub fn new(pan_table: &PanTable) -> Self {
        let (pan_left, pan_right) = pan_table.attenuation(PAN_CENTER);
        Self {
            wave_start: 0,
            wave_end: 0,
            wave_addr: 0,
            wave_increment: 0,
            wave_frequency: 0,
            wave_control: WaveControl::HALTED,
            ramp_start: 0,
            ramp_end: 0,
            ramp_vol: 0,
            ramp_rate: 0,
            ramp_increment: 0,
            ramp_control: RampControl::HALTED,
            pan: PAN_CENTER,
            pan_left,
            pan_right,
            cache: SampleCache::new(),
        }
    }

    /// Current wave address (10 fraction bits)
    pub fn wave_addr(&self) -> u32 {
        self.wave_addr
    }

    /// Set the current wave address (10 fraction bits)
    pub fn set_wave_addr(&mut self, addr: u32) {
        self.wave_addr = addr;
    }

    /// Loop/boundary start (10 fraction bits)
    pub fn wave_start(&self) -> u32 {
        self.wave_start
    }

    /// Set the boundary start (10 fraction bits)
    pub fn set_wave_start(&mut self, addr: u32) {
        self.wave_start = addr;
    }

    /// Loop/boundary end (10 fraction bits)
    pub fn wave_end(&self) -> u32 {
        self.wave_end
    }

    /// Set the boundary end (10 fraction bits)
    pub fn set_wave_end(&mut self, addr: u32) {
        self.wave_end = addr;
    }

    /// Per-tick address step
    pub fn wave_increment(&self) -> u32 {
        self.wave_increment
    }

    /// Override the per-tick address step
    pub fn set_wave_increment(&mut self, increment: u32) {
        self.wave_increment = increment;
    }

    /// Wave control flags
    pub fn wave_control(&self) -> WaveControl {
        self.wave_control
    }

    /// Replace the wave control flags (the IRQ-pending bit is not stored)
    pub fn set_wave_control(&mut self, control: WaveControl) {
        self.wave_control = control - WaveControl::IRQ_PENDING;
    }

    /// Current ramp level (`volume index << RAMP_FRACT`)
    pub fn ramp_vol(&self) -> i32 {
        self.ramp_vol
    }

    /// Set the ramp level
    pub fn set_ramp_vol(&mut self, level: i32) {
        self.ramp_vol = level.clamp(0, MAX_RAMP - 1);
    }

    /// Set ramp bounds (ramp domain)
    pub fn set_ramp_bounds(&mut self, start: i32, end: i32) {
        self.ramp_start = start;
        self.ramp_end = end;
    }

    /// Per-tick ramp step
    pub fn ramp_increment(&self) -> i32 {
        self.ramp_increment
    }

    /// Override the per-tick ramp step
    pub fn set_ramp_increment(&mut self, increment: i32) {
        self.ramp_increment = increment;
    }

    /// Ramp control flags
    pub fn ramp_control(&self) -> RampControl {
        self.ramp_control
    }

    /// Replace the ramp control flags (the IRQ-pending bit is not stored)
    pub fn set_ramp_control(&mut self, control: RampControl) {
        self.ramp_control = control - RampControl::IRQ_PENDING;
    }

    /// Pan position, 0 = hard left, 15 = hard right
    pub fn pan(&self) -> u8 {
        self.pan
    }

    /// Set the pan position and derive the two attenuations
    pub fn set_pan(&mut self, pan: u8, table: &PanTable) {
        self.pan = pan & 0x0F;
        let (left, right) = table.attenuation(self.pan);
        self.pan_left = left;
        self.pan_right = right;
    }

    /// Left and right pan attenuation (ramp domain)
    pub fn pan_attenuation(&self) -> (i32, i32) {
        (self.pan_left, self.pan_right)
    }

    /// Recompute increments after the chip rate changed
    pub fn update_rates(&mut self, rates: &Rates) {
        self.wave_increment = rates.wave_increment(self.wave_frequency);
        self.ramp_increment = rates.ramp_increment(self.ramp_rate);
    }

    /// Advance the wave generator one tick. Returns `true` when a boundary
    /// was crossed with the IRQ enabled. Landing exactly on a boundary is not
    /// a crossing.
    ///
    /// Going backwards the pointer is compared unsigned after subtracting;
    /// with `start <= increment` it wraps through zero to the top of memory
    /// and keeps playing, as the chip does.
    pub fn advance_wave(&mut self) -> bool {
        if self.wave_control.is_halted() {
            return false;
        }

        let crossed = if self.wave_control.contains(WaveControl::DECREASING) {
            self.wave_addr = self.wave_addr.wrapping_sub(self.wave_increment) & ADDRESS_MASK;
            (self.wave_addr < self.wave_start).then(|| self.wave_start - self.wave_addr)
        } else {
            self.wave_addr = self.wave_addr.wrapping_add(self.wave_increment) & ADDRESS_MASK;
            (self.wave_addr > self.wave_end).then(|| self.wave_addr - self.wave_end)
        };
        let Some(overshoot) = crossed else {
            return false;
        };

        let irq = self.wave_control.contains(WaveControl::IRQ_ENABLE);
        if self.ramp_control.contains(RampControl::ROLLOVER) {
            return irq;
        }

        if self.wave_control.contains(WaveControl::LOOP) {
            if self.wave_control.contains(WaveControl::BIDIRECTIONAL) {
                self.wave_control.toggle(WaveControl::DECREASING);
            }
            self.wave_addr = if self.wave_control.contains(WaveControl::DECREASING) {
                self.wave_end.wrapping_sub(overshoot)
            } else {
                self.wave_start.wrapping_add(overshoot)
            } & ADDRESS_MASK;
        } else {
            self.wave_control.insert(WaveControl::STOPPED);
            self.wave_addr = if self.wave_control.contains(WaveControl::DECREASING) {
                self.wave_start
            } else {
                self.wave_end
            };
        }
        irq
    }

    /// Advance the volume ramp one tick. Returns `true` when a boundary was
    /// crossed with the IRQ enabled. The level stays within `[0, MAX_RAMP)`.
    pub fn advance_ramp(&mut self) -> bool {
        if self.ramp_control.is_halted() {
            return false;
        }

        let overshoot = if self.ramp_control.contains(RampControl::DECREASING) {
            self.ramp_vol -= self.ramp_increment;
            self.ramp_start - self.ramp_vol
        } else {
            self.ramp_vol += self.ramp_increment;
            self.ramp_vol - self.ramp_end
        };
        if overshoot <= 0 {
            self.ramp_vol = self.ramp_vol.clamp(0, MAX_RAMP - 1);
            return false;
        }

        let irq = self.ramp_control.contains(RampControl::IRQ_ENABLE);
        if self.ramp_control.contains(RampControl::LOOP) {
            if self.ramp_control.contains(RampControl::BIDIRECTIONAL) {
                self.ramp_control.toggle(RampControl::DECREASING);
            }
            self.ramp_vol = if self.ramp_control.contains(RampControl::DECREASING) {
                self.ramp_end - overshoot
            } else {
                self.ramp_start + overshoot
            };
        } else {
            self.ramp_control.insert(RampControl::STOPPED);
            self.ramp_vol = if self.ramp_control.contains(RampControl::DECREASING) {
                self.ramp_start
            } else {
                self.ramp_end
            };
        }
        self.ramp_vol = self.ramp_vol.clamp(0, MAX_RAMP - 1);
        irq
    }

    /// Interpolated sample at the current address, scaled to 16 bits
    pub fn fetch_sample(&mut self, ram: &Dram) -> i32 {
        let index = self.wave_addr >> WAVE_FRACT;
        let fraction = (self.wave_addr & WAVE_FRACT_MASK) as i32;

        let (first, second) = if self.wave_control.contains(WaveControl::SIXTEEN_BIT) {
            let byte_addr = remap_16bit(index);
            (
                self.word_at(ram, byte_addr),
                self.word_at(ram, byte_addr.wrapping_add(2)),
            )
        } else {
            (
                i32::from(self.cache.byte(ram, index) as i8) << 8,
                i32::from(self.cache.byte(ram, index.wrapping_add(1)) as i8) << 8,
            )
        };

        first + (((second - first) * fraction) >> WAVE_FRACT)
    }

    fn word_at(&mut self, ram: &Dram, address: u32) -> i32 {
        let low = self.cache.byte(ram, address);
        let high = self.cache.byte(ram, address.wrapping_add(1));
        i32::from(i16::from_le_bytes([low, high]))
    }

    /// Add this voice's output for one tick to the accumulators.
    ///
    /// Runs whether or not the voice is stopped: a stopped voice keeps
    /// presenting the sample at its parked address.
    pub fn mix(&mut self, ram: &Dram, volume: &VolumeTable, acc_l: &mut i64, acc_r: &mut i64) {
        let sample = i64::from(self.fetch_sample(ram));
        *acc_l += sample * i64::from(volume.gain(self.ramp_vol - self.pan_left));
        *acc_r += sample * i64::from(volume.gain(self.ramp_vol - self.pan_right));
    }

    /// Does the read-ahead cache hold `address`?
    pub fn cache_covers(&self, address: u32) -> bool {
        self.cache.covers(address)
    }

    /// Drop the read-ahead cache
    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// Put the voice in its reset state: silent, stopped, centred
    pub fn reset(&mut self, pan_table: &PanTable) {
        self.ramp_vol = 0;
        self.wave_control = WaveControl::STOPPED;
        self.ramp_control = RampControl::STOPPED;
        self.set_pan(PAN_CENTER, pan_table);
        self.cache.invalidate();
    }
}

fn set_image_high(addr: u32, data: u16) -> u32 {
    let image = (addr >> IMAGE_SHIFT) & 0xFFFF;
    (image | (u32::from(data & 0x1FFF) << 16)) << IMAGE_SHIFT
}

fn set_image_low(addr: u32, data: u16) -> u32 {
    let image = (addr >> IMAGE_SHIFT) & 0x1FFF_0000;
    (image | u32::from(data)) << IMAGE_SHIFT
}

fn image_high(addr: u32) -> u16 {
    ((addr >> IMAGE_SHIFT >> 16) & 0x1FFF) as u16
}

fn image_low(addr: u32) -> u16 {
    (addr >> IMAGE_SHIFT) as u16
}

/// The 32 voices, the sample memory they play from and the shared
/// volume/pan tables
#[derive(Debug, Clone)]
pub struct ChannelBank {
    channels: [Channel; VOICE_COUNT],
    ram: Dram,
    volume: VolumeTable,
    pan: PanTable,
}

impl ChannelBank {
    /// Power-on bank at the given rates
    pub fn new(rates: &Rates) -> Self {
        let pan = PanTable::new();
        let mut bank = Self {
            channels: std::array::from_fn(|_| Channel::new(&pan)),
            ram: Dram::new(),
            volume: VolumeTable::new(),
            pan,
        };
        bank.set_rates(rates);
        bank
    }

    /// Voice `index` (wrapped to the voice count)
    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index % VOICE_COUNT]
    }

    /// Mutable voice `index` (wrapped to the voice count)
    pub fn channel_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index % VOICE_COUNT]
    }

    /// Sample memory
    pub fn ram(&self) -> &Dram {
        &self.ram
    }

    /// Read one byte of sample memory
    pub fn peek(&self, address: u32) -> u8 {
        self.ram.peek(address)
    }

    /// Write one byte of sample memory, dropping any cache that holds it
    pub fn poke(&mut self, address: u32, value: u8) {
        self.ram.poke(address, value);
        for channel in &mut self.channels {
            if channel.cache_covers(address) {
                channel.invalidate_cache();
            }
        }
    }

    /// Bulk-load sample memory
    pub fn load(&mut self, address: u32, data: &[u8]) {
        self.ram.load(address, data);
        self.invalidate_caches();
    }

    /// Drop every voice's read-ahead cache
    pub fn invalidate_caches(&mut self) {
        for channel in &mut self.channels {
            channel.invalidate_cache();
        }
    }

    /// Propagate new chip rates to every voice
    pub fn set_rates(&mut self, rates: &Rates) {
        for channel in &mut self.channels {
            channel.update_rates(rates);
        }
    }

    /// Reset every voice
    pub fn reset_voices(&mut self) {
        let pan = self.pan;
        for channel in &mut self.channels {
            channel.reset(&pan);
        }
    }

    /// Apply a register write to voice `index`. 8-bit registers take the
    /// high byte of `data`. Device-wide and read-only selects are ignored here.
    pub fn write_register(&mut self, index: usize, register: VoiceRegister, data: u16, rates: &Rates) {
        let pan = self.pan;
        let channel = self.channel_mut(index);
        let high = (data >> 8) as u8;
        match register {
            VoiceRegister::WaveControl => channel.set_wave_control(WaveControl::from_register(high)),
            VoiceRegister::Frequency => {
                channel.wave_frequency = data;
                channel.wave_increment = rates.wave_increment(data);
            }
            VoiceRegister::StartHigh => channel.wave_start = set_image_high(channel.wave_start, data),
            VoiceRegister::StartLow => channel.wave_start = set_image_low(channel.wave_start, data),
            VoiceRegister::EndHigh => channel.wave_end = set_image_high(channel.wave_end, data),
            VoiceRegister::EndLow => channel.wave_end = set_image_low(channel.wave_end, data),
            VoiceRegister::RampRate => {
                channel.ramp_rate = high;
                channel.ramp_increment = rates.ramp_increment(high);
            }
            VoiceRegister::RampStart => channel.ramp_start = (i32::from(high) << 4) << RAMP_FRACT,
            VoiceRegister::RampEnd => channel.ramp_end = (i32::from(high) << 4) << RAMP_FRACT,
            VoiceRegister::Volume => channel.ramp_vol = i32::from(data >> 4) << RAMP_FRACT,
            VoiceRegister::AddressHigh => channel.wave_addr = set_image_high(channel.wave_addr, data),
            VoiceRegister::AddressLow => channel.wave_addr = set_image_low(channel.wave_addr, data),
            VoiceRegister::Pan => channel.set_pan(high, &pan),
            VoiceRegister::RampControl => channel.set_ramp_control(RampControl::from_register(high)),
            VoiceRegister::ActiveVoices | VoiceRegister::IrqStatus => {}
        }
    }

    /// Register image of voice `index`, without IRQ-pending bits.
    /// Device-wide and status selects read as zero here.
    pub fn read_register(&self, index: usize, register: VoiceRegister) -> u16 {
        let channel = self.channel(index);
        let byte = |value: u8| u16::from(value) << 8;
        match register {
            VoiceRegister::WaveControl => byte(channel.wave_control.bits()),
            VoiceRegister::Frequency => channel.wave_frequency,
            VoiceRegister::StartHigh => image_high(channel.wave_start),
            VoiceRegister::StartLow => image_low(channel.wave_start),
            VoiceRegister::EndHigh => image_high(channel.wave_end),
            VoiceRegister::EndLow => image_low(channel.wave_end),
            VoiceRegister::RampRate => byte(channel.ramp_rate),
            VoiceRegister::RampStart => byte((channel.ramp_start >> RAMP_FRACT >> 4) as u8),
            VoiceRegister::RampEnd => byte((channel.ramp_end >> RAMP_FRACT >> 4) as u8),
            VoiceRegister::Volume => ((channel.ramp_vol >> RAMP_FRACT) << 4) as u16,
            VoiceRegister::AddressHigh => image_high(channel.wave_addr),
            VoiceRegister::AddressLow => image_low(channel.wave_addr),
            VoiceRegister::Pan => byte(channel.pan),
            VoiceRegister::RampControl => byte(channel.ramp_control.bits()),
            VoiceRegister::ActiveVoices | VoiceRegister::IrqStatus => 0,
        }
    }

    /// One output tick of voice `index`: mix, then advance both generators
    pub fn mix_voice(&mut self, index: usize, acc_l: &mut i64, acc_r: &mut i64) -> VoiceEvents {
        let channel = &mut self.channels[index % VOICE_COUNT];
        channel.mix(&self.ram, &self.volume, acc_l, acc_r);
        VoiceEvents {
            wave_irq: channel.advance_wave(),
            ramp_irq: channel.advance_ramp(),
        }
    }
}
