//! Rate, volume and pan tables
//!
//! The GF1 output rate depends on how many voices it has to cycle through;
//! the volume register is logarithmic and pan is applied as an attenuation
//! in the same log domain before the linear lookup.

use crate::config::FIXED_OUTPUT_RATE;

/// Fraction bits of the ramp (volume) accumulator
pub const RAMP_FRACT: u32 = 10;

/// Fraction bits of the wave address accumulator
pub const WAVE_FRACT: u32 = 10;

/// Mask of the wave address fraction
pub const WAVE_FRACT_MASK: u32 = (1 << WAVE_FRACT) - 1;

/// Number of entries in the log volume table
pub const VOLUME_STEPS: usize = 4096;

/// Exclusive upper bound of the ramp accumulator
pub const MAX_RAMP: i32 = (VOLUME_STEPS as i32) << RAMP_FRACT;

/// Fewest voices the chip will cycle through
pub const MIN_ACTIVE_VOICES: u8 = 14;

/// Most voices the chip can cycle through
pub const MAX_ACTIVE_VOICES: u8 = 32;

/// Output rate by active voice count, indexed by `count - 1`.
/// Counts below 14 are clamped by the chip, so their rows repeat 44.1 kHz.
pub const VOICE_RATES: [u32; 32] = [
    44100, 44100, 44100, 44100, 44100, 44100, 44100, 44100, //
    44100, 44100, 44100, 44100, 44100, 44100, 41160, 38587, //
    36317, 34300, 32494, 30870, 29400, 28063, 26843, 25725, //
    24696, 23746, 22866, 22050, 21289, 20580, 19916, 19293,
];

/// Output rate for `count` active voices (clamped to the legal range)
pub fn voice_rate(count: u8) -> u32 {
    let count = count.clamp(MIN_ACTIVE_VOICES, MAX_ACTIVE_VOICES);
    VOICE_RATES[count as usize - 1]
}

/// Rate context the per-tick increments are derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rates {
    /// Native chip rate for the current active voice count
    pub voice_rate: u32,
    /// Rate the mixer is actually ticked at
    pub output_rate: u32,
}

impl Rates {
    /// Rates for `count` active voices. With `fixed_output` the mixer runs
    /// at 44.1 kHz and increments are scaled, otherwise at the native rate.
    pub fn for_voices(count: u8, fixed_output: bool) -> Self {
        let voice_rate = voice_rate(count);
        Self {
            voice_rate,
            output_rate: if fixed_output { FIXED_OUTPUT_RATE } else { voice_rate },
        }
    }

    fn scale(&self) -> f64 {
        f64::from(self.voice_rate) / f64::from(self.output_rate.max(1))
    }

    /// Wave address step for frequency control value `frequency`
    /// (`frequency >> 1` is in 1/512 sample units per chip tick).
    pub fn wave_increment(&self, frequency: u16) -> u32 {
        let per_tick = f64::from(frequency >> 1) / 512.0;
        (per_tick * self.scale() * f64::from(1u32 << WAVE_FRACT)) as u32
    }

    /// Ramp step for rate register `rate`: 6-bit increment, 2-bit range
    /// dividing it by 1, 8, 64 or 512.
    pub fn ramp_increment(&self, rate: u8) -> i32 {
        let scale = f64::from(rate & 0x3F);
        let divider = f64::from(1u32 << (3 * u32::from(rate >> 6)));
        (scale / divider * self.scale() * f64::from(1u32 << RAMP_FRACT)) as i32
    }
}

/// Log-to-linear volume table: 4096 steps of about 0.0235 dB, topping out
/// at 8192 (13 bits).
#[derive(Debug, Clone)]
pub struct VolumeTable {
    levels: Box<[i32; VOLUME_STEPS]>,
}

impl VolumeTable {
    /// Build the table
    pub fn new() -> Self {
        let mut levels = Box::new([0i32; VOLUME_STEPS]);
        let mut out = f64::from(1u32 << 13);
        for level in levels.iter_mut().rev() {
            *level = out as i32;
            out /= 1.002709201;
        }
        Self { levels }
    }

    /// Linear gain for a ramp-domain volume (`index << RAMP_FRACT` units)
    #[inline]
    pub fn gain(&self, ramp_volume: i32) -> i32 {
        let index = (ramp_volume.max(0) >> RAMP_FRACT) as usize;
        self.levels[index.min(VOLUME_STEPS - 1)]
    }
}

impl Default for VolumeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Pan attenuation in ramp-domain units, indexed by distance from the
/// opposite side (0 = fully attenuated, 15 = none).
#[derive(Debug, Clone, Copy)]
pub struct PanTable {
    attenuation: [i32; 16],
}

impl PanTable {
    /// Build the table (-6 dB per halving of the pan weight)
    pub fn new() -> Self {
        let mut attenuation = [0i32; 16];
        attenuation[0] = MAX_RAMP;
        for (i, slot) in attenuation.iter_mut().enumerate().skip(1) {
            let weight = i as f64 / 15.0;
            *slot = (-128.0 * weight.log2() * f64::from(1u32 << RAMP_FRACT)) as i32;
        }
        Self { attenuation }
    }

    /// Left and right attenuation for pan position `pan` (0 = hard left)
    #[inline]
    pub fn attenuation(&self, pan: u8) -> (i32, i32) {
        let pan = (pan & 0x0F) as usize;
        (self.attenuation[15 - pan], self.attenuation[pan])
    }
}

impl Default for PanTable {
    fn default() -> Self {
        Self::new()
    }
}
