//! GF1 Register Definitions
//!
//! The card exposes a handful of direct I/O ports at fixed offsets from its
//! base, and an indirect register file reached through the register-select
//! port (`base + 0x103`) and the 16-bit data ports (`base + 0x104/0x105`).
//!
//! Voice registers are written at selects 0x00-0x0E and read back at
//! 0x80-0x8F. Global registers use the same select for reads and writes.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt;

/// Port offsets from the card base
pub mod port {
    /// Mix control (write)
    pub const MIX_CONTROL: u16 = 0x000;
    /// IRQ status (read)
    pub const IRQ_STATUS: u16 = 0x006;
    /// Timer status (read) / AdLib command latch (write)
    pub const TIMER_STATUS: u16 = 0x008;
    /// Timer control (write)
    pub const TIMER_CONTROL: u16 = 0x009;
    /// AdLib command latch readback
    pub const ADLIB_LATCH: u16 = 0x00A;
    /// IRQ / DMA channel select latch
    pub const IRQ_DMA_SELECT: u16 = 0x00B;
    /// Voice select
    pub const VOICE_SELECT: u16 = 0x102;
    /// Register select
    pub const REGISTER_SELECT: u16 = 0x103;
    /// Register data, low byte
    pub const DATA_LOW: u16 = 0x104;
    /// Register data, high byte
    pub const DATA_HIGH: u16 = 0x105;
    /// DRAM peek/poke at the latched DRAM address
    pub const DRAM_IO: u16 = 0x107;
}

/// Per-voice register, selected together with the voice-select port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum VoiceRegister {
    /// Wave control (8-bit, high byte)
    WaveControl = 0x00,
    /// Frequency control (16-bit)
    Frequency = 0x01,
    /// Start address, high word
    StartHigh = 0x02,
    /// Start address, low word
    StartLow = 0x03,
    /// End address, high word
    EndHigh = 0x04,
    /// End address, low word
    EndLow = 0x05,
    /// Volume ramp rate (8-bit)
    RampRate = 0x06,
    /// Volume ramp start (8-bit)
    RampStart = 0x07,
    /// Volume ramp end (8-bit)
    RampEnd = 0x08,
    /// Current volume (16-bit, top 12 bits used)
    Volume = 0x09,
    /// Current address, high word
    AddressHigh = 0x0A,
    /// Current address, low word
    AddressLow = 0x0B,
    /// Pan position (8-bit, low nibble used)
    Pan = 0x0C,
    /// Volume ramp control (8-bit)
    RampControl = 0x0D,
    /// Active voice count (8-bit, device-wide)
    ActiveVoices = 0x0E,
    /// Voice IRQ status (read only, self-clearing)
    IrqStatus = 0x0F,
}

/// Device-wide register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum GlobalRegister {
    /// DMA control; reading acknowledges Terminal Count
    DmaControl = 0x41,
    /// DMA start address (DRAM address >> 4)
    DmaAddress = 0x42,
    /// DRAM peek/poke address, bits 15-0
    DramAddressLow = 0x43,
    /// DRAM peek/poke address, bits 19-16
    DramAddressHigh = 0x44,
    /// Timer control (IRQ enables)
    TimerControl = 0x45,
    /// Timer 1 reload count
    Timer1Count = 0x46,
    /// Timer 2 reload count
    Timer2Count = 0x47,
    /// Sampling (ADC) frequency
    SamplingFrequency = 0x48,
    /// Sampling (ADC) control
    SamplingControl = 0x49,
    /// Joystick trim DAC
    JoystickTrim = 0x4B,
    /// Reset / run control
    Reset = 0x4C,
}

/// A decoded register select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Register of the selected voice
    Voice(VoiceRegister),
    /// Device-wide register
    Global(GlobalRegister),
}

/// Bit marking a voice-register select as a read
pub const READ_FLAG: u8 = 0x80;

impl Register {
    /// Decode a select used for a write. Read-only and unknown selects
    /// decode to `None`.
    pub fn for_write(select: u8) -> Option<Self> {
        match select {
            0x00..=0x0E => VoiceRegister::from_u8(select).map(Register::Voice),
            _ => GlobalRegister::from_u8(select).map(Register::Global),
        }
    }

    /// Decode a select used for a read
    pub fn for_read(select: u8) -> Option<Self> {
        match select {
            0x80..=0x8F => VoiceRegister::from_u8(select & 0x0F).map(Register::Voice),
            _ => GlobalRegister::from_u8(select).map(Register::Global),
        }
    }
}

impl fmt::Display for VoiceRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceRegister::WaveControl => "Wave Control",
            VoiceRegister::Frequency => "Frequency",
            VoiceRegister::StartHigh => "Start Address High",
            VoiceRegister::StartLow => "Start Address Low",
            VoiceRegister::EndHigh => "End Address High",
            VoiceRegister::EndLow => "End Address Low",
            VoiceRegister::RampRate => "Ramp Rate",
            VoiceRegister::RampStart => "Ramp Start",
            VoiceRegister::RampEnd => "Ramp End",
            VoiceRegister::Volume => "Current Volume",
            VoiceRegister::AddressHigh => "Current Address High",
            VoiceRegister::AddressLow => "Current Address Low",
            VoiceRegister::Pan => "Pan Position",
            VoiceRegister::RampControl => "Ramp Control",
            VoiceRegister::ActiveVoices => "Active Voices",
            VoiceRegister::IrqStatus => "Voice IRQ Status",
        };
        write!(f, "{:#04x} ({})", *self as u8, name)
    }
}

impl fmt::Display for GlobalRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GlobalRegister::DmaControl => "DMA Control",
            GlobalRegister::DmaAddress => "DMA Address",
            GlobalRegister::DramAddressLow => "DRAM Address Low",
            GlobalRegister::DramAddressHigh => "DRAM Address High",
            GlobalRegister::TimerControl => "Timer Control",
            GlobalRegister::Timer1Count => "Timer 1 Count",
            GlobalRegister::Timer2Count => "Timer 2 Count",
            GlobalRegister::SamplingFrequency => "Sampling Frequency",
            GlobalRegister::SamplingControl => "Sampling Control",
            GlobalRegister::JoystickTrim => "Joystick Trim",
            GlobalRegister::Reset => "Reset",
        };
        write!(f, "{:#04x} ({})", *self as u8, name)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Voice(reg) => write!(f, "voice {reg}"),
            Register::Global(reg) => write!(f, "global {reg}"),
        }
    }
}

bitflags! {
    /// Wave control byte (voice register 0x00)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaveControl: u8 {
        /// Voice is stopped
        const STOPPED = 0x01;
        /// Stop request
        const STOP = 0x02;
        /// 16-bit samples
        const SIXTEEN_BIT = 0x04;
        /// Loop at the boundary
        const LOOP = 0x08;
        /// Bidirectional loop
        const BIDIRECTIONAL = 0x10;
        /// Raise the wave IRQ at the boundary
        const IRQ_ENABLE = 0x20;
        /// Play backwards
        const DECREASING = 0x40;
        /// Wave IRQ pending (read only)
        const IRQ_PENDING = 0x80;
    }
}

impl WaveControl {
    /// Either stop bit set
    pub const HALTED: WaveControl = WaveControl::STOPPED.union(WaveControl::STOP);

    /// Create flags from a raw register value
    pub fn from_register(value: u8) -> Self {
        WaveControl::from_bits_truncate(value)
    }

    /// Is the generator halted?
    pub fn is_halted(&self) -> bool {
        self.intersects(Self::HALTED)
    }
}

bitflags! {
    /// Volume ramp control byte (voice register 0x0D)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RampControl: u8 {
        /// Ramp is stopped
        const STOPPED = 0x01;
        /// Stop request
        const STOP = 0x02;
        /// Wave rollover: IRQ at the wave boundary but keep playing
        const ROLLOVER = 0x04;
        /// Loop at the boundary
        const LOOP = 0x08;
        /// Bidirectional loop
        const BIDIRECTIONAL = 0x10;
        /// Raise the ramp IRQ at the boundary
        const IRQ_ENABLE = 0x20;
        /// Ramp downwards
        const DECREASING = 0x40;
        /// Ramp IRQ pending (read only)
        const IRQ_PENDING = 0x80;
    }
}

impl RampControl {
    /// Either stop bit set
    pub const HALTED: RampControl = RampControl::STOPPED.union(RampControl::STOP);

    /// Create flags from a raw register value
    pub fn from_register(value: u8) -> Self {
        RampControl::from_bits_truncate(value)
    }

    /// Is the ramp halted?
    pub fn is_halted(&self) -> bool {
        self.intersects(Self::HALTED)
    }
}

bitflags! {
    /// DMA control (global register 0x41). Terminal Count lives at bit 8 so
    /// it never collides with a legal control byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaControl: u16 {
        /// Transfer enable
        const ENABLE = 0x01;
        /// Direction: set = card to host
        const TO_HOST = 0x02;
        /// Host channel is 16-bit
        const CHANNEL_16BIT = 0x04;
        /// Rate divisor, low bit
        const RATE_LOW = 0x08;
        /// Rate divisor, high bit
        const RATE_HIGH = 0x10;
        /// Raise an IRQ at Terminal Count
        const IRQ_ENABLE = 0x20;
        /// Data is 16-bit samples
        const DATA_16BIT = 0x40;
        /// Invert the sample MSB (unsigned host data)
        const INVERT_MSB = 0x80;
        /// Terminal Count reached
        const TERMINAL_COUNT = 0x100;
    }
}

impl DmaControl {
    /// Rate divisor field (0-3)
    pub fn rate(&self) -> usize {
        ((self.bits() >> 3) & 0x03) as usize
    }

    /// Control byte as the host wrote it, without Terminal Count
    pub fn control_byte(&self) -> u8 {
        (self.bits() & 0xFF) as u8
    }
}

bitflags! {
    /// Timer control (global register 0x45)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerControl: u8 {
        /// Timer 1 raises an IRQ on expiry
        const TIMER1_IRQ = 0x04;
        /// Timer 2 raises an IRQ on expiry
        const TIMER2_IRQ = 0x08;
    }
}

bitflags! {
    /// Reset register (global register 0x4C)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResetControl: u8 {
        /// Run; clear to hold the synthesizer in reset
        const RUN = 0x01;
        /// DAC enable
        const DAC_ENABLE = 0x02;
        /// Master IRQ enable
        const IRQ_ENABLE = 0x04;
    }
}

bitflags! {
    /// Effective IRQ status (port `base + 0x006`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqStatus: u8 {
        /// Timer 1 expired
        const TIMER1 = 0x04;
        /// Timer 2 expired
        const TIMER2 = 0x08;
        /// A voice hit a wave boundary
        const WAVE = 0x20;
        /// A voice hit a ramp boundary
        const RAMP = 0x40;
        /// DMA Terminal Count
        const DMA_TC = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_select_decoding() {
        assert_eq!(
            Register::for_write(0x00),
            Some(Register::Voice(VoiceRegister::WaveControl))
        );
        assert_eq!(
            Register::for_write(0x0E),
            Some(Register::Voice(VoiceRegister::ActiveVoices))
        );
        assert_eq!(Register::for_write(0x0F), None, "IRQ status is read only");
        assert_eq!(
            Register::for_write(0x4C),
            Some(Register::Global(GlobalRegister::Reset))
        );
        assert_eq!(Register::for_write(0x4A), None);
        assert_eq!(Register::for_write(0x8A), None);
    }

    #[test]
    fn test_read_select_decoding() {
        assert_eq!(
            Register::for_read(0x8F),
            Some(Register::Voice(VoiceRegister::IrqStatus))
        );
        assert_eq!(
            Register::for_read(0x8A),
            Some(Register::Voice(VoiceRegister::AddressHigh))
        );
        assert_eq!(
            Register::for_read(0x41),
            Some(Register::Global(GlobalRegister::DmaControl))
        );
        assert_eq!(Register::for_read(0x0A), None);
    }

    #[test]
    fn test_control_flags() {
        assert!(WaveControl::from_register(0x03).is_halted());
        assert!(WaveControl::from_register(0x02).is_halted());
        assert!(!WaveControl::from_register(0x28).is_halted());

        let dma = DmaControl::from_bits_truncate(0x1B9);
        assert_eq!(dma.rate(), 3);
        assert_eq!(dma.control_byte(), 0xB9);
        assert!(dma.contains(DmaControl::TERMINAL_COUNT));
    }

    #[test]
    fn test_display_names_register() {
        assert_eq!(
            Register::Global(GlobalRegister::Reset).to_string(),
            "global 0x4c (Reset)"
        );
    }
}
