//! GF1 global register file
//!
//! Device-wide state: register/voice selects and the data latch, the DRAM
//! peek/poke pointer, DMA control, the two hardware timers, the active voice
//! count and every raw IRQ cause. The IRQ status the host sees is never
//! stored; [`GlobalRegisterFile::effective_irq_status`] derives it from the
//! causes each time.

use super::registers::{DmaControl, IrqStatus, ResetControl, TimerControl};
use super::tables::{Rates, MAX_ACTIVE_VOICES, MIN_ACTIVE_VOICES};

/// Mix control value after reset (line in off, output on, latches enabled)
pub const MIX_CONTROL_RESET: u8 = 0x0B;

/// AdLib command latch after reset
pub const ADLIB_LATCH_RESET: u8 = 0x55;

/// Timer 1 resolution in microseconds
pub const TIMER1_TICK_US: u32 = 80;

/// Timer 2 resolution in microseconds
pub const TIMER2_TICK_US: u32 = 320;

/// One of the two GF1 countdown timers
#[derive(Debug, Clone)]
pub struct HwTimer {
    tick_us: u32,
    /// Reload count; period is `256 - value` ticks
    pub value: u8,
    /// Expired since the host last cleared it
    pub reached: bool,
    /// Expiry raises the timer IRQ
    pub raise_irq: bool,
    /// Expiry does not set `reached`
    pub masked: bool,
    /// Counting
    pub running: bool,
    /// IRQ cause flag
    pub irq: bool,
}

impl HwTimer {
    /// Stopped timer with the given resolution
    pub fn new(tick_us: u32) -> Self {
        let mut timer = Self {
            tick_us,
            value: 0,
            reached: false,
            raise_irq: false,
            masked: false,
            running: false,
            irq: false,
        };
        timer.reset();
        timer
    }

    /// Back to the power-on state
    pub fn reset(&mut self) {
        self.value = 0xFF;
        self.reached = false;
        self.raise_irq = false;
        self.masked = false;
        self.running = false;
        self.irq = false;
    }

    /// Set the reload count
    pub fn load(&mut self, value: u8) {
        self.value = value;
    }

    /// Period in microseconds
    pub fn delay_us(&self) -> u32 {
        (256 - u32::from(self.value)) * self.tick_us
    }

    /// Expiry. Returns the reschedule interval, 0 once stopped.
    pub fn expire(&mut self) -> u32 {
        if !self.masked {
            self.reached = true;
        }
        if self.raise_irq {
            self.irq = true;
        }
        if self.running {
            self.delay_us()
        } else {
            0
        }
    }
}

/// Device-wide register state
#[derive(Debug, Clone)]
pub struct GlobalRegisterFile {
    /// Selected voice (0-31)
    pub voice_select: u8,
    /// Selected register
    pub register_select: u8,
    /// 16-bit data latch
    pub data: u16,
    /// DRAM peek/poke address (20 bits)
    pub dram_address: u32,
    /// DMA control plus Terminal Count at bit 8
    pub dma_control: DmaControl,
    /// DMA start address (DRAM address >> 4)
    pub dma_address: u16,
    /// Timer 1 (80 µs) and timer 2 (320 µs)
    pub timers: [HwTimer; 2],
    /// Timer control register
    pub timer_control: TimerControl,
    /// Pending wave IRQ per voice
    pub wave_irq: u32,
    /// Pending ramp IRQ per voice
    pub ramp_irq: u32,
    /// Mix control port latch
    pub mix_control: u8,
    /// IRQ/DMA select port latch
    pub irq_dma_select: u8,
    /// AdLib command latch
    pub adlib_command: u8,
    /// Sampling frequency register
    pub sampling_frequency: u8,
    /// Sampling control register
    pub sampling_control: u8,
    /// Joystick trim register
    pub joystick_trim: u8,
    reset_control: u8,
    active_voices: u8,
    irq_channel: u8,
    fixed_output: bool,
}

impl GlobalRegisterFile {
    /// Power-on register file. `fixed_output` selects a 44.1 kHz mixer.
    pub fn new(fixed_output: bool) -> Self {
        Self {
            voice_select: 0,
            register_select: 0,
            data: 0,
            dram_address: 0,
            dma_control: DmaControl::empty(),
            dma_address: 0,
            timers: [HwTimer::new(TIMER1_TICK_US), HwTimer::new(TIMER2_TICK_US)],
            timer_control: TimerControl::empty(),
            wave_irq: 0,
            ramp_irq: 0,
            mix_control: MIX_CONTROL_RESET,
            irq_dma_select: 0,
            adlib_command: ADLIB_LATCH_RESET,
            sampling_frequency: 0,
            sampling_control: 0,
            joystick_trim: 0,
            reset_control: 0,
            active_voices: MIN_ACTIVE_VOICES,
            irq_channel: 0,
            fixed_output,
        }
    }

    /// Switch between the fixed 44.1 kHz mixer and the native rate
    pub fn set_fixed_output(&mut self, fixed_output: bool) {
        self.fixed_output = fixed_output;
    }

    /// Number of voices the chip cycles through
    pub fn active_voices(&self) -> u8 {
        self.active_voices
    }

    /// Bitmask of the active voices
    pub fn active_mask(&self) -> u32 {
        if self.active_voices >= 32 {
            u32::MAX
        } else {
            (1u32 << self.active_voices) - 1
        }
    }

    /// Current chip and mixer rates
    pub fn rates(&self) -> Rates {
        Rates::for_voices(self.active_voices, self.fixed_output)
    }

    /// Set the active voice count. Counts below 14 silently become 14 and
    /// counts above 32 become 32. Returns the rates every voice must now use.
    pub fn set_active_voice_count(&mut self, count: u8) -> Rates {
        self.active_voices = count.clamp(MIN_ACTIVE_VOICES, MAX_ACTIVE_VOICES);
        self.rates()
    }

    /// Stored reset register
    pub fn reset_control(&self) -> u8 {
        self.reset_control
    }

    /// Master IRQ enable latch (reset register bit 2)
    pub fn master_irq_enabled(&self) -> bool {
        ResetControl::from_bits_truncate(self.reset_control).contains(ResetControl::IRQ_ENABLE)
    }

    /// Latch a reset register write. Returns `true` when the write holds
    /// the chip in reset (bit 0 clear).
    ///
    /// A write without bit 0 is stored with bits 1-2 forced to zero, so DAC
    /// and master IRQ enable only stick when written together with run.
    pub fn latch_reset(&mut self, value: u8) -> bool {
        let run = ResetControl::RUN.bits();
        if value & run == 0 {
            self.reset_control = value & !(ResetControl::DAC_ENABLE | ResetControl::IRQ_ENABLE).bits();
            true
        } else {
            self.reset_control = value;
            false
        }
    }

    /// Clear everything a chip reset clears. Selects, the data latch and the
    /// DRAM pointer survive.
    pub fn reset(&mut self) {
        self.dma_control = DmaControl::empty();
        for timer in &mut self.timers {
            timer.reset();
        }
        self.timer_control = TimerControl::empty();
        self.wave_irq = 0;
        self.ramp_irq = 0;
        self.irq_channel = 0;
        self.active_voices = MIN_ACTIVE_VOICES;
        self.mix_control = MIX_CONTROL_RESET;
        self.adlib_command = ADLIB_LATCH_RESET;
    }

    /// IRQ status as the host sees it, derived from the raw causes.
    ///
    /// Terminal Count counts only with its enable bit, the timers count
    /// unconditionally and voice causes count only behind the master latch.
    pub fn effective_irq_status(&self) -> IrqStatus {
        let mut status = IrqStatus::empty();
        if self
            .dma_control
            .contains(DmaControl::TERMINAL_COUNT | DmaControl::IRQ_ENABLE)
        {
            status |= IrqStatus::DMA_TC;
        }
        if self.timers[0].irq {
            status |= IrqStatus::TIMER1;
        }
        if self.timers[1].irq {
            status |= IrqStatus::TIMER2;
        }
        if self.master_irq_enabled() {
            let mask = self.active_mask();
            if self.wave_irq & mask != 0 {
                status |= IrqStatus::WAVE;
            }
            if self.ramp_irq & mask != 0 {
                status |= IrqStatus::RAMP;
            }
        }
        status
    }

    /// Set or clear voice `voice`'s wave IRQ
    pub fn set_wave_irq(&mut self, voice: usize, pending: bool) {
        let mask = 1u32 << (voice % 32);
        if pending {
            self.wave_irq |= mask;
        } else {
            self.wave_irq &= !mask;
        }
    }

    /// Set or clear voice `voice`'s ramp IRQ
    pub fn set_ramp_irq(&mut self, voice: usize, pending: bool) {
        let mask = 1u32 << (voice % 32);
        if pending {
            self.ramp_irq |= mask;
        } else {
            self.ramp_irq &= !mask;
        }
    }

    /// Voice currently blamed for the voice IRQ
    pub fn irq_channel(&self) -> u8 {
        self.irq_channel
    }

    /// Move the blame pointer round-robin to the next active voice with a
    /// pending cause. Leaves it alone when nothing is pending.
    pub fn check_voice_irq(&mut self) {
        let pending = (self.wave_irq | self.ramp_irq) & self.active_mask();
        if pending == 0 {
            return;
        }
        while pending & (1u32 << self.irq_channel) == 0 {
            self.irq_channel += 1;
            if self.irq_channel >= self.active_voices {
                self.irq_channel = 0;
            }
        }
    }

    /// Read the voice IRQ status register.
    ///
    /// Bits 0-4 name the blamed voice, bit 5 is always set, bit 6 is set when
    /// that voice has no ramp IRQ and bit 7 when it has no wave IRQ. Both of
    /// its causes are cleared and the blame moves on.
    pub fn read_voice_irq_status(&mut self) -> u8 {
        let channel = self.irq_channel;
        let mask = 1u32 << channel;
        let mut status = 0x20 | channel;
        if self.ramp_irq & mask == 0 {
            status |= 0x40;
        }
        if self.wave_irq & mask == 0 {
            status |= 0x80;
        }
        self.ramp_irq &= !mask;
        self.wave_irq &= !mask;
        self.check_voice_irq();
        status
    }

    /// Timer control register write. Clearing an IRQ enable drops that
    /// timer's pending IRQ.
    pub fn write_timer_control(&mut self, value: u8) {
        self.timer_control = TimerControl::from_bits_truncate(value);
        let enables = [TimerControl::TIMER1_IRQ, TimerControl::TIMER2_IRQ];
        for (timer, enable) in self.timers.iter_mut().zip(enables) {
            timer.raise_irq = self.timer_control.contains(enable);
            if !timer.raise_irq {
                timer.irq = false;
            }
        }
    }

    /// Timer status port: bit 6/5 timer 1/2 reached, bit 7 either,
    /// bit 2/1 timer 1/2 IRQ pending
    pub fn timer_status(&self) -> u8 {
        let mut status = 0;
        if self.timers[0].reached {
            status |= 0x40;
        }
        if self.timers[1].reached {
            status |= 0x20;
        }
        if status & 0x60 != 0 {
            status |= 0x80;
        }
        if self.timers[0].irq {
            status |= 0x04;
        }
        if self.timers[1].irq {
            status |= 0x02;
        }
        status
    }
}

impl Default for GlobalRegisterFile {
    fn default() -> Self {
        Self::new(true)
    }
}
