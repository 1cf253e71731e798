//! GF1 wavetable synthesizer emulation kernel
//!
//! A real-time emulation core for a Gravis-Ultrasound-style GF1 sound card
//! sitting on a virtual ISA bus. The core answers port reads and writes,
//! models device time with a microsecond event scheduler, moves sample data
//! through a DMA engine and produces a continuous stereo audio stream.
//!
//! # Features
//! - Microsecond event scheduler with drift-free rescheduling
//! - Single-unit-per-tick DMA engine with Terminal Count and auto-init
//! - 32 voices with fractional-address interpolation, volume ramps and pan
//! - GF1 global register file with timer 1/2 and IRQ aggregation
//! - Virtual bus shared with other peripherals (wired-OR IRQ, summed audio)
//! - Two-context access: a bus-servicing handle and an audio-synthesis handle
//!
//! # Crate feature flags
//! - `export-wav` (opt-in): capture the output stream to a WAV file (`export`)
//!
//! # Quick start
//! ```no_run
//! use gf1::{Gf1, Settings, VirtualBus};
//!
//! let settings = Settings::default();
//! let mut bus = VirtualBus::new();
//! bus.attach(Box::new(Gf1::new(&settings)));
//!
//! let base = settings.base_port;
//! bus.write(base + 0x103, 0x4C); // select reset register
//! bus.write(base + 0x105, 0x07); // run, DAC on, IRQs on
//!
//! let frame = bus.mix_frame();
//! assert_eq!(frame.left, 0);
//! ```
//!
//! ## Two contexts
//! ```no_run
//! use gf1::context::{ManualClock, SharedSystem};
//! use gf1::{Gf1, Settings, VirtualBus};
//! use std::sync::Arc;
//!
//! let settings = Settings::default();
//! let mut bus = VirtualBus::new();
//! bus.attach(Box::new(Gf1::new(&settings)));
//!
//! let clock = Arc::new(ManualClock::new());
//! let system = SharedSystem::new(bus, clock.clone(), &settings);
//! let mut host = system.bus_context();
//! let mut synth = system.synth_context();
//!
//! host.write(0x342, 3);
//! clock.advance_us(1_000);
//! synth.render(64);
//! ```

#![warn(missing_docs)]

pub mod bus; // Virtual bus & peripheral contract
pub mod config; // Settings record
pub mod context; // Bus-servicing / audio-synthesis handles
pub mod dma; // DMA engine
#[cfg(feature = "export-wav")]
pub mod export; // WAV capture
pub mod fifo; // Audio FIFO
pub mod gus; // GF1 synthesizer
pub mod irq; // Shared interrupt line
pub mod scheduler; // Microsecond event scheduler

/// Error types for emulation core operations
#[derive(thiserror::Error, Debug)]
pub enum Gf1Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// No free slot in the event scheduler
    #[error("Scheduler full ({capacity} events)")]
    SchedulerFull {
        /// Table capacity that was exhausted
        capacity: usize,
    },

    /// A DMA transfer is already in progress
    #[error("DMA transfer already running")]
    DmaBusy,

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("Settings format error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error writing audio file
    #[error("Audio file write error: {0}")]
    AudioFileError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Gf1Error {
    /// Converts a String into `Gf1Error::Other`.
    ///
    /// Prefer the specific variants (`ConfigError`, `AudioFileError`) where
    /// the failure has a known kind.
    fn from(msg: String) -> Self {
        Gf1Error::Other(msg)
    }
}

impl From<&str> for Gf1Error {
    /// Converts a string slice into `Gf1Error::Other`.
    fn from(msg: &str) -> Self {
        Gf1Error::Other(msg.to_string())
    }
}

/// Result type for emulation core operations
pub type Result<T> = std::result::Result<T, Gf1Error>;

// Public API exports
pub use bus::{AccessClass, Peripheral, VirtualBus};
pub use config::Settings;
pub use dma::{DmaEngine, DmaTransport};
#[cfg(feature = "export-wav")]
pub use export::WavCapture;
pub use fifo::{AudioFifo, StereoFrame};
pub use gus::Gf1;
pub use irq::IrqLine;
pub use scheduler::{EventKey, EventScheduler};
