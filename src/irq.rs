//! Shared interrupt line
//!
//! Every peripheral on the virtual bus drives the same level-style line. Each
//! driver owns an [`IrqSource`] bit; the line is asserted while any bit is set.
//! The level lives in an atomic so the bus-sampling side can poll it without
//! taking the device lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Maximum number of independent drivers on one line
pub const MAX_IRQ_SOURCES: usize = 32;

/// Level-style interrupt line shared by all peripherals
#[derive(Debug, Clone, Default)]
pub struct IrqLine {
    sources: Arc<AtomicU32>,
}

/// One driver's handle onto an [`IrqLine`]
#[derive(Debug, Clone)]
pub struct IrqSource {
    line: IrqLine,
    mask: u32,
}

impl IrqLine {
    /// Create a deasserted line
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a driver. `index` selects its bit and is wrapped to the source limit.
    pub fn source(&self, index: usize) -> IrqSource {
        IrqSource {
            line: self.clone(),
            mask: 1 << (index % MAX_IRQ_SOURCES),
        }
    }

    /// Is any driver asserting the line?
    #[inline]
    pub fn is_asserted(&self) -> bool {
        self.sources.load(Ordering::Acquire) != 0
    }

    /// Raw bitmask of asserting drivers
    pub fn drivers(&self) -> u32 {
        self.sources.load(Ordering::Acquire)
    }
}

impl IrqSource {
    /// Drive this source's contribution to the line
    #[inline]
    pub fn set(&self, asserted: bool) {
        if asserted {
            self.line.sources.fetch_or(self.mask, Ordering::AcqRel);
        } else {
            self.line.sources.fetch_and(!self.mask, Ordering::AcqRel);
        }
    }

    /// Is this source currently asserting?
    pub fn is_set(&self) -> bool {
        self.line.sources.load(Ordering::Acquire) & self.mask != 0
    }

    /// The line this source drives
    pub fn line(&self) -> &IrqLine {
        &self.line
    }
}

impl Default for IrqSource {
    fn default() -> Self {
        IrqLine::new().source(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_wired_or() {
        let line = IrqLine::new();
        let a = line.source(0);
        let b = line.source(3);

        a.set(true);
        b.set(true);
        assert!(line.is_asserted());

        a.set(false);
        assert!(line.is_asserted(), "b still drives the line");

        b.set(false);
        assert!(!line.is_asserted());
    }

    #[test]
    fn test_source_reports_own_bit() {
        let line = IrqLine::new();
        let a = line.source(1);
        let b = line.source(2);
        b.set(true);
        assert!(!a.is_set());
        assert!(b.is_set());
        assert_eq!(line.drivers(), 0b100);
    }
}
