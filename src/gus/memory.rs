//! On-card sample DRAM
//!
//! 1 MiB of byte-addressed memory. Addresses are masked to 20 bits, so a
//! pointer that underflows past zero lands at the top of memory.

/// DRAM size in bytes
pub const DRAM_SIZE: usize = 1 << 20;

/// Address mask for [`DRAM_SIZE`]
pub const DRAM_MASK: u32 = (DRAM_SIZE as u32) - 1;

/// Remap a 16-bit sample address into the byte address it occupies.
///
/// 16-bit samples never leave their 256 KiB bank: bits 18-19 select the bank,
/// the low 17 bits are a word index within it.
#[inline]
pub fn remap_16bit(sample_address: u32) -> u32 {
    (sample_address & 0xC0000) | ((sample_address & 0x1FFFF) << 1)
}

/// Sample memory
#[derive(Clone)]
pub struct Dram {
    bytes: Box<[u8]>,
}

impl std::fmt::Debug for Dram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dram").field("size", &self.bytes.len()).finish()
    }
}

impl Dram {
    /// Zero-filled memory
    pub fn new() -> Self {
        Self {
            bytes: vec![0u8; DRAM_SIZE].into_boxed_slice(),
        }
    }

    /// Read a byte
    #[inline]
    pub fn peek(&self, address: u32) -> u8 {
        self.bytes[(address & DRAM_MASK) as usize]
    }

    /// Write a byte
    #[inline]
    pub fn poke(&mut self, address: u32, value: u8) {
        self.bytes[(address & DRAM_MASK) as usize] = value;
    }

    /// Copy `out.len()` bytes starting at `address`, wrapping at the top
    pub fn read_block(&self, address: u32, out: &mut [u8]) {
        for (offset, slot) in out.iter_mut().enumerate() {
            *slot = self.peek(address.wrapping_add(offset as u32));
        }
    }

    /// Copy `data` into memory starting at `address`, wrapping at the top
    pub fn load(&mut self, address: u32, data: &[u8]) {
        for (offset, &value) in data.iter().enumerate() {
            self.poke(address.wrapping_add(offset as u32), value);
        }
    }
}

impl Default for Dram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_wrap_at_one_megabyte() {
        let mut ram = Dram::new();
        ram.poke(DRAM_MASK, 0x12);
        assert_eq!(ram.peek(DRAM_SIZE as u32 + DRAM_MASK), 0x12);
        ram.load(DRAM_MASK, &[1, 2]);
        assert_eq!(ram.peek(0), 2);
    }

    #[test]
    fn test_16bit_remap_stays_in_bank() {
        assert_eq!(remap_16bit(0x00001), 0x00002);
        assert_eq!(remap_16bit(0x40010), 0x40020);
        // Word index overflow wraps inside the bank
        assert_eq!(remap_16bit(0x5FFFF) & 0xC0000, 0x40000);
        assert_eq!(remap_16bit(0x3FFFF), 0x3FFFE);
    }
}
