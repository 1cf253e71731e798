//! Audio FIFO
//!
//! Fixed-capacity ring buffer between a sample producer (DMA engine or the
//! synthesis context) and a consumer (an output transport or a DAC model).
//!
//! The FIFO only starts handing samples out once it has been filled to a
//! threshold, and stops again only when it has been drained completely. This
//! hysteresis keeps a consumer from stuttering on a buffer that hovers around
//! empty.

/// Default FIFO capacity in elements
pub const DEFAULT_FIFO_CAPACITY: usize = 4096;

/// Interleaved stereo sample pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoFrame {
    /// Left channel
    pub left: i16,
    /// Right channel
    pub right: i16,
}

impl StereoFrame {
    /// Build a frame
    pub const fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    /// Silent frame
    pub const SILENCE: StereoFrame = StereoFrame::new(0, 0);
}

/// Playback state of an [`AudioFifo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoState {
    /// Filling, consumer gets nothing
    Stopped,
    /// Consumer may read
    Running,
}

/// Ring buffer of `N` elements, `N` a power of two
#[derive(Debug, Clone)]
pub struct AudioFifo<T: Copy + Default, const N: usize = DEFAULT_FIFO_CAPACITY> {
    buffer: [T; N],
    write_index: usize,
    read_index: usize,
    count: usize,
    threshold: usize,
    state: FifoState,
    overruns: usize,
}

impl<T: Copy + Default, const N: usize> AudioFifo<T, N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "FIFO capacity must be a power of two");
        N - 1
    };

    /// Create an empty, stopped FIFO that starts running once `threshold`
    /// elements are queued. The threshold is clamped to `1..=N`.
    pub fn new(threshold: usize) -> Self {
        Self {
            buffer: [T::default(); N],
            write_index: 0,
            read_index: 0,
            count: 0,
            threshold: threshold.clamp(1, N),
            state: FifoState::Stopped,
            overruns: 0,
        }
    }

    /// Capacity in elements
    pub fn capacity(&self) -> usize {
        N
    }

    /// Elements currently queued
    pub fn len(&self) -> usize {
        self.count
    }

    /// Nothing queued?
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// No room left?
    pub fn is_full(&self) -> bool {
        self.count == N
    }

    /// Current state
    pub fn state(&self) -> FifoState {
        self.state
    }

    /// Fill threshold that starts the consumer
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of rejected pushes since the last reset
    pub fn overruns(&self) -> usize {
        self.overruns
    }

    /// Free slots
    pub fn available_write(&self) -> usize {
        N - self.count
    }

    /// Queue one element. Returns `false` and counts an overrun when full.
    pub fn push(&mut self, value: T) -> bool {
        if self.count == N {
            self.overruns += 1;
            return false;
        }
        self.buffer[self.write_index] = value;
        self.write_index = (self.write_index + 1) & Self::MASK;
        self.count += 1;
        if self.state == FifoState::Stopped && self.count >= self.threshold {
            self.state = FifoState::Running;
        }
        true
    }

    /// Queue as many elements of `values` as fit, returning how many did
    pub fn push_slice(&mut self, values: &[T]) -> usize {
        let mut written = 0;
        for &value in values {
            if !self.push(value) {
                break;
            }
            written += 1;
        }
        written
    }

    /// Take one element. Returns `None` while stopped or empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.state == FifoState::Stopped || self.count == 0 {
            return None;
        }
        let value = self.buffer[self.read_index];
        self.read_index = (self.read_index + 1) & Self::MASK;
        self.count -= 1;
        if self.count == 0 {
            self.state = FifoState::Stopped;
        }
        Some(value)
    }

    /// Fill `dest` from the FIFO, padding with `T::default()` on underrun.
    /// Returns the number of real elements delivered.
    pub fn pop_into(&mut self, dest: &mut [T]) -> usize {
        let mut delivered = 0;
        for slot in dest.iter_mut() {
            match self.pop() {
                Some(value) => {
                    *slot = value;
                    delivered += 1;
                }
                None => *slot = T::default(),
            }
        }
        delivered
    }

    /// Drop everything queued and return to the stopped state
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.count = 0;
        self.state = FifoState::Stopped;
        self.overruns = 0;
    }

    /// Change the start threshold (clamped to `1..=N`)
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold.clamp(1, N);
    }

    /// Fill level (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        self.count as f32 / N as f32
    }

    #[cfg(test)]
    fn indices_consistent(&self) -> bool {
        (self.write_index.wrapping_sub(self.read_index) & Self::MASK) == (self.count & Self::MASK)
    }
}

impl<T: Copy + Default, const N: usize> Default for AudioFifo<T, N> {
    fn default() -> Self {
        Self::new(N / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_stopped_below_threshold() {
        let mut fifo: AudioFifo<i16, 16> = AudioFifo::new(4);
        fifo.push(1);
        fifo.push(2);
        fifo.push(3);
        assert_eq!(fifo.state(), FifoState::Stopped);
        assert_eq!(fifo.pop(), None);

        fifo.push(4);
        assert_eq!(fifo.state(), FifoState::Running);
        assert_eq!(fifo.pop(), Some(1));
    }

    #[test]
    fn test_runs_until_fully_drained() {
        let mut fifo: AudioFifo<i16, 16> = AudioFifo::new(4);
        fifo.push_slice(&[1, 2, 3, 4]);

        // Dropping below the threshold does not stop it
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.state(), FifoState::Running);
        fifo.push(5);
        assert_eq!(fifo.pop(), Some(3));
        assert_eq!(fifo.pop(), Some(4));
        assert_eq!(fifo.pop(), Some(5));
        assert_eq!(fifo.state(), FifoState::Stopped);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_count_matches_indices_across_wrap() {
        let mut fifo: AudioFifo<i16, 8> = AudioFifo::new(1);
        for round in 0..5 {
            for i in 0..6 {
                assert!(fifo.push(round * 10 + i));
                assert!(fifo.indices_consistent());
            }
            for _ in 0..6 {
                assert!(fifo.pop().is_some());
                assert!(fifo.indices_consistent());
            }
        }
    }

    #[test]
    fn test_overrun_rejects_and_counts() {
        let mut fifo: AudioFifo<i16, 4> = AudioFifo::new(4);
        assert_eq!(fifo.push_slice(&[1, 2, 3, 4, 5, 6]), 4);
        assert!(fifo.is_full());
        assert_eq!(fifo.overruns(), 1);
        assert!(fifo.indices_consistent());
    }

    #[test]
    fn test_pop_into_pads_with_silence() {
        let mut fifo: AudioFifo<StereoFrame, 8> = AudioFifo::new(2);
        fifo.push(StereoFrame::new(1, -1));
        fifo.push(StereoFrame::new(2, -2));

        let mut out = [StereoFrame::new(9, 9); 4];
        assert_eq!(fifo.pop_into(&mut out), 2);
        assert_eq!(out[1], StereoFrame::new(2, -2));
        assert_eq!(out[2], StereoFrame::SILENCE);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let fifo: AudioFifo<i16, 8> = AudioFifo::new(100);
        assert_eq!(fifo.threshold(), 8);
        let fifo: AudioFifo<i16, 8> = AudioFifo::new(0);
        assert_eq!(fifo.threshold(), 1);
    }
}
