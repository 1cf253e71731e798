//! WAV capture of the output stream
//!
//! Writes interleaved 16-bit stereo frames to a PCM WAV file as they are
//! pulled from the synthesis context.

use crate::context::SynthContext;
use crate::fifo::StereoFrame;
use crate::{Gf1Error, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Frames pulled per [`WavCapture::drain`] step
const DRAIN_CHUNK: usize = 256;

/// Open WAV file receiving stereo frames
pub struct WavCapture {
    writer: hound::WavWriter<BufWriter<File>>,
    frames_written: usize,
}

impl WavCapture {
    /// Create `path` for 16-bit stereo at `sample_rate`
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| Gf1Error::AudioFileError(format!("Failed to create WAV file: {}", e)))?;
        Ok(Self {
            writer,
            frames_written: 0,
        })
    }

    /// Append frames
    pub fn write_frames(&mut self, frames: &[StereoFrame]) -> Result<()> {
        for frame in frames {
            for sample in [frame.left, frame.right] {
                self.writer
                    .write_sample(sample)
                    .map_err(|e| Gf1Error::AudioFileError(format!("Failed to write sample: {}", e)))?;
            }
        }
        self.frames_written += frames.len();
        Ok(())
    }

    /// Pull everything the synthesis context has queued and append it.
    /// Returns the number of frames captured.
    pub fn drain(&mut self, synth: &mut SynthContext) -> Result<usize> {
        let mut chunk = [StereoFrame::SILENCE; DRAIN_CHUNK];
        let mut captured = 0;
        loop {
            let read = synth.pull(&mut chunk);
            if read == 0 {
                break;
            }
            self.write_frames(&chunk[..read])?;
            captured += read;
        }
        Ok(captured)
    }

    /// Frames written so far
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Flush the header and close the file
    pub fn finalize(self) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| Gf1Error::AudioFileError(format!("Failed to finalize WAV file: {}", e)))
    }
}
