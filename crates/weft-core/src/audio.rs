//! Audio blocks produced by frame evaluation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::time::{FrameRate, Position};

/// Default sample rate for generated audio.
pub const DEFAULT_FREQUENCY: u32 = 48_000;

/// Default channel count for generated audio.
pub const DEFAULT_CHANNELS: u16 = 2;

/// What a consumer asks `get_audio` for. Zero fields mean "whatever the
/// source produces".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioRequest {
    pub frequency: u32,
    pub channels: u16,
    pub samples: usize,
}

impl AudioRequest {
    pub fn new(frequency: u32, channels: u16, samples: usize) -> Self {
        Self {
            frequency,
            channels,
            samples,
        }
    }

    /// Request the exact block for `position` at `rate`.
    pub fn for_position(rate: FrameRate, frequency: u32, channels: u16, position: Position) -> Self {
        Self::new(frequency, channels, samples_for_position(position, rate, frequency))
    }

    /// Fill unset fields with defaults.
    pub fn resolved(self, samples: usize) -> Self {
        Self {
            frequency: if self.frequency == 0 { DEFAULT_FREQUENCY } else { self.frequency },
            channels: if self.channels == 0 { DEFAULT_CHANNELS } else { self.channels },
            samples: if self.samples == 0 { samples } else { self.samples },
        }
    }
}

/// Interleaved f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Audio {
    pub frequency: u32,
    pub channels: u16,
    /// Samples per channel
    pub samples: usize,
    pub data: Vec<f32>,
}

/// Evaluated audio is shared, never mutated in place.
pub type SharedAudio = Arc<Audio>;

impl Audio {
    /// A silent block.
    pub fn silence(frequency: u32, channels: u16, samples: usize) -> Self {
        Self {
            frequency,
            channels,
            samples,
            data: vec![0.0; samples * channels as usize],
        }
    }

    /// Silence shaped like `request`.
    pub fn silence_for(request: &AudioRequest) -> Self {
        Self::silence(request.frequency, request.channels, request.samples)
    }

    /// Multiply every sample by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for s in &mut self.data {
            *s *= gain;
        }
    }

    /// Linear gain ramp from `from` to `to` across the block.
    pub fn apply_ramp(&mut self, from: f32, to: f32) {
        let channels = self.channels.max(1) as usize;
        let n = self.samples.max(1) as f32;
        for (i, frame) in self.data.chunks_mut(channels).enumerate() {
            let g = from + (to - from) * (i as f32 / n);
            for s in frame {
                *s *= g;
            }
        }
    }

    /// `self * (1 - t) + other * t`, sample by sample. Shorter input is
    /// padded with silence.
    pub fn mix(&self, other: &Self, t: f32) -> Self {
        let len = self.data.len().max(other.data.len());
        let data = (0..len)
            .map(|i| {
                let a = self.data.get(i).copied().unwrap_or(0.0);
                let b = other.data.get(i).copied().unwrap_or(0.0);
                a * (1.0 - t) + b * t
            })
            .collect();
        let channels = self.channels.max(other.channels).max(1);
        Self {
            frequency: self.frequency,
            channels,
            samples: len / channels as usize,
            data,
        }
    }

    /// Peak absolute sample value.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0, |m, s| m.max(s.abs()))
    }

    /// Wrap into the shared form.
    pub fn shared(self) -> SharedAudio {
        Arc::new(self)
    }
}

/// Samples belonging to frame `position` so that counts sum exactly over
/// any run of frames (1601/1602 alternation at 29.97 and 48 kHz).
pub fn samples_for_position(position: Position, rate: FrameRate, frequency: u32) -> usize {
    if rate.numerator == 0 {
        return 0;
    }
    let num = frequency as i128 * rate.denominator as i128;
    let den = rate.numerator as i128;
    let at = |p: i128| (p * num).div_euclid(den);
    let p = position as i128;
    (at(p + 1) - at(p)) as usize
}
