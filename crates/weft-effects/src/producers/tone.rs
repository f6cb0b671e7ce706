//! Sine tone generator.

use std::any::Any;
use std::f64::consts::TAU;
use std::sync::Arc;
use weft_core::audio::DEFAULT_FREQUENCY;
use weft_core::{
    samples_for_position, Audio, Frame, Position, ResourceHandle, Result, SharedProfile,
    SharedResource, WeftError,
};
use weft_timeline::prelude::*;
use weft_timeline::{Producer, ServiceKind};

/// One cycle of a sine wave, computed once and shared by every tone.
#[derive(Debug)]
pub struct SineTable {
    samples: Vec<f32>,
}

impl SineTable {
    pub const SIZE: usize = 4096;

    pub fn new() -> Self {
        let samples = (0..Self::SIZE)
            .map(|i| (TAU * i as f64 / Self::SIZE as f64).sin() as f32)
            .collect();
        Self { samples }
    }

    /// An empty process slot for the table.
    pub fn resource() -> SharedResource<SineTable> {
        SharedResource::new("sine-table")
    }

    /// Value at `phase`, in cycles, linearly interpolated.
    pub fn at(&self, phase: f64) -> f32 {
        let pos = phase.rem_euclid(1.0) * Self::SIZE as f64;
        let i = pos.floor() as usize % Self::SIZE;
        let next = (i + 1) % Self::SIZE;
        let frac = (pos - pos.floor()) as f32;
        self.samples[i] + (self.samples[next] - self.samples[i]) * frac
    }
}

impl Default for SineTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A continuous sine at `resource` Hz and `amplitude`, phase-continuous
/// across frames. Video is black.
pub struct Tone {
    table: ResourceHandle<SineTable>,
}

impl Tone {
    pub const SERVICE: &'static str = "tone";
    pub const DEFAULT_PITCH: f64 = 1000.0;

    pub fn producer(
        profile: SharedProfile,
        table: &SharedResource<SineTable>,
        pitch: Option<&str>,
    ) -> Result<Producer> {
        let pitch = match pitch {
            Some(text) => text.trim().parse::<f64>().map_err(|_| {
                WeftError::InvalidParameter(format!("Invalid tone frequency '{text}'"))
            })?,
            None => Self::DEFAULT_PITCH,
        };
        if pitch.is_nan() || pitch <= 0.0 {
            return Err(WeftError::InvalidParameter(format!(
                "Tone frequency must be positive, got {pitch}"
            )));
        }
        let table = table.acquire(|| Ok(SineTable::new()))?;
        let producer = Producer::new(ServiceKind::Producer, Self::SERVICE, profile, Self { table }, None);
        producer.properties().set_string("resource", pitch.to_string());
        producer.properties().set_double("amplitude", 0.5);
        Ok(producer)
    }
}

impl ProducerImpl for Tone {
    fn get_frame(&self, producer: &Producer, index: Position) -> Result<Frame> {
        let props = producer.properties();
        let pitch = props.get_double("resource");
        let amplitude = props.get_double("amplitude") as f32;
        let rate = producer.profile().frame_rate;
        let table: Arc<SineTable> = self.table.share();

        let mut frame = Frame::new(index);
        frame.set_test_image(true);
        frame.push_audio_callback(move |_, req| {
            let frequency = if req.frequency == 0 { DEFAULT_FREQUENCY } else { req.frequency };
            let req = req.resolved(samples_for_position(index, rate, frequency));
            // First sample of this frame on the absolute sample clock
            let first = (index as i128 * req.frequency as i128 * rate.denominator as i128)
                .div_euclid(rate.numerator.max(1) as i128) as f64;
            let channels = req.channels.max(1) as usize;
            let mut audio = Audio::silence_for(&req);
            for (i, block) in audio.data.chunks_mut(channels).enumerate() {
                let phase = (first + i as f64) * pitch / req.frequency as f64;
                let value = table.at(phase) * amplitude;
                block.fill(value);
            }
            Ok(audio)
        });
        Ok(frame)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{AudioRequest, FrameRate, Profile};

    fn profile() -> SharedProfile {
        Profile::preview(4, 4, FrameRate::FPS_25).shared()
    }

    #[test]
    fn test_sine_table_quarter_points() {
        let table = SineTable::new();
        assert!(table.at(0.0).abs() < 1e-6);
        assert!((table.at(0.25) - 1.0).abs() < 1e-4);
        assert!((table.at(0.75) + 1.0).abs() < 1e-4);
        assert!((table.at(1.25) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_tone_block_size_and_level() {
        let table = SineTable::resource();
        let p = Tone::producer(profile(), &table, Some("440")).unwrap();
        let mut frame = p.frame_at(0).unwrap();
        let audio = frame.get_audio(&AudioRequest::new(48_000, 2, 0)).unwrap();
        assert_eq!(audio.samples, 1920);
        assert_eq!(audio.data.len(), 1920 * 2);
        assert!((audio.peak() - 0.5).abs() < 0.01);
        assert!(frame.is_test_image());
    }

    #[test]
    fn test_phase_continues_across_frames() {
        let table = SineTable::resource();
        let p = Tone::producer(profile(), &table, Some("1000")).unwrap();
        let req = AudioRequest::new(48_000, 1, 0);
        let a = p.frame_at(0).unwrap().pull_audio(&req).unwrap();
        let b = p.frame_at(1).unwrap().pull_audio(&req).unwrap();
        // 1920 samples at 1 kHz / 48 kHz is exactly 40 cycles
        assert!((a.data[0] - b.data[0]).abs() < 1e-4);
        assert!((a.data[12] - b.data[12]).abs() < 1e-4);
    }

    #[test]
    fn test_table_shared_and_released() {
        let table = SineTable::resource();
        let a = Tone::producer(profile(), &table, None).unwrap();
        let b = Tone::producer(profile(), &table, None).unwrap();
        assert_eq!(table.users(), 2);
        drop(a);
        assert!(table.is_live());
        drop(b);
        assert!(!table.is_live());
    }

    #[test]
    fn test_bad_frequency_rejected() {
        let table = SineTable::resource();
        assert!(Tone::producer(profile(), &table, Some("loud")).is_err());
        assert!(Tone::producer(profile(), &table, Some("-5")).is_err());
        assert_eq!(table.users(), 0);
    }
}
