//! Volume: animated gain, ramped across each audio block.

use std::any::Any;
use weft_core::{Frame, Result, SharedProfile};
use weft_timeline::{Filter, FilterImpl, Service};

#[derive(Debug, Default)]
pub struct Volume;

impl Volume {
    pub const SERVICE: &'static str = "volume";

    /// `gain` is linear; a number or keyframes. 1 when absent.
    pub fn filter(profile: SharedProfile, gain: Option<&str>) -> Filter {
        let filter = Filter::new(Self::SERVICE, profile, Self);
        filter.properties().set_string("gain", gain.unwrap_or("1"));
        filter
    }
}

impl FilterImpl for Volume {
    fn process(&self, filter: &Filter, frame: &mut Frame) -> Result<()> {
        let from = filter.animated_double("gain", frame, 1.0) as f32;
        // Gain at the next frame, so keyframed fades do not step per block
        let length = filter.length(frame.properties().get_position("length").max(1));
        let to = filter
            .properties()
            .get_animated_double("gain", filter.position_of(frame) + 1, length) as f32;
        if from == 1.0 && to == 1.0 {
            return Ok(());
        }
        frame.push_audio_callback(move |frame, req| {
            let mut audio = frame.pull_audio(req)?;
            if from == to {
                audio.apply_gain(from);
            } else {
                audio.apply_ramp(from, to);
            }
            Ok(audio)
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producers::{SineTable, Tone};
    use weft_core::{AudioRequest, FrameRate, Profile};
    use weft_timeline::Service;

    fn profile() -> SharedProfile {
        Profile::preview(4, 4, FrameRate::FPS_25).shared()
    }

    #[test]
    fn test_constant_gain_scales_peak() {
        let table = SineTable::resource();
        let p = Tone::producer(profile(), &table, Some("1000")).unwrap();
        p.properties().set_double("amplitude", 1.0);
        p.attach(&Volume::filter(profile(), Some("0.25"))).unwrap();
        let mut frame = p.frame_at(0).unwrap();
        let audio = frame.get_audio(&AudioRequest::new(48_000, 2, 0)).unwrap();
        assert!((audio.peak() - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_fade_ramps_within_block() {
        let table = SineTable::resource();
        let p = Tone::producer(profile(), &table, Some("1000")).unwrap();
        p.properties().set_double("amplitude", 1.0);
        let fade = Volume::filter(profile(), Some("0=0;4=1"));
        fade.set_in_and_out(0, 4);
        p.attach(&fade).unwrap();

        let req = AudioRequest::new(48_000, 1, 0);
        let first = p.frame_at(0).unwrap().pull_audio(&req).unwrap();
        // ramp 0 → 0.25: the first quarter cycle stays quiet
        assert!(first.data[12].abs() < 0.01);
        assert!(first.peak() <= 0.26);
        let last = p.frame_at(4).unwrap().pull_audio(&req).unwrap();
        assert!((last.peak() - 1.0).abs() < 0.01);
    }
}
