use std::any::Any;
use tracing::warn;
use weft_core::{AudioRequest, Frame, Result, SharedProfile};
use weft_timeline::{share_frame, Service, Transition, TransitionImpl};

/// Audio-only crossfade from A to B; A's image is untouched.
///
/// With `combine` set the two signals are summed instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioMix;

impl AudioMix {
    pub const SERVICE: &'static str = "mix";

    pub fn transition(profile: SharedProfile) -> Transition {
        Transition::new(Self::SERVICE, profile, Self)
    }
}

impl TransitionImpl for AudioMix {
    fn process(&self, transition: &Transition, a: &mut Frame, b: Frame) -> Result<()> {
        let combine = transition.properties().get_bool("combine");
        let t = transition.progress(a.position()) as f32;
        let b = share_frame(b);
        a.push_audio_callback(move |a, req| {
            let under = a.pull_audio(req)?;
            let shape = AudioRequest::new(under.frequency, under.channels, under.samples);
            let over = match b.lock().get_audio(&shape) {
                Ok(over) => over,
                Err(e) => {
                    warn!(position = a.position(), error = %e, "B frame has no audio, playing A");
                    return Ok(under);
                }
            };
            if combine {
                let mut sum = under.mix(&over, 0.5);
                sum.apply_gain(2.0);
                Ok(sum)
            } else {
                Ok(under.mix(&over, t))
            }
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
    use weft_core::{Audio, FrameRate, Profile};

    fn level(position: i64, value: f32) -> Frame {
        let mut frame = Frame::new(position);
        frame.push_audio_callback(move |_, _| {
            Ok(Audio {
                frequency: 48_000,
                channels: 1,
                samples: 4,
                data: vec![value; 4],
            })
        });
        frame
    }

    fn transition() -> Transition {
        let t = AudioMix::transition(Profile::preview(2, 2, FrameRate::FPS_25).shared());
        t.set_in_and_out(0, 10);
        t
    }

    #[test]
    fn test_crossfade_follows_progress() {
        let t = transition();
        let mut a = level(5, 1.0);
        t.apply(&mut a, level(5, 0.0));
        let audio = a.get_audio(&AudioRequest::default()).unwrap();
        assert!((audio.data[0] - 0.5).abs() < 1e-6);
        assert_eq!(a.image_depth(), 0);
    }

    #[test]
    fn test_combine_sums() {
        let t = transition();
        t.properties().set_int("combine", 1);
        let mut a = level(0, 0.25);
        t.apply(&mut a, level(0, 0.5));
        let audio = a.get_audio(&AudioRequest::default()).unwrap();
        assert!((audio.data[3] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_silent_b_plays_a() {
        let t = transition();
        let mut a = level(10, 0.3);
        t.apply(&mut a, Frame::new(10));
        let audio = a.get_audio(&AudioRequest::default()).unwrap();
        assert!((audio.data[0] - 0.3).abs() < 1e-6);
    }
}
