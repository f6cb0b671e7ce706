//! Speed-changing wrapper around another producer.

use std::any::Any;
use weft_core::{Frame, Position, Result, SharedProfile, WeftError};
use weft_timeline::prelude::*;
use weft_timeline::{Producer, ServiceKind};

/// Plays `inner` at a fixed speed factor. Negative speeds play backwards.
///
/// Only unit-speed audio is passed on; other speeds yield silence.
pub struct Timewarp {
    inner: Producer,
    speed: f64,
}

impl Timewarp {
    pub const SERVICE: &'static str = "timewarp";

    /// `speed` is the text of a non-zero number; 1 when absent.
    pub fn producer(profile: SharedProfile, inner: Producer, speed: Option<&str>) -> Result<Producer> {
        let speed = match speed {
            Some(text) => text.trim().parse::<f64>().map_err(|_| {
                WeftError::InvalidParameter(format!("Invalid timewarp speed '{text}'"))
            })?,
            None => 1.0,
        };
        if !speed.is_finite() || speed == 0.0 {
            return Err(WeftError::InvalidParameter(format!(
                "Timewarp speed must be finite and non-zero, got {speed}"
            )));
        }
        let producer = Producer::new(
            ServiceKind::Producer,
            Self::SERVICE,
            profile,
            Self { inner, speed },
            None,
        );
        producer.properties().set_string("resource", speed.to_string());
        Ok(producer)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn inner(&self) -> &Producer {
        &self.inner
    }

    /// Inner position shown at warped frame `index`.
    fn source_position(&self, index: Position) -> Position {
        let playtime = self.inner.get_playtime().max(1);
        let step = ((index as f64) * self.speed.abs()).floor() as Position;
        let step = step.clamp(0, playtime - 1);
        if self.speed < 0.0 {
            playtime - 1 - step
        } else {
            step
        }
    }
}

impl ProducerImpl for Timewarp {
    fn get_frame(&self, _producer: &Producer, index: Position) -> Result<Frame> {
        let mut frame = self.inner.frame_at(self.source_position(index))?;
        if self.speed != 1.0 {
            while frame.pop_audio_callback().is_some() {}
            frame.set_test_audio(true);
        }
        frame.properties().set_double("warp_speed", self.speed);
        Ok(frame)
    }

    fn length(&self) -> Option<Position> {
        let playtime = self.inner.get_playtime() as f64;
        Some(((playtime / self.speed.abs()).ceil() as Position).max(1))
    }

    fn probe(&self, _producer: &Producer) -> Option<Result<()>> {
        Some(self.inner.probe())
    }

    fn wrapped(&self) -> Option<Producer> {
        Some(self.inner.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{FrameRate, Profile};

    fn profile() -> SharedProfile {
        Profile::preview(4, 4, FrameRate::FPS_25).shared()
    }

    /// Records the source frame it was asked for.
    struct Indexed;

    impl ProducerImpl for Indexed {
        fn get_frame(&self, _producer: &Producer, index: Position) -> Result<Frame> {
            let frame = Frame::blank(index);
            frame.properties().set_position("source_index", index);
            Ok(frame)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Fails every probe.
    struct Unreadable;

    impl ProducerImpl for Unreadable {
        fn get_frame(&self, _producer: &Producer, index: Position) -> Result<Frame> {
            Ok(Frame::blank(index))
        }

        fn probe(&self, _producer: &Producer) -> Option<Result<()>> {
            Some(Err(WeftError::Decode("truncated header".into())))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn indexed(length: Position) -> Producer {
        Producer::new(ServiceKind::Producer, "indexed", profile(), Indexed, Some(length))
    }

    fn source_at(p: &Producer, position: Position) -> Position {
        p.frame_at(position)
            .unwrap()
            .properties()
            .get_position("source_index")
    }

    #[test]
    fn test_double_speed_halves_length() {
        let warped = Timewarp::producer(profile(), indexed(10), Some("2")).unwrap();
        assert_eq!(warped.get_length(), 5);
        assert_eq!(source_at(&warped, 0), 0);
        assert_eq!(source_at(&warped, 3), 6);
        assert_eq!(warped.properties().get_string("resource").as_deref(), Some("2"));
    }

    #[test]
    fn test_reverse_plays_backwards() {
        let warped = Timewarp::producer(profile(), indexed(10), Some("-1")).unwrap();
        assert_eq!(warped.get_length(), 10);
        assert_eq!(source_at(&warped, 0), 9);
        assert_eq!(source_at(&warped, 9), 0);
    }

    #[test]
    fn test_slow_motion_repeats_frames() {
        let warped = Timewarp::producer(profile(), indexed(4), Some("0.5")).unwrap();
        assert_eq!(warped.get_length(), 8);
        let shown: Vec<_> = (0..8).map(|i| source_at(&warped, i)).collect();
        assert_eq!(shown, vec![0, 0, 1, 1, 2, 2, 3, 3]);
        let frame = warped.frame_at(1).unwrap();
        assert!(frame.is_test_audio());
    }

    #[test]
    fn test_probe_and_wrapped_delegate() {
        let inner = Producer::new(ServiceKind::Producer, "broken", profile(), Unreadable, Some(5));
        let warped = Timewarp::producer(profile(), inner.clone(), None).unwrap();
        assert!(matches!(warped.probe(), Err(WeftError::Decode(_))));
        let wrapped = warped.generator().wrapped().unwrap();
        assert!(wrapped.ptr_eq(&inner));
        assert!(indexed(3).probe().is_ok());
    }

    #[test]
    fn test_zero_speed_rejected() {
        assert!(Timewarp::producer(profile(), indexed(3), Some("0")).is_err());
        assert!(Timewarp::producer(profile(), indexed(3), Some("fast")).is_err());
    }
}
