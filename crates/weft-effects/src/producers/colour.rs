//! Solid colour producer.

use std::any::Any;
use weft_core::{Color, Frame, Image, Position, Result, SharedProfile};
use weft_timeline::prelude::*;
use weft_timeline::{Producer, ServiceKind};

use super::render_size;

/// One colour, read from the `resource` property on every frame so it can be
/// changed while playing. Audio is silent.
#[derive(Debug, Default)]
pub struct Colour;

impl Colour {
    pub const SERVICE: &'static str = "colour";

    /// `colour` takes any form [`Color`] parses; black when absent.
    pub fn producer(profile: SharedProfile, colour: Option<&str>) -> Result<Producer> {
        let colour = colour.unwrap_or("black");
        colour.parse::<Color>()?;
        let producer = Producer::new(ServiceKind::Producer, Self::SERVICE, profile, Self, None);
        producer.properties().set_string("resource", colour);
        Ok(producer)
    }
}

impl ProducerImpl for Colour {
    fn get_frame(&self, producer: &Producer, index: Position) -> Result<Frame> {
        let colour = producer
            .properties()
            .get_color("resource")
            .unwrap_or(Color::BLACK);
        let profile = producer.profile().clone();
        let mut frame = Frame::new(index);
        frame.set_test_audio(true);
        frame.push_image_callback(move |_, req| {
            let (width, height) = render_size(req, &profile);
            Ok(Image::filled(req.format, width, height, colour))
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
    use weft_core::{FrameRate, ImageRequest, Profile};

    fn profile() -> SharedProfile {
        Profile::preview(8, 6, FrameRate::FPS_25).shared()
    }

    #[test]
    fn test_fills_with_resource_colour() {
        let p = Colour::producer(profile(), Some("#102030")).unwrap();
        let mut frame = p.frame_at(3).unwrap();
        let image = frame.get_image(&ImageRequest::rgba(0, 0)).unwrap();
        assert_eq!((image.width, image.height), (8, 6));
        assert_eq!(image.pixel(7, 5), Some([0x10, 0x20, 0x30, 255]));
        assert!(frame.is_test_audio());
    }

    #[test]
    fn test_colour_change_applies_to_later_frames() {
        let p = Colour::producer(profile(), None).unwrap();
        p.properties().set_string("resource", "white");
        let mut frame = p.frame_at(0).unwrap();
        let image = frame.get_image(&ImageRequest::rgba(2, 2)).unwrap();
        assert_eq!(image.pixel(0, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_bad_colour_rejected() {
        assert!(Colour::producer(profile(), Some("mauve-ish")).is_err());
    }
}
