//! Colour bars test card.

use std::any::Any;
use weft_core::{Frame, Image, Position, Result, SharedProfile};
use weft_timeline::prelude::*;
use weft_timeline::{Producer, ServiceKind};

use super::render_size;

#[derive(Debug, Default)]
pub struct Bars;

impl Bars {
    pub const SERVICE: &'static str = "bars";

    pub fn producer(profile: SharedProfile) -> Producer {
        Producer::new(ServiceKind::Producer, Self::SERVICE, profile, Self, None)
    }
}

impl ProducerImpl for Bars {
    fn get_frame(&self, producer: &Producer, index: Position) -> Result<Frame> {
        let profile = producer.profile().clone();
        let mut frame = Frame::new(index);
        frame.set_test_audio(true);
        frame.push_image_callback(move |_, req| {
            let (width, height) = render_size(req, &profile);
            Ok(Image::test_pattern(width, height).convert(req.format))
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
    use weft_core::{FrameRate, ImageFormat, ImageRequest, Profile};

    #[test]
    fn test_bars_in_requested_format() {
        let p = Bars::producer(Profile::preview(16, 4, FrameRate::FPS_25).shared());
        let mut frame = p.frame_at(0).unwrap();
        let image = frame
            .get_image(&ImageRequest::new(ImageFormat::Rgb8, 0, 0))
            .unwrap();
        assert_eq!(image.format, ImageFormat::Rgb8);
        assert_eq!(image.data.len(), 16 * 4 * 3);
        // first bar white, last bar black
        assert_eq!(image.pixel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(image.pixel(15, 0), Some([0, 0, 0, 255]));
    }
}
