//! Built-in transitions.
//!
//! Video transitions render on RGBA pixels through [`PixelTransition`]; the
//! A frame's audio passes through them untouched. [`AudioMix`] is the
//! reverse. [`Dissolve`] does both and is what playlist mixes default to.

mod dip;
mod mix;
mod wipe;

pub use dip::Dip;
pub use mix::AudioMix;
pub use weft_timeline::Dissolve;
pub use wipe::{Wipe, WipeDirection};

use tracing::warn;
use weft_core::{Frame, Image, ImageFormat, ImageRequest};
use weft_timeline::share_frame;

/// A video transition between two RGBA buffers of equal size.
pub trait PixelTransition: Send + 'static {
    /// Progress goes from 0.0 (pure A) to 1.0 (pure B).
    fn render(&self, a: &[u8], b: &[u8], w: u32, h: u32, progress: f32) -> Vec<u8>;
}

/// Wrap `a`'s image with `pixels` rendered against `b`.
///
/// `b` is rendered at A's size. If B fails, A is shown alone.
pub(crate) fn push_pixels<T: PixelTransition>(pixels: T, a: &mut Frame, b: Frame, progress: f32) {
    let b = share_frame(b);
    a.push_image_callback(move |a, req| {
        let under = a.pull_image(req)?.convert(ImageFormat::Rgba8);
        let (width, height) = (under.width, under.height);
        let over = match b.lock().get_image(&ImageRequest::rgba(width, height)) {
            Ok(over) => over,
            Err(e) => {
                warn!(position = a.position(), error = %e, "B frame has no image, showing A");
                return Ok(under.convert(req.format));
            }
        };
        let data = pixels.render(&under.data, &over.data, width, height, progress);
        let image = Image {
            format: ImageFormat::Rgba8,
            width,
            height,
            data,
        };
        Ok(image.convert(req.format))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producers::Colour;
    use weft_core::{FrameRate, Profile, SharedProfile};

    fn profile() -> SharedProfile {
        Profile::preview(4, 2, FrameRate::FPS_25).shared()
    }

    #[test]
    fn test_wipe_between_producers_in_rgb() {
        let t = Wipe::transition(profile(), Some("left")).unwrap();
        t.set_in_and_out(0, 2);
        let red = Colour::producer(profile(), Some("red")).unwrap();
        let blue = Colour::producer(profile(), Some("blue")).unwrap();
        let mut a = red.frame_at(1).unwrap();
        t.apply(&mut a, blue.frame_at(1).unwrap());
        let image = a
            .get_image(&ImageRequest::new(ImageFormat::Rgb8, 0, 0))
            .unwrap();
        assert_eq!(image.format, ImageFormat::Rgb8);
        assert_eq!(image.pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(image.pixel(3, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_missing_b_image_shows_a() {
        let t = Dip::transition(profile(), Some("white")).unwrap();
        t.set_in_and_out(0, 10);
        let red = Colour::producer(profile(), Some("red")).unwrap();
        let mut a = red.frame_at(5).unwrap();
        t.apply(&mut a, Frame::new(5));
        let image = a.get_image(&ImageRequest::rgba(0, 0)).unwrap();
        assert_eq!(image.pixel(1, 1), Some([255, 0, 0, 255]));
    }
}
