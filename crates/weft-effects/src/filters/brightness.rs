//! Brightness: scale colour channels by an animated `level`.

use std::any::Any;
use weft_core::{Frame, ImageFormat, Result, SharedProfile};
use weft_timeline::{Filter, FilterImpl, Service};

use super::for_each_row;

#[derive(Debug, Default)]
pub struct Brightness;

impl Brightness {
    pub const SERVICE: &'static str = "brightness";

    /// `level` is a number or keyframes (`0=0;24=1`); 1 when absent.
    pub fn filter(profile: SharedProfile, level: Option<&str>) -> Filter {
        let filter = Filter::new(Self::SERVICE, profile, Self);
        filter.properties().set_string("level", level.unwrap_or("1"));
        filter
    }
}

impl FilterImpl for Brightness {
    fn process(&self, filter: &Filter, frame: &mut Frame) -> Result<()> {
        let level = filter.animated_double("level", frame, 1.0).max(0.0);
        if (level - 1.0).abs() < f64::EPSILON {
            return Ok(());
        }
        frame.push_image_callback(move |frame, req| {
            let mut image = frame.pull_image(req)?;
            // Alpha is the fourth byte of RGBA and is left alone
            let skip_alpha = image.format == ImageFormat::Rgba8;
            for_each_row(&mut image, |row| {
                for (i, byte) in row.iter_mut().enumerate() {
                    if skip_alpha && i % 4 == 3 {
                        continue;
                    }
                    *byte = (*byte as f64 * level).round().min(255.0) as u8;
                }
            });
            Ok(image)
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
