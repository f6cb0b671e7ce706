//! Greyscale: replace colour with BT.709 luminance.

use std::any::Any;
use weft_core::{Color, Frame, ImageFormat, Result, Rgba, SharedProfile};
use weft_timeline::{Filter, FilterImpl};

use super::for_each_row;

#[derive(Debug, Default)]
pub struct Greyscale;

impl Greyscale {
    pub const SERVICE: &'static str = "greyscale";

    pub fn filter(profile: SharedProfile) -> Filter {
        Filter::new(Self::SERVICE, profile, Self)
    }
}

impl FilterImpl for Greyscale {
    fn process(&self, _filter: &Filter, frame: &mut Frame) -> Result<()> {
        frame.push_image_callback(|frame, req| {
            let mut image = frame.pull_image(req)?;
            match image.format {
                ImageFormat::Rgba8 => for_each_row(&mut image, |row| {
                    let pixels: &mut [Rgba] = bytemuck::cast_slice_mut(row);
                    for px in pixels {
                        let y = Color::rgb(px.r, px.g, px.b).luminance();
                        (px.r, px.g, px.b) = (y, y, y);
                    }
                }),
                ImageFormat::Rgb8 => for_each_row(&mut image, |row| {
                    for px in row.chunks_exact_mut(3) {
                        let y = Color::rgb(px[0], px[1], px[2]).luminance();
                        px.fill(y);
                    }
                }),
                ImageFormat::Gray8 => {}
            }
            Ok(image)
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
