use rayon::prelude::*;
use std::any::Any;
use weft_core::{Color, Frame, Result, SharedProfile};
use weft_timeline::{Service, Transition, TransitionImpl};

use super::{push_pixels, PixelTransition};

/// Fade A out to a colour over the first half, then the colour into B.
#[derive(Debug, Clone, Copy)]
pub struct Dip {
    pub colour: Color,
}

impl Default for Dip {
    fn default() -> Self {
        Self {
            colour: Color::BLACK,
        }
    }
}

impl Dip {
    pub const SERVICE: &'static str = "dip";

    /// `colour` defaults to black; `white` gives a dip to white.
    pub fn transition(profile: SharedProfile, colour: Option<&str>) -> Result<Transition> {
        let colour: Color = colour.unwrap_or("black").parse()?;
        let transition = Transition::new(Self::SERVICE, profile, Self { colour });
        transition.properties().set_string("colour", colour.to_string());
        Ok(transition)
    }
}

impl PixelTransition for Dip {
    fn render(&self, a: &[u8], b: &[u8], w: u32, h: u32, progress: f32) -> Vec<u8> {
        let size = w as usize * h as usize * 4;
        let p = progress.clamp(0.0, 1.0);
        let (src, fade, towards_colour) = if p < 0.5 {
            (a, p * 2.0, true)
        } else {
            (b, (p - 0.5) * 2.0, false)
        };
        let colour = self.colour.to_rgba8();

        let mut out = vec![0u8; size];
        out.par_chunks_mut(4).enumerate().for_each(|(i, px)| {
            for c in 0..3 {
                let s = src.get(i * 4 + c).copied().unwrap_or(0) as f32;
                let k = colour[c] as f32;
                let v = if towards_colour {
                    s + (k - s) * fade
                } else {
                    k + (s - k) * fade
                };
                px[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            px[3] = 255;
        });
        out
    }
}

impl TransitionImpl for Dip {
    fn process(&self, transition: &Transition, a: &mut Frame, b: Frame) -> Result<()> {
        let colour = transition
            .properties()
            .get_color("colour")
            .unwrap_or(self.colour);
        let progress = transition.progress(a.position()) as f32;
        push_pixels(Dip { colour }, a, b, progress);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(colour: Color, progress: f32) -> [u8; 4] {
        let a = [200, 100, 50, 255];
        let b = [10, 20, 30, 255];
        let out = Dip { colour }.render(&a, &b, 1, 1, progress);
        [out[0], out[1], out[2], out[3]]
    }

    #[test]
    fn test_dip_to_black_passes_through_black() {
        assert_eq!(render(Color::BLACK, 0.0), [200, 100, 50, 255]);
        assert_eq!(render(Color::BLACK, 0.25), [100, 50, 25, 255]);
        assert_eq!(render(Color::BLACK, 0.5), [0, 0, 0, 255]);
        assert_eq!(render(Color::BLACK, 1.0), [10, 20, 30, 255]);
    }

    #[test]
    fn test_dip_to_white_midpoint() {
        assert_eq!(render(Color::WHITE, 0.5), [255, 255, 255, 255]);
        assert_eq!(render(Color::WHITE, 1.0), [10, 20, 30, 255]);
    }
}
