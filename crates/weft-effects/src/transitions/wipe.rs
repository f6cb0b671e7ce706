use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use weft_core::{Frame, Result, SharedProfile, WeftError};
use weft_timeline::{Service, Transition, TransitionImpl};

use super::{push_pixels, PixelTransition};

/// Edge the incoming B frame is revealed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeDirection {
    #[default]
    Left,
    Right,
    Up,
    Down,
}

impl WipeDirection {
    fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for WipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WipeDirection {
    type Err = WeftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(WeftError::InvalidParameter(format!(
                "Unknown wipe direction '{other}'"
            ))),
        }
    }
}

/// Hard-edged wipe. The direction is read from the `direction` property
/// each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wipe {
    pub direction: WipeDirection,
}

impl Wipe {
    pub const SERVICE: &'static str = "wipe";

    pub fn transition(profile: SharedProfile, direction: Option<&str>) -> Result<Transition> {
        let direction = direction.map(str::parse::<WipeDirection>).transpose()?.unwrap_or_default();
        let transition = Transition::new(Self::SERVICE, profile, Self { direction });
        transition
            .properties()
            .set_string("direction", direction.to_string());
        Ok(transition)
    }
}

impl PixelTransition for Wipe {
    fn render(&self, a: &[u8], b: &[u8], w: u32, h: u32, progress: f32) -> Vec<u8> {
        let row_len = w as usize * 4;
        let mut out = vec![0u8; row_len * h as usize];
        if row_len == 0 {
            return out;
        }
        let p = progress.clamp(0.0, 1.0);
        let direction = self.direction;

        out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            for x in 0..w as usize {
                let threshold = match direction {
                    WipeDirection::Left => x as f32 / w as f32,
                    WipeDirection::Right => 1.0 - (x + 1) as f32 / w as f32,
                    WipeDirection::Up => y as f32 / h as f32,
                    WipeDirection::Down => 1.0 - (y + 1) as f32 / h as f32,
                };
                let src = if threshold < p { b } else { a };
                let i = y * row_len + x * 4;
                for c in 0..4 {
                    row[x * 4 + c] = src.get(i + c).copied().unwrap_or(0);
                }
            }
        });
        out
    }
}

impl TransitionImpl for Wipe {
    fn process(&self, transition: &Transition, a: &mut Frame, b: Frame) -> Result<()> {
        let direction = match transition.properties().get_string("direction") {
            Some(text) => text.parse()?,
            None => self.direction,
        };
        let progress = transition.progress(a.position()) as f32;
        push_pixels(Wipe { direction }, a, b, progress);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(direction: WipeDirection, progress: f32) -> Vec<u8> {
        let a = [0u8; 4 * 4];
        let b = [9u8; 4 * 4];
        let out = Wipe { direction }.render(&a, &b, 4, 1, progress);
        out.chunks(4).map(|px| px[0]).collect()
    }

    #[test]
    fn test_left_wipe_reveals_from_left() {
        assert_eq!(columns(WipeDirection::Left, 0.0), vec![0, 0, 0, 0]);
        assert_eq!(columns(WipeDirection::Left, 0.5), vec![9, 9, 0, 0]);
        assert_eq!(columns(WipeDirection::Left, 1.0), vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_right_wipe_reveals_from_right() {
        assert_eq!(columns(WipeDirection::Right, 0.5), vec![0, 0, 9, 9]);
        assert_eq!(columns(WipeDirection::Right, 1.0), vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Down".parse::<WipeDirection>().unwrap(), WipeDirection::Down);
        assert!("sideways".parse::<WipeDirection>().is_err());
        assert_eq!(WipeDirection::Up.to_string(), "up");
    }
}
