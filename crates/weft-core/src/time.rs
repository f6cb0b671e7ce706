//! Frame positions and frame rates.
//!
//! Positions are integral frame counts. Conversions to wall-clock time go
//! through rational arithmetic so that 29.97 and friends stay exact.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, WeftError};

/// A frame count: absolute or relative position on a timeline, or a length.
pub type Position = i64;

/// Frame rate as a rational number (e.g., 30000/1001 for 29.97 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    /// Numerator (e.g., 30000)
    pub numerator: u32,
    /// Denominator (e.g., 1001)
    pub denominator: u32,
}

impl FrameRate {
    /// Create a new frame rate.
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second as f64.
    #[inline]
    pub fn fps(self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }

    /// The rate as an exact rational.
    #[inline]
    pub fn as_rational(self) -> Rational64 {
        Rational64::new(self.numerator as i64, self.denominator.max(1) as i64)
    }

    /// Wall-clock duration of one frame.
    pub fn frame_duration(self) -> Duration {
        if self.numerator == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.denominator as u64 * 1_000_000_000 / self.numerator as u64)
    }

    /// Seconds elapsed at the start of `position`.
    pub fn seconds_at(self, position: Position) -> f64 {
        if self.numerator == 0 {
            return 0.0;
        }
        let t = Rational64::new(position * self.denominator as i64, self.numerator as i64);
        *t.numer() as f64 / *t.denom() as f64
    }

    /// Frame that is showing at `seconds` (floored).
    pub fn position_at(self, seconds: f64) -> Position {
        (seconds * self.fps()).floor() as Position
    }

    /// Nominal integer frame rate used for timecode (29.97 → 30).
    fn timebase(self) -> i64 {
        self.fps().round().max(1.0) as i64
    }

    /// Format a position as non-drop `HH:MM:SS:FF` timecode.
    pub fn to_timecode(self, position: Position) -> String {
        let base = self.timebase();
        let sign = if position < 0 { "-" } else { "" };
        let p = position.abs();
        let frames = p % base;
        let total_seconds = p / base;
        format!(
            "{sign}{:02}:{:02}:{:02}:{:02}",
            total_seconds / 3600,
            (total_seconds / 60) % 60,
            total_seconds % 60,
            frames
        )
    }

    /// Parse `HH:MM:SS:FF`, `MM:SS:FF`, `SS:FF` or a plain frame count.
    pub fn parse_timecode(self, text: &str) -> Result<Position> {
        let text = text.trim();
        let (negative, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let fields: Vec<&str> = text.split([':', ';']).collect();
        if fields.len() > 4 || fields.iter().any(|f| f.is_empty()) {
            return Err(WeftError::InvalidParameter(format!(
                "Malformed timecode '{text}'"
            )));
        }
        let mut values = Vec::with_capacity(fields.len());
        for field in &fields {
            let v: i64 = field.parse().map_err(|_| {
                WeftError::InvalidParameter(format!("Malformed timecode '{text}'"))
            })?;
            values.push(v);
        }
        let base = self.timebase();
        let position = match values.as_slice() {
            [f] => *f,
            [s, f] => s * base + f,
            [m, s, f] => (m * 60 + s) * base + f,
            [h, m, s, f] => ((h * 60 + m) * 60 + s) * base + f,
            _ => 0,
        };
        Ok(if negative { -position } else { position })
    }

    /// Common frame rates
    pub const FPS_23_976: Self = Self::new(24000, 1001);
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_50: Self = Self::new(50, 1);
    pub const FPS_59_94: Self = Self::new(60000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_25
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.fps();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}
