//! Rectangles with opacity, the geometry value kind of the property store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WeftError};

/// Axis-aligned rectangle carrying an opacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Opacity in 0.0..=1.0
    pub o: f64,
}

impl Default for Rect {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl Rect {
    /// Create a fully opaque rectangle.
    #[inline]
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h, o: 1.0 }
    }

    /// Builder-style opacity.
    #[inline]
    pub const fn with_opacity(mut self, o: f64) -> Self {
        self.o = o;
        self
    }

    /// Area of the rectangle.
    #[inline]
    pub fn area(self) -> f64 {
        self.w * self.h
    }

    /// Check if a point is inside the rectangle.
    #[inline]
    pub fn contains(self, px: f64, py: f64) -> bool {
        px >= self.x && px < self.x + self.w && py >= self.y && py < self.y + self.h
    }

    /// Compute intersection with another rectangle.
    pub fn intersection(self, other: Self) -> Option<Self> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        if x1 < x2 && y1 < y2 {
            Some(Self::new(x1, y1, x2 - x1, y2 - y1).with_opacity(self.o * other.o))
        } else {
            None
        }
    }

    /// Component-wise linear interpolation.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let mix = |a: f64, b: f64| a + (b - a) * t;
        Self {
            x: mix(self.x, other.x),
            y: mix(self.y, other.y),
            w: mix(self.w, other.w),
            h: mix(self.h, other.h),
            o: mix(self.o, other.o),
        }
    }

    /// Parse `x/y:wxh[:opacity]`, resolving percentages against a frame size.
    ///
    /// Percentages on x/w are relative to `width`, on y/h to `height`, and on
    /// opacity to 1.0. A bare opacity above 1 is read as a percentage.
    pub fn parse_with_size(s: &str, width: f64, height: f64) -> Result<Self> {
        let bad = || WeftError::InvalidParameter(format!("Invalid rect '{s}'"));
        let fields: Vec<&str> = s
            .trim()
            .split(|c: char| c == '/' || c == ':' || c == 'x' || c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 4 || fields.len() > 5 {
            return Err(bad());
        }
        let number = |field: &str, scale: f64| -> Result<f64> {
            match field.strip_suffix('%') {
                Some(pct) => pct.parse::<f64>().map(|v| v / 100.0 * scale).map_err(|_| bad()),
                None => field.parse::<f64>().map_err(|_| bad()),
            }
        };
        let mut rect = Self::new(
            number(fields[0], width)?,
            number(fields[1], height)?,
            number(fields[2], width)?,
            number(fields[3], height)?,
        );
        if let Some(o) = fields.get(4) {
            let v = number(o, 1.0)?;
            rect.o = if !o.ends_with('%') && v > 1.0 { v / 100.0 } else { v };
        }
        Ok(rect)
    }
}

/// Parses with percentages taken as fractions of 1.0.
impl FromStr for Rect {
    type Err = WeftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse_with_size(s, 1.0, 1.0)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}x{}", self.x, self.y, self.w, self.h)?;
        if (self.o - 1.0).abs() > f64::EPSILON {
            write!(f, ":{}", self.o)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pixels() {
        let r: Rect = "10/20:300x200".parse().unwrap();
        assert_eq!(r, Rect::new(10.0, 20.0, 300.0, 200.0));
        assert_eq!(r.o, 1.0);
    }

    #[test]
    fn test_parse_percent_and_opacity() {
        let r = Rect::parse_with_size("0%/50%:100%x50%:50%", 1920.0, 1080.0).unwrap();
        assert_eq!(r, Rect::new(0.0, 540.0, 1920.0, 540.0).with_opacity(0.5));
        let r: Rect = "0/0:10x10:75".parse().unwrap();
        assert!((r.o - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("1/2:3".parse::<Rect>().is_err());
        assert!("a/b:cxd".parse::<Rect>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let r = Rect::new(1.5, 2.0, 3.0, 4.0).with_opacity(0.25);
        assert_eq!(r.to_string().parse::<Rect>().unwrap(), r);
    }

    #[test]
    fn test_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersection(b).unwrap(), Rect::new(5.0, 5.0, 5.0, 5.0));
        assert!(a.intersection(Rect::new(20.0, 20.0, 1.0, 1.0)).is_none());
    }
}
