//! Color values as stored in properties.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WeftError;

/// 8-bit RGBA color, straight (not premultiplied) alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Create a new color from RGBA components.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from RGB.
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Packed `0xRRGGBBAA`.
    #[inline]
    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes([self.r, self.g, self.b, self.a])
    }

    /// From packed `0xRRGGBBAA`.
    #[inline]
    pub fn from_u32(v: u32) -> Self {
        let [r, g, b, a] = v.to_be_bytes();
        Self { r, g, b, a }
    }

    /// Bytes in RGBA order.
    #[inline]
    pub fn to_rgba8(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Luminance (BT.709 weights) in 0..=255.
    #[inline]
    pub fn luminance(self) -> u8 {
        (0.2126 * self.r as f32 + 0.7152 * self.g as f32 + 0.0722 * self.b as f32).round() as u8
    }

    /// Linear interpolation between two colors.
    #[inline]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round().clamp(0.0, 255.0) as u8;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }

    fn named(name: &str) -> Option<Self> {
        Some(match name {
            "black" => Self::BLACK,
            "white" => Self::WHITE,
            "red" => Self::RED,
            "green" => Self::GREEN,
            "blue" => Self::BLUE,
            "transparent" => Self::TRANSPARENT,
            _ => return None,
        })
    }

    // Common colors
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const GREEN: Self = Self::rgb(0, 255, 0);
    pub const BLUE: Self = Self::rgb(0, 0, 255);
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);
}

/// Accepts `#rrggbb`, `#aarrggbb`, `0xrrggbbaa`, a decimal packed value or a
/// color name.
impl FromStr for Color {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || WeftError::InvalidParameter(format!("Invalid color '{s}'"));
        if let Some(hex) = s.strip_prefix('#') {
            let v = u32::from_str_radix(hex, 16).map_err(|_| bad())?;
            return match hex.len() {
                6 => Ok(Self::from_u32((v << 8) | 0xff)),
                // #aarrggbb: rotate alpha to the low byte
                8 => Ok(Self::from_u32(v.rotate_left(8))),
                _ => Err(bad()),
            };
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u32::from_str_radix(hex, 16).map(Self::from_u32).map_err(|_| bad());
        }
        if let Ok(v) = s.parse::<u32>() {
            return Ok(Self::from_u32(v));
        }
        Self::named(&s.to_ascii_lowercase()).ok_or_else(bad)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.a, self.r, self.g, self.b)
        }
    }
}
