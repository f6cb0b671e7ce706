//! Keyframed property values.
//!
//! An [`Animation`] is a sorted list of keyframes over discrete frame
//! positions. Interpolation between two keyframes uses the mode of the later
//! keyframe, so `0=0;25|=1` holds 0 until frame 25 and then jumps.
//!
//! The string form is `frame=value;frame|=value;frame~=value` where `=` is
//! linear, `|=` discrete and `~=` smooth (Catmull-Rom). Negative frames count
//! back from the animation length, so `-1=0` is always the last frame.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::color::Color;
use crate::error::{Result, WeftError};
use crate::geometry::Rect;
use crate::time::Position;

// ── Interpolation ───────────────────────────────────────────────

/// How to approach a keyframe from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    /// Hold the previous value until this keyframe.
    Discrete,
    /// Straight line from the previous value.
    #[default]
    Linear,
    /// Catmull-Rom spline through the neighbouring keyframes.
    Smooth,
}

impl Interpolation {
    fn operator(self) -> &'static str {
        match self {
            Self::Discrete => "|=",
            Self::Linear => "=",
            Self::Smooth => "~=",
        }
    }
}

// ── Values ──────────────────────────────────────────────────────

/// A value that can be keyframed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AnimValue {
    Number(f64),
    Rect(Rect),
    Color(Color),
}

impl AnimValue {
    /// Numeric view; rects yield their opacity, colors their alpha in 0..1.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Number(v) => *v,
            Self::Rect(r) => r.o,
            Self::Color(c) => c.a as f64 / 255.0,
        }
    }

    /// Rect view; numbers become a zero rect with that opacity.
    pub fn as_rect(&self) -> Rect {
        match self {
            Self::Rect(r) => *r,
            Self::Number(v) => Rect::default().with_opacity(*v),
            Self::Color(_) => Rect::default(),
        }
    }

    /// Color view; numbers are read as packed `0xRRGGBBAA`.
    pub fn as_color(&self) -> Color {
        match self {
            Self::Color(c) => *c,
            Self::Number(v) => Color::from_u32(*v as u32),
            Self::Rect(_) => Color::default(),
        }
    }

    fn lerp(&self, other: &Self, t: f64) -> Self {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => Self::Number(a + (b - a) * t),
            (Self::Rect(a), Self::Rect(b)) => Self::Rect(a.lerp(*b, t)),
            (Self::Color(a), Self::Color(b)) => Self::Color(a.lerp(*b, t)),
            // Mixed kinds cannot blend; hold the earlier one
            _ => *self,
        }
    }

    fn catmull_rom(p0: &Self, p1: &Self, p2: &Self, p3: &Self, t: f64) -> Self {
        let spline = |p0: f64, p1: f64, p2: f64, p3: f64| {
            let t2 = t * t;
            let t3 = t2 * t;
            0.5 * ((2.0 * p1)
                + (-p0 + p2) * t
                + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
                + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
        };
        match (p0, p1, p2, p3) {
            (Self::Number(a), Self::Number(b), Self::Number(c), Self::Number(d)) => {
                Self::Number(spline(*a, *b, *c, *d))
            }
            (Self::Rect(a), Self::Rect(b), Self::Rect(c), Self::Rect(d)) => Self::Rect(Rect {
                x: spline(a.x, b.x, c.x, d.x),
                y: spline(a.y, b.y, c.y, d.y),
                w: spline(a.w, b.w, c.w, d.w),
                h: spline(a.h, b.h, c.h, d.h),
                o: spline(a.o, b.o, c.o, d.o),
            }),
            _ => p1.lerp(p2, t),
        }
    }
}

impl FromStr for AnimValue {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(v) = s.parse::<f64>() {
            return Ok(Self::Number(v));
        }
        if s.starts_with('#') || s.starts_with("0x") || s.starts_with("0X") {
            return s.parse().map(Self::Color);
        }
        if s.contains('/') {
            return s.parse().map(Self::Rect);
        }
        s.parse().map(Self::Color)
    }
}

impl fmt::Display for AnimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Rect(r) => write!(f, "{r}"),
            Self::Color(c) => write!(f, "{c}"),
        }
    }
}

// ── Keyframe ────────────────────────────────────────────────────

/// A single keyframe at a frame position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Frame of this keyframe; negative counts from the end.
    pub frame: Position,
    pub value: AnimValue,
    /// Interpolation used when approaching this keyframe.
    pub interpolation: Interpolation,
}

// ── Animation ───────────────────────────────────────────────────

/// Keyframes for one animated property, sorted by frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    keyframes: Vec<Keyframe>,
}

impl Animation {
    /// Create an empty animation.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single keyframe at frame 0.
    pub fn constant(value: AnimValue) -> Self {
        let mut anim = Self::new();
        anim.set(0, value, Interpolation::Linear);
        anim
    }

    /// Insert or update a keyframe. Maintains sorted order.
    pub fn set(&mut self, frame: Position, value: AnimValue, interpolation: Interpolation) {
        let key = Keyframe {
            frame,
            value,
            interpolation,
        };
        match self.keyframes.binary_search_by(|kf| kf.frame.cmp(&frame)) {
            Ok(i) => self.keyframes[i] = key,
            Err(i) => self.keyframes.insert(i, key),
        }
    }

    /// Remove the keyframe at the given frame.
    pub fn remove(&mut self, frame: Position) -> bool {
        match self.keyframes.binary_search_by(|kf| kf.frame.cmp(&frame)) {
            Ok(i) => {
                self.keyframes.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Get all keyframes (read-only).
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    /// Number of keyframes.
    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    /// Whether there are no keyframes.
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Keyframes with negative frames resolved against `length`, re-sorted.
    fn resolved(&self, length: Position) -> Vec<Keyframe> {
        let mut keys: Vec<Keyframe> = self
            .keyframes
            .iter()
            .map(|kf| Keyframe {
                frame: if kf.frame < 0 {
                    (length + kf.frame).max(0)
                } else {
                    kf.frame
                },
                ..*kf
            })
            .collect();
        keys.sort_by_key(|kf| kf.frame);
        keys
    }

    /// Evaluate at `position` for an animation spanning `length` frames.
    ///
    /// Returns `None` when there are no keyframes. Positions before the
    /// first or after the last keyframe clamp to that keyframe's value.
    pub fn evaluate(&self, position: Position, length: Position) -> Option<AnimValue> {
        let keys = if self.keyframes.iter().any(|kf| kf.frame < 0) {
            self.resolved(length)
        } else {
            self.keyframes.clone()
        };
        let first = keys.first()?;
        if keys.len() == 1 || position <= first.frame {
            return Some(first.value);
        }
        let last = keys[keys.len() - 1];
        if position >= last.frame {
            return Some(last.value);
        }

        let idx = keys.partition_point(|kf| kf.frame <= position).saturating_sub(1);
        let a = &keys[idx];
        let b = &keys[idx + 1];
        let span = (b.frame - a.frame) as f64;
        if span <= 0.0 {
            return Some(b.value);
        }
        let t = ((position - a.frame) as f64 / span).clamp(0.0, 1.0);

        Some(match b.interpolation {
            Interpolation::Discrete => a.value,
            Interpolation::Linear => a.value.lerp(&b.value, t),
            Interpolation::Smooth => {
                let before = if idx > 0 { &keys[idx - 1] } else { a };
                let after = keys.get(idx + 2).unwrap_or(b);
                AnimValue::catmull_rom(&before.value, &a.value, &b.value, &after.value, t)
            }
        })
    }
}

impl FromStr for Animation {
    type Err = WeftError;

    /// Parse `frame=value;...`. An item without an operator is a keyframe at 0.
    fn from_str(s: &str) -> Result<Self> {
        let mut anim = Self::new();
        for item in s.split(';').map(str::trim).filter(|i| !i.is_empty()) {
            let Some(eq) = item.find('=') else {
                anim.set(0, item.parse()?, Interpolation::Linear);
                continue;
            };
            let (mut frame_text, value_text) = (&item[..eq], &item[eq + 1..]);
            let mut interpolation = Interpolation::Linear;
            if let Some(stripped) = frame_text.strip_suffix('|') {
                frame_text = stripped;
                interpolation = Interpolation::Discrete;
            } else if let Some(stripped) = frame_text.strip_suffix('~') {
                frame_text = stripped;
                interpolation = Interpolation::Smooth;
            }
            let frame = frame_text.trim().parse::<Position>().map_err(|_| {
                WeftError::InvalidParameter(format!("Invalid keyframe position in '{item}'"))
            })?;
            anim.set(frame, value_text.parse()?, interpolation);
        }
        Ok(anim)
    }
}

impl fmt::Display for Animation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, kf) in self.keyframes.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}{}{}", kf.frame, kf.interpolation.operator(), kf.value)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────
