//! Video profiles: the immutable geometry/timing every service is built for.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::time::FrameRate;

/// Frame geometry and timing descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Human-readable name
    pub description: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame rate
    pub frame_rate: FrameRate,
    /// Sample (pixel) aspect ratio as num/den
    pub sample_aspect: (u32, u32),
    /// Display aspect ratio as num/den
    pub display_aspect: (u32, u32),
    /// Progressive (true) or interlaced (false)
    pub progressive: bool,
    /// Field order for interlaced material
    pub top_field_first: bool,
    /// Matrix coefficients (601, 709, 2020)
    pub colorspace: u32,
}

/// Profiles are shared by every service built against them.
pub type SharedProfile = Arc<Profile>;

impl Profile {
    /// Create a progressive square-pixel profile.
    pub fn new(description: impl Into<String>, width: u32, height: u32, frame_rate: FrameRate) -> Self {
        let g = gcd(width.max(1), height.max(1));
        Self {
            description: description.into(),
            width,
            height,
            frame_rate,
            sample_aspect: (1, 1),
            display_aspect: (width.max(1) / g, height.max(1) / g),
            progressive: true,
            top_field_first: false,
            colorspace: 709,
        }
    }

    /// HD 1080p 25 fps.
    pub fn hd_1080p_25() -> Self {
        Self::new("HD 1080p 25 fps", 1920, 1080, FrameRate::FPS_25)
    }

    /// HD 1080p 29.97 fps.
    pub fn hd_1080p_2997() -> Self {
        Self::new("HD 1080p 29.97 fps", 1920, 1080, FrameRate::FPS_29_97)
    }

    /// HD 720p 50 fps.
    pub fn hd_720p_50() -> Self {
        Self::new("HD 720p 50 fps", 1280, 720, FrameRate::FPS_50)
    }

    /// DV PAL 4:3, interlaced, bottom field first.
    pub fn dv_pal() -> Self {
        Self {
            description: "DV/DVD PAL".into(),
            width: 720,
            height: 576,
            frame_rate: FrameRate::FPS_25,
            sample_aspect: (16, 15),
            display_aspect: (4, 3),
            progressive: false,
            top_field_first: false,
            colorspace: 601,
        }
    }

    /// A tiny profile for tests and previews.
    pub fn preview(width: u32, height: u32, frame_rate: FrameRate) -> Self {
        Self::new("Preview", width, height, frame_rate)
    }

    /// Sample aspect ratio as f64.
    pub fn sar(&self) -> f64 {
        self.sample_aspect.0 as f64 / self.sample_aspect.1.max(1) as f64
    }

    /// Display aspect ratio as f64.
    pub fn dar(&self) -> f64 {
        self.display_aspect.0 as f64 / self.display_aspect.1.max(1) as f64
    }

    /// Frames per second.
    pub fn fps(&self) -> f64 {
        self.frame_rate.fps()
    }

    /// Wrap in the shared handle services hold.
    pub fn shared(self) -> SharedProfile {
        Arc::new(self)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::hd_1080p_25()
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_aspect_reduced() {
        let p = Profile::hd_1080p_25();
        assert_eq!(p.display_aspect, (16, 9));
        assert!((p.dar() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_pal_is_interlaced() {
        let p = Profile::dv_pal();
        assert!(!p.progressive);
        assert!((p.sar() - 16.0 / 15.0).abs() < 1e-9);
    }
}
