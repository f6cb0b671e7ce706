//! Image buffers produced by frame evaluation.
//!
//! Buffers are immutable once shared: a frame caches its evaluated image as a
//! [`SharedImage`] and anything that needs to modify pixels works on a copy.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::color::Color;

/// Pixel format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    /// 8-bit RGBA (32 bits per pixel)
    #[default]
    Rgba8,
    /// 8-bit RGB (24 bits per pixel)
    Rgb8,
    /// 8-bit grayscale
    Gray8,
}

impl ImageFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
            Self::Gray8 => 1,
        }
    }

    /// Calculate total bytes needed for an image of this format.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// One RGBA pixel, castable from `Rgba8` byte slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// What a consumer asks `get_image` for. Zero width or height means
/// "the profile's size".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRequest {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ImageRequest {
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    /// RGBA at the given size.
    pub fn rgba(width: u32, height: u32) -> Self {
        Self::new(ImageFormat::Rgba8, width, height)
    }
}

/// A tightly packed image in CPU memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Evaluated images are shared, never mutated in place.
pub type SharedImage = Arc<Image>;

const BARS: [[u8; 4]; 8] = [
    [255, 255, 255, 255], // White
    [255, 255, 0, 255],   // Yellow
    [0, 255, 255, 255],   // Cyan
    [0, 255, 0, 255],     // Green
    [255, 0, 255, 255],   // Magenta
    [255, 0, 0, 255],     // Red
    [0, 0, 255, 255],     // Blue
    [0, 0, 0, 255],       // Black
];

impl Image {
    /// A zeroed image (transparent black for RGBA).
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            data: vec![0; format.frame_size(width, height)],
        }
    }

    /// Opaque black.
    pub fn black(format: ImageFormat, width: u32, height: u32) -> Self {
        Self::filled(format, width, height, Color::BLACK)
    }

    /// Filled with a single color.
    pub fn filled(format: ImageFormat, width: u32, height: u32, color: Color) -> Self {
        let pixel: Vec<u8> = match format {
            ImageFormat::Rgba8 => color.to_rgba8().to_vec(),
            ImageFormat::Rgb8 => vec![color.r, color.g, color.b],
            ImageFormat::Gray8 => vec![color.luminance()],
        };
        let count = width as usize * height as usize;
        Self {
            format,
            width,
            height,
            data: pixel.repeat(count),
        }
    }

    /// Eight vertical color bars in RGBA.
    pub fn test_pattern(width: u32, height: u32) -> Self {
        let mut image = Self::new(ImageFormat::Rgba8, width, height);
        let row_len = width as usize * 4;
        if row_len == 0 {
            return image;
        }
        for row in image.data.chunks_exact_mut(row_len) {
            let pixels: &mut [Rgba] = bytemuck::cast_slice_mut(row);
            for (x, px) in pixels.iter_mut().enumerate() {
                let bar = BARS[x * 8 / width as usize];
                *px = Rgba {
                    r: bar[0],
                    g: bar[1],
                    b: bar[2],
                    a: bar[3],
                };
            }
        }
        image
    }

    /// Bytes per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Total memory usage in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    /// RGBA pixels at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let i = (y as usize * self.width as usize + x as usize) * bpp;
        let p = &self.data[i..i + bpp];
        Some(match self.format {
            ImageFormat::Rgba8 => [p[0], p[1], p[2], p[3]],
            ImageFormat::Rgb8 => [p[0], p[1], p[2], 255],
            ImageFormat::Gray8 => [p[0], p[0], p[0], 255],
        })
    }

    /// Convert to another format. Alpha is dropped or set opaque.
    pub fn convert(&self, format: ImageFormat) -> Self {
        if format == self.format {
            return self.clone();
        }
        let count = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(format.frame_size(self.width, self.height));
        for i in 0..count {
            let x = (i % self.width.max(1) as usize) as u32;
            let y = (i / self.width.max(1) as usize) as u32;
            let [r, g, b, a] = self.pixel(x, y).unwrap_or([0, 0, 0, 255]);
            match format {
                ImageFormat::Rgba8 => data.extend_from_slice(&[r, g, b, a]),
                ImageFormat::Rgb8 => data.extend_from_slice(&[r, g, b]),
                ImageFormat::Gray8 => data.push(Color::rgb(r, g, b).luminance()),
            }
        }
        Self {
            format,
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Nearest-neighbour resize.
    pub fn resize(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let bpp = self.format.bytes_per_pixel();
        let mut out = Self::new(self.format, width, height);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..height as usize {
            let sy = y * self.height as usize / height.max(1) as usize;
            for x in 0..width as usize {
                let sx = x * self.width as usize / width.max(1) as usize;
                let src = (sy * self.width as usize + sx) * bpp;
                let dst = (y * width as usize + x) * bpp;
                out.data[dst..dst + bpp].copy_from_slice(&self.data[src..src + bpp]);
            }
        }
        out
    }

    /// Match the request, converting and resizing as needed.
    pub fn conform(&self, request: &ImageRequest) -> Self {
        let width = if request.width == 0 { self.width } else { request.width };
        let height = if request.height == 0 { self.height } else { request.height };
        self.resize(width, height).convert(request.format)
    }

    /// Per-byte mix: `self * (1 - t) + other * t`. Sizes must match, else
    /// `other` is resized first.
    pub fn blend(&self, other: &Self, t: f64) -> Self {
        let other = other.conform(&ImageRequest::new(self.format, self.width, self.height));
        let t = t.clamp(0.0, 1.0);
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| (a as f64 + (b as f64 - a as f64) * t).round() as u8)
            .collect();
        Self {
            format: self.format,
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Wrap into the shared form.
    pub fn shared(self) -> SharedImage {
        Arc::new(self)
    }
}
