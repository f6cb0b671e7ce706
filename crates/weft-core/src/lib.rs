//! Weft Core - Foundation types for frame composition
//!
//! This crate provides the fundamental types used throughout weft:
//! - The property store (typed, ordered, shared key/value container)
//! - Keyframe animation of property values
//! - Frames with lazy image/audio callback stacks
//! - Image and audio buffers
//! - Profiles, frame rates and positions
//! - Shared process resources

pub mod animation;
pub mod audio;
pub mod color;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod image;
pub mod profile;
pub mod properties;
pub mod shared;
pub mod time;

pub use animation::{AnimValue, Animation, Interpolation, Keyframe};
pub use audio::{samples_for_position, Audio, AudioRequest, SharedAudio};
pub use color::Color;
pub use error::{Result, WeftError};
pub use frame::{Frame, GetAudio, GetImage};
pub use geometry::Rect;
pub use image::{Image, ImageFormat, ImageRequest, Rgba, SharedImage};
pub use profile::{Profile, SharedProfile};
pub use properties::{DataCell, DataRef, ListenerId, Properties, Value};
pub use shared::{ResourceHandle, SharedResource};
pub use time::{FrameRate, Position};

/// Tunables shared across crates.
pub mod defaults {
    use std::time::Duration;

    /// Frames buffered between the pump and presentation threads.
    pub const QUEUE_DEPTH: usize = 8;

    /// Upper bound on one pacing sleep.
    pub const MAX_PACING_SLEEP: Duration = Duration::from_millis(500);

    /// How late a frame may be before it is dropped while scrubbing.
    pub const LATE_FRAME_THRESHOLD: Duration = Duration::from_millis(100);

    /// How long `stop` waits for a worker thread before giving up on it.
    pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Length assumed for generators with no natural end (15000 frames is
    /// ten minutes at 25 fps).
    pub const GENERATOR_LENGTH: i64 = 15_000;

    /// Length of a `mix` when the caller passes none.
    pub const MIX_LENGTH: i64 = 25;
}
