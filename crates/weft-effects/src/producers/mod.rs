//! Built-in frame sources.

mod bars;
mod colour;
mod timewarp;
mod tone;

pub use bars::Bars;
pub use colour::Colour;
pub use timewarp::Timewarp;
pub use tone::{SineTable, Tone};

use weft_core::{ImageRequest, Profile};

/// Size to render at: the request's, falling back to the profile's.
pub(crate) fn render_size(request: &ImageRequest, profile: &Profile) -> (u32, u32) {
    let width = if request.width == 0 { profile.width } else { request.width };
    let height = if request.height == 0 { profile.height } else { request.height };
    (width, height)
}
