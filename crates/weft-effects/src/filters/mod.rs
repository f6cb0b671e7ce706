//! Built-in filters.

mod brightness;
mod greyscale;
mod volume;

pub use brightness::Brightness;
pub use greyscale::Greyscale;
pub use volume::Volume;

use rayon::prelude::*;
use weft_core::Image;

/// Run `f` over every row of `image` in parallel.
pub(crate) fn for_each_row<F>(image: &mut Image, f: F)
where
    F: Fn(&mut [u8]) + Send + Sync,
{
    let stride = image.stride();
    if stride == 0 {
        return;
    }
    image.data.par_chunks_mut(stride).for_each(|row| f(row));
}
