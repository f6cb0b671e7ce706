//! Weft Effects - Built-in services and graph loading
//!
//! Provides the stock producers (colour, bars, tone, timewarp), filters
//! (brightness, greyscale, volume) and transitions (dissolve, wipe, dip,
//! mix), the [`Repository`] that constructs them by id, and the [`Loader`]
//! that rebuilds a saved [`Document`](weft_timeline::Document).

pub mod filters;
pub mod loader;
pub mod producers;
pub mod repository;
pub mod transitions;

pub use filters::{Brightness, Greyscale, Volume};
pub use loader::Loader;
pub use producers::{Bars, Colour, SineTable, Timewarp, Tone};
pub use repository::Repository;
pub use transitions::{AudioMix, Dip, Dissolve, PixelTransition, Wipe, WipeDirection};
