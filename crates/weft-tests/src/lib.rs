//! Integration test crate for weft.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on every weft crate to verify they work together.

#[cfg(test)]
mod composition;

#[cfg(test)]
mod documents;

#[cfg(test)]
mod playback;
