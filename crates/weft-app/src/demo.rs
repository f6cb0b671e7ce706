//! Demo timeline: three tracks joined by a tractor.
//!
//! Track 0 is a playlist of a blue clip and colour bars mixed with a wipe.
//! Track 1 starts after a blank and holds a fading red clip, brought in by
//! a dissolve. Track 2 is a tone mixed into the background audio.

use weft_core::{Result, SharedProfile};
use weft_effects::Repository;
use weft_timeline::prelude::*;
use weft_timeline::{Playlist, Producer, Tractor};

/// Frames per clip on the background track.
pub const CLIP_LENGTH: i64 = 50;

/// Frames of the wipe between the two background clips.
pub const MIX_LENGTH: i64 = 12;

pub fn build_timeline(repository: &Repository, profile: SharedProfile) -> Result<Producer> {
    let background = Playlist::new(profile.clone());
    let blue = repository.create_producer(profile.clone(), "colour", Some("#1f3a93"))?;
    let bars = repository.create_producer(profile.clone(), "bars", None)?;
    background.append_io(&blue, 0, CLIP_LENGTH - 1)?;
    background.append_io(&bars, 0, CLIP_LENGTH - 1)?;
    let wipe = repository.create_transition(profile.clone(), "wipe", Some("right"))?;
    background.mix(0, Some(MIX_LENGTH), Some(wipe))?;

    let overlay = Playlist::new(profile.clone());
    overlay.blank(CLIP_LENGTH / 2)?;
    let red = repository.create_producer(profile.clone(), "colour", Some("red"))?;
    let fade = repository.create_filter(profile.clone(), "brightness", None)?;
    fade.properties().set_string("level", "0=1;30=0.2");
    red.attach(&fade)?;
    overlay.append_io(&red, 0, CLIP_LENGTH - 1)?;

    let tone = repository.create_producer(profile.clone(), "tone", Some("440"))?;
    let volume = repository.create_filter(profile.clone(), "volume", Some("0.5"))?;
    tone.attach(&volume)?;

    let tractor = Tractor::new(profile.clone());
    tractor.set_track(background.producer(), 0)?;
    tractor.set_track(overlay.producer(), 1)?;

    let dissolve = repository.create_transition(profile.clone(), "dissolve", None)?;
    let start = CLIP_LENGTH / 2;
    dissolve.set_in_and_out(start, start + MIX_LENGTH - 1);
    tractor.plant_transition(&dissolve, 0, 1)?;

    tone.set_in_and_out(0, background.length() - 1)?;
    tractor.set_track(&tone, 2)?;
    let mix = repository.create_transition(profile, "mix", None)?;
    tractor.plant_transition(&mix, 0, 2)?;

    Ok(tractor.producer().clone())
}
