//! Integration tests for saving and reloading graphs.

use uuid::Uuid;
use weft_core::{AudioRequest, FrameRate, ImageRequest, Position, Profile, SharedProfile, WeftError};
use weft_effects::{Loader, Repository};
use weft_timeline::prelude::*;
use weft_timeline::serialization::CURRENT_VERSION;
use weft_timeline::{Document, Playlist, Producer, Tractor};

fn profile() -> SharedProfile {
    Profile::preview(12, 6, FrameRate::FPS_25).shared()
}

/// A wipe-mixed playlist over a dissolve into a tone with a fade, all made
/// through the repository.
fn timeline(repo: &Repository) -> Producer {
    let p = profile();
    let video = Playlist::new(p.clone());
    let teal = repo.create_producer(p.clone(), "colour", Some("#008080")).unwrap();
    let bars = repo.create_producer(p.clone(), "bars", None).unwrap();
    video.append_io(&teal, 0, 29).unwrap();
    video.append_io(&bars, 0, 29).unwrap();
    let wipe = repo.create_transition(p.clone(), "wipe", Some("up")).unwrap();
    video.mix(0, Some(8), Some(wipe)).unwrap();

    let tone = repo.create_producer(p.clone(), "tone", Some("220")).unwrap();
    let fade = repo.create_filter(p.clone(), "volume", Some("0=0;20=1")).unwrap();
    fade.set_in_and_out(0, 20);
    tone.attach(&fade).unwrap();
    let slow = repo.create_wrapper(p.clone(), "timewarp", tone, Some("0.5")).unwrap();
    slow.set_in_and_out(0, video.length() - 1).unwrap();

    let tractor = Tractor::new(p.clone());
    tractor.set_track(video.producer(), 0).unwrap();
    tractor.set_track(&slow, 1).unwrap();
    let mix = repo.create_transition(p, "mix", None).unwrap();
    tractor.plant_transition(&mix, 0, 1).unwrap();
    tractor.producer().clone()
}

fn render(producer: &Producer, position: Position) -> (Vec<u8>, Vec<f32>) {
    let mut frame = producer.frame_at(position).unwrap();
    let image = frame.get_image(&ImageRequest::rgba(0, 0)).unwrap();
    let request = AudioRequest::for_position(FrameRate::FPS_25, 48_000, 2, position);
    let audio = frame.get_audio(&request).unwrap();
    (image.data.clone(), audio.data.clone())
}

#[test]
fn saved_timeline_reloads_from_disk() {
    let repo = Repository::new();
    let original = timeline(&repo);
    let saved = Document::from_producer(&original);
    let path = std::env::temp_dir().join(format!("weft-{}.json", Uuid::new_v4()));
    saved.save_to_file(&path).unwrap();

    let loaded = Loader::new(&repo).load_file(&path);
    std::fs::remove_file(&path).unwrap();
    let loaded = loaded.unwrap();

    assert_eq!(Document::from_producer(&loaded).canonical(), saved.canonical());
    assert_eq!(loaded.get_playtime(), original.get_playtime());
    for position in [0, 10, 25, 40, 51] {
        assert_eq!(render(&loaded, position), render(&original, position), "frame {position}");
    }
}

#[test]
fn reloaded_tones_share_the_sine_table() {
    let repo = Repository::new();
    let original = timeline(&repo);
    assert_eq!(repo.sine_table().users(), 1);
    let json = Document::from_producer(&original).to_json().unwrap();
    let loaded = Loader::new(&repo).load_json(&json).unwrap();
    assert_eq!(repo.sine_table().users(), 2);
    drop(loaded);
    assert_eq!(repo.sine_table().users(), 1);
}

#[test]
fn newer_document_version_is_rejected() {
    let repo = Repository::new();
    let mut doc = Document::from_producer(&timeline(&repo));
    doc.version = CURRENT_VERSION + 1;
    let json = doc.to_json().unwrap();
    assert!(matches!(
        Loader::new(&repo).load_json(&json),
        Err(WeftError::Serialization(_))
    ));
}

#[test]
fn truncated_document_is_rejected() {
    let repo = Repository::new();
    let json = Document::from_producer(&timeline(&repo)).to_json().unwrap();
    let cut = &json[..json.len() / 2];
    assert!(matches!(
        Loader::new(&repo).load_json(cut),
        Err(WeftError::Serialization(_))
    ));
}
