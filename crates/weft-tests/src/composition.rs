//! Integration tests for graph composition.
//!
//! Builds playlists and tractors from the built-in services of weft-effects
//! and checks what the composed frames evaluate to.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_core::{Color, Frame, FrameRate, Image, ImageFormat, ImageRequest, Position, Profile};
use weft_core::{Result, SharedProfile, WeftError};
use weft_effects::{Bars, Brightness, Colour, Greyscale, Repository, Wipe};
use weft_timeline::prelude::*;
use weft_timeline::{Dissolve, Playlist, Producer, ServiceKind, Tractor};

// ── Helpers ────────────────────────────────────────────────────

fn profile() -> SharedProfile {
    Profile::preview(16, 8, FrameRate::FPS_25).shared()
}

fn colour(name: &str) -> Producer {
    Colour::producer(profile(), Some(name)).unwrap()
}

fn rgba() -> ImageRequest {
    ImageRequest::new(ImageFormat::Rgba8, 0, 0)
}

fn centre(mut frame: Frame) -> [u8; 4] {
    let image = frame.get_image(&rgba()).unwrap();
    image.pixel(image.width / 2, image.height / 2).unwrap()
}

/// Generator that counts how often its image is evaluated.
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl ProducerImpl for Counting {
    fn get_frame(&self, _producer: &Producer, index: Position) -> Result<Frame> {
        let mut frame = Frame::new(index);
        let calls = self.calls.clone();
        frame.push_image_callback(move |_, req: &ImageRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Image::filled(req.format, req.width.max(1), req.height.max(1), Color::WHITE))
        });
        Ok(frame)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Generator whose every image fails to decode.
struct Broken;

impl ProducerImpl for Broken {
    fn get_frame(&self, _producer: &Producer, index: Position) -> Result<Frame> {
        let mut frame = Frame::new(index);
        frame.push_image_callback(|_, _: &ImageRequest| {
            Err(WeftError::Decode("truncated packet".into()))
        });
        Ok(frame)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn counting(length: Position) -> (Producer, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = Producer::new(
        ServiceKind::Producer,
        "counting",
        profile(),
        Counting {
            calls: calls.clone(),
        },
        Some(length),
    );
    (producer, calls)
}

// ── Playlists ──────────────────────────────────────────────────

#[test]
fn playlist_resolves_blank_then_two_clips() {
    let playlist = Playlist::new(profile());
    playlist.blank(10).unwrap();
    playlist.append_io(&colour("red"), 0, 19).unwrap();
    playlist.append_io(&colour("blue"), 0, 14).unwrap();
    assert_eq!(playlist.length(), 45);

    assert_eq!(playlist.resolve(25), Some((1, 5)));
    assert_eq!(playlist.resolve(30), Some((2, 0)));
    assert_eq!(playlist.resolve(44), Some((2, 14)));
    assert_eq!(playlist.resolve(45), None);

    let producer = playlist.producer();
    assert_eq!(centre(producer.frame_at(25).unwrap()), [255, 0, 0, 255]);
    assert_eq!(centre(producer.frame_at(30).unwrap()), [0, 0, 255, 255]);
    assert!(!producer.frame_at(3).unwrap().has_image());
}

#[test]
fn broken_clip_does_not_halt_the_next() {
    let playlist = Playlist::new(profile());
    let broken = Producer::new(ServiceKind::Producer, "broken", profile(), Broken, Some(5));
    playlist.append(&broken).unwrap();
    playlist.append_io(&Bars::producer(profile()), 0, 4).unwrap();
    let producer = playlist.producer();

    let mut frame = producer.frame_at(2).unwrap();
    assert!(matches!(frame.get_image(&rgba()), Err(WeftError::Decode(_))));
    assert_eq!(centre(producer.frame_at(7).unwrap()), [255, 0, 255, 255]);
}

// ── Filters ────────────────────────────────────────────────────

#[test]
fn last_attached_filter_transforms_first() {
    // Greyscale is attached last, so it runs on the raw red and brightness
    // doubles the grey it produces.
    let red = colour("red");
    red.attach(&Brightness::filter(profile(), Some("2"))).unwrap();
    red.attach(&Greyscale::filter(profile())).unwrap();
    let y = Color::rgb(255, 0, 0).luminance();
    let doubled = y * 2;
    assert_eq!(centre(red.frame_at(0).unwrap()), [doubled, doubled, doubled, 255]);

    // Reversed attachment brightens first: red doubled stays (255, 0, 0)
    // and then greys to its luminance.
    let red = colour("red");
    red.attach(&Greyscale::filter(profile())).unwrap();
    red.attach(&Brightness::filter(profile(), Some("2"))).unwrap();
    assert_eq!(centre(red.frame_at(0).unwrap()), [y, y, y, 255]);
}

#[test]
fn unevaluated_frames_never_reach_the_generator() {
    let (clip, calls) = counting(100);
    let playlist = Playlist::new(profile());
    playlist.append(&clip).unwrap();
    let tractor = Tractor::new(profile());
    tractor.set_track(playlist.producer(), 0).unwrap();
    tractor.plant_filter(&Greyscale::filter(profile()), 0).unwrap();

    for _ in 0..20 {
        let frame = tractor.get_frame().unwrap();
        assert!(frame.has_image());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    centre(tractor.get_frame().unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Tractors ───────────────────────────────────────────────────

#[test]
fn dissolve_blends_tracks_halfway() {
    let tractor = Tractor::new(profile());
    tractor.set_track(&colour("red"), 0).unwrap();
    tractor.set_track(&colour("blue"), 1).unwrap();
    let dissolve = Dissolve::transition(profile());
    dissolve.set_in_and_out(0, 10);
    tractor.plant_transition(&dissolve, 0, 1).unwrap();

    assert_eq!(centre(tractor.frame_at(0).unwrap()), [255, 0, 0, 255]);
    let [r, g, b, _] = centre(tractor.frame_at(5).unwrap());
    assert!(r.abs_diff(128) <= 1 && g == 0 && b.abs_diff(128) <= 1, "{r} {g} {b}");
    // Past the out point the transition is idle and the top track shows.
    assert_eq!(centre(tractor.frame_at(20).unwrap()), [0, 0, 255, 255]);
}

#[test]
fn same_producer_on_two_tracks_is_rejected() {
    let tractor = Tractor::new(profile());
    let red = colour("red");
    tractor.set_track(&red, 0).unwrap();
    tractor.set_track(&colour("blue"), 1).unwrap();
    assert!(matches!(
        tractor.set_track(&red, 2),
        Err(WeftError::ProducerInUse { track: 0 })
    ));
    assert_eq!(tractor.track_count(), 2);
}

#[test]
fn degenerate_wipe_still_renders() {
    let repo = Repository::new();
    let tractor = Tractor::new(profile());
    for name in ["red", "green", "blue"] {
        let p = repo.create_producer(profile(), "colour", Some(name)).unwrap();
        tractor.set_track(&p, tractor.track_count()).unwrap();
    }
    let wipe = Wipe::transition(profile(), Some("left")).unwrap();
    tractor.plant_transition(&wipe, 1, 2).unwrap();

    tractor.remove_track(2).unwrap();
    assert_eq!(tractor.plantings()[0].tracks(), (1, 1));
    assert_eq!(tractor.plantings().len(), 1);
    assert_eq!(centre(tractor.frame_at(0).unwrap()), [0, 255, 0, 255]);
}

#[test]
fn planted_filter_follows_track_through_edits() {
    let tractor = Tractor::new(profile());
    tractor.set_track(&colour("red"), 0).unwrap();
    tractor.set_track(&colour("blue"), 1).unwrap();
    let dim = Brightness::filter(profile(), Some("0.5"));
    tractor.plant_filter(&dim, 1).unwrap();

    tractor.insert_track(Some(&colour("white")), 0).unwrap();
    assert_eq!(tractor.plantings()[0].tracks(), (2, 2));
    tractor.remove_track(0).unwrap();
    assert_eq!(tractor.plantings()[0].tracks(), (1, 1));
    assert_eq!(centre(tractor.frame_at(0).unwrap()), [0, 0, 128, 255]);
}

// ── Lifecycle ──────────────────────────────────────────────────

#[test]
fn closing_twice_releases_data_once() {
    let released = Arc::new(AtomicUsize::new(0));
    let red = colour("red");
    let counter = released.clone();
    red.properties().set_data(
        "payload",
        vec![0u8; 16],
        16,
        Some(move |_: Vec<u8>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert!(red.close());
    assert!(!red.close());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    drop(red);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn closing_a_source_keeps_its_playlist_clips() {
    let playlist = Playlist::new(profile());
    let source = colour("blue");
    source.set_in_and_out(0, 29).unwrap();
    playlist.append_io(&source, 10, 19).unwrap();
    assert_eq!(playlist.length(), 10);

    assert!(source.close());
    assert_eq!(playlist.length(), 10);
    assert_eq!(centre(playlist.producer().frame_at(4).unwrap()), [0, 0, 255, 255]);
}
