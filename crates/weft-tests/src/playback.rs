//! Integration tests for consumers playing composed graphs.

use std::time::{Duration, Instant};
use weft_consumer::{ChannelSink, CollectSink, Consumer, ConsumerConfig, ConsumerState};
use weft_core::{FrameRate, Position, Profile, SharedProfile};
use weft_effects::{Bars, Colour, Dip, Loader, Repository};
use weft_timeline::prelude::*;
use weft_timeline::{Document, EofPolicy, Playlist, Producer};

fn profile(rate: FrameRate) -> SharedProfile {
    Profile::preview(16, 8, rate).shared()
}

/// Red then bars, dipped through black, on one playlist.
fn sequence(profile: &SharedProfile, clip: Position) -> Producer {
    let playlist = Playlist::new(profile.clone());
    let red = Colour::producer(profile.clone(), Some("red")).unwrap();
    playlist.append_io(&red, 0, clip - 1).unwrap();
    playlist.append_io(&Bars::producer(profile.clone()), 0, clip - 1).unwrap();
    let dip = Dip::transition(profile.clone(), None).unwrap();
    playlist.mix(0, Some(5), Some(dip)).unwrap();
    playlist.producer().clone()
}

fn player(profile: &SharedProfile, sink: CollectSink, config: ConsumerConfig) -> Consumer {
    let consumer = Consumer::new(profile.clone(), sink);
    consumer.set_config(&config);
    consumer
}

#[test]
fn paced_playback_matches_frame_rate() {
    const FRAMES: usize = 19;
    let profile = profile(FrameRate::new(50, 1));
    let root = sequence(&profile, 12);
    assert_eq!(root.get_playtime(), FRAMES as Position);
    root.set_eof_policy(EofPolicy::Terminate);

    let sink = CollectSink::new();
    let consumer = player(&profile, sink.clone(), ConsumerConfig::default());
    consumer.connect_producer(&root).unwrap();
    let started = Instant::now();
    consumer.start().unwrap();
    assert!(consumer.wait_until_stopped(Duration::from_secs(5)));
    let elapsed = started.elapsed();

    let presented = sink.presented();
    assert_eq!(presented.len(), FRAMES);
    assert!(presented.windows(2).all(|w| w[0].position < w[1].position));
    assert!(presented.windows(2).all(|w| w[0].at <= w[1].at));
    // 19 frames at 50 fps: the last is due 360 ms after the first.
    let expected = Duration::from_millis(360);
    assert!(elapsed >= expected, "{elapsed:?}");
    assert!(elapsed < expected * 2, "{elapsed:?}");
}

#[test]
fn double_speed_skips_positions_and_terminates() {
    let profile = profile(FrameRate::FPS_25);
    let root = Colour::producer(profile.clone(), Some("white")).unwrap();
    root.set_in_and_out(0, 9).unwrap();
    root.set_speed(2.0);

    let sink = CollectSink::new();
    let config = ConsumerConfig {
        paced: false,
        terminate_on_pause: true,
        ..ConsumerConfig::default()
    };
    let consumer = player(&profile, sink.clone(), config);
    consumer.connect_producer(&root).unwrap();
    consumer.start().unwrap();
    assert!(consumer.wait_until_stopped(Duration::from_secs(5)));
    assert_eq!(sink.positions(), vec![0, 2, 4, 6, 8, 9]);
    assert_eq!(consumer.frames_dropped(), 0);
}

#[test]
fn reloaded_document_plays_every_frame_into_a_channel() {
    let repo = Repository::new();
    let profile = profile(FrameRate::FPS_25);
    let json = Document::from_producer(&sequence(&profile, 8)).to_json().unwrap();
    let root = Loader::new(&repo).load_json(&json).unwrap();
    let length = root.get_playtime();

    let (sink, frames) = ChannelSink::unbounded();
    let consumer = Consumer::new(profile, sink);
    consumer.set_config(&ConsumerConfig {
        real_time: 0,
        paced: false,
        terminate_on_pause: true,
        ..ConsumerConfig::default()
    });
    consumer.connect_producer(&root).unwrap();
    consumer.start().unwrap();
    assert!(consumer.wait_until_stopped(Duration::from_secs(5)));

    let received: Vec<_> = frames.try_iter().collect();
    assert_eq!(received.len() as Position, length);
    assert!(received.iter().all(|f| f.image.is_some() && f.audio.is_some()));
    let first = received[0].image.as_ref().unwrap();
    assert_eq!(first.pixel(0, 0), Some([255, 0, 0, 255]));
    // The overlap covers positions 3 to 7; halfway through it the dip is
    // fully black.
    let dipped = received[5].image.as_ref().unwrap();
    assert_eq!(dipped.pixel(0, 0), Some([0, 0, 0, 255]));
}

#[test]
fn stop_interrupts_a_paused_consumer() {
    let profile = profile(FrameRate::FPS_25);
    let root = sequence(&profile, 6);
    let sink = CollectSink::new();
    let consumer = player(&profile, sink.clone(), ConsumerConfig::default());
    consumer.connect_producer(&root).unwrap();
    root.set_speed(0.0);
    consumer.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.positions(), vec![0]);
    assert_eq!(consumer.state(), ConsumerState::Running);

    let started = Instant::now();
    consumer.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(sink.close_count(), 1);
}
