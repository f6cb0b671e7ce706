//! weft - plays a timeline into a channel and reports what comes out.
//!
//! ```text
//! weft                      play the built-in demo timeline
//! weft <document.json>      load and play a saved document
//! weft --save <path>        write the demo timeline as a document
//! ```

mod demo;

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use weft_consumer::{ChannelSink, Consumer, ConsumerConfig, Rendered};
use weft_core::{defaults, FrameRate, Profile};
use weft_effects::{Loader, Repository};
use weft_timeline::prelude::*;
use weft_timeline::Document;

/// Log one line every this many frames.
const REPORT_EVERY: i64 = 25;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let profile = Profile::preview(320, 180, FrameRate::FPS_25).shared();
    let repository = Repository::new();

    let mut args = std::env::args().skip(1);
    let root = match args.next().as_deref() {
        Some("--save") => {
            let path = args.next().map(PathBuf::from).context("--save needs a path")?;
            let root = demo::build_timeline(&repository, profile)?;
            Document::from_producer(&root).save_to_file(&path)?;
            info!(path = %path.display(), "Demo timeline saved");
            return Ok(());
        }
        Some(path) => {
            let path = PathBuf::from(path);
            Loader::new(&repository)
                .load_file(&path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => demo::build_timeline(&repository, profile.clone())?,
    };
    info!(length = root.get_playtime(), service = root.service_name(), "Timeline ready");

    let (sink, frames) = ChannelSink::bounded(defaults::QUEUE_DEPTH);
    let consumer = Consumer::new(profile, sink);
    consumer.set_config(&ConsumerConfig {
        terminate_on_pause: true,
        ..ConsumerConfig::default()
    });
    consumer.connect_producer(&root)?;

    let started = Instant::now();
    consumer.start()?;
    let mut received = 0u64;
    loop {
        match frames.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                received += 1;
                report(&frame);
            }
            Err(RecvTimeoutError::Timeout) if consumer.is_stopped() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Frame channel closed");
                break;
            }
        }
    }
    received += frames.try_iter().inspect(report).count() as u64;
    consumer.stop()?;

    info!(
        received,
        dropped = consumer.frames_dropped(),
        elapsed = ?started.elapsed(),
        "Playback finished"
    );
    Ok(())
}

fn report(frame: &Rendered) {
    if frame.position % REPORT_EVERY != 0 {
        return;
    }
    let centre = frame
        .image
        .as_ref()
        .and_then(|image| image.pixel(image.width / 2, image.height / 2));
    let peak = frame.audio.as_ref().map(|audio| audio.peak());
    info!(position = frame.position, ?centre, ?peak, "Frame");
}
