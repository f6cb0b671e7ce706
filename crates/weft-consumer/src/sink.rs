//! Where presented frames go.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use weft_core::{Position, Result, SharedAudio, SharedImage, WeftError};

/// An evaluated frame. Image or audio is `None` when evaluation was skipped
/// or failed.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub position: Position,
    pub image: Option<SharedImage>,
    pub audio: Option<SharedAudio>,
}

/// Output end of a consumer.
pub trait Sink: Send + 'static {
    fn name(&self) -> &str;

    /// Present one frame. Errors are logged by the consumer and playback
    /// carries on.
    fn render(&mut self, frame: Rendered) -> Result<()>;

    /// Called once when the consumer stops.
    fn close(&mut self) {}
}

/// Discards frames, counting them.
#[derive(Debug, Default, Clone)]
pub struct NullSink {
    count: Arc<AtomicU64>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Sink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn render(&mut self, _frame: Rendered) -> Result<()> {
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Sends every rendered frame over a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Rendered>,
}

impl ChannelSink {
    /// A bounded channel applies back-pressure to presentation.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Rendered>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn unbounded() -> (Self, Receiver<Rendered>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn render(&mut self, frame: Rendered) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| WeftError::Consumer("Channel receiver dropped".into()))
    }
}

/// One entry of a [`CollectSink`] log.
#[derive(Debug, Clone)]
pub struct Presented {
    pub position: Position,
    pub at: Instant,
    pub has_image: bool,
    pub has_audio: bool,
}

/// Records the position and presentation instant of every frame.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    log: Arc<Mutex<Vec<Presented>>>,
    closed: Arc<AtomicU64>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the log so far.
    pub fn presented(&self) -> Vec<Presented> {
        self.log.lock().clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.log.lock().iter().map(|p| p.position).collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// How many times the owning consumer stopped.
    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

impl Sink for CollectSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn render(&mut self, frame: Rendered) -> Result<()> {
        self.log.lock().push(Presented {
            position: frame.position,
            at: Instant::now(),
            has_image: frame.image.is_some(),
            has_audio: frame.audio.is_some(),
        });
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(position: Position) -> Rendered {
        Rendered {
            position,
            image: None,
            audio: None,
        }
    }

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (mut sink, rx) = ChannelSink::unbounded();
        sink.render(rendered(0)).unwrap();
        sink.render(rendered(1)).unwrap();
        let got: Vec<Position> = rx.try_iter().map(|r| r.position).collect();
        assert_eq!(got, vec![0, 1]);
        drop(rx);
        assert!(sink.render(rendered(2)).is_err());
    }

    #[test]
    fn test_collect_sink_shares_log() {
        let sink = CollectSink::new();
        let mut boxed: Box<dyn Sink> = Box::new(sink.clone());
        boxed.render(rendered(3)).unwrap();
        boxed.close();
        assert_eq!(sink.positions(), vec![3]);
        assert_eq!(sink.close_count(), 1);
        assert!(!sink.presented()[0].has_image);
    }
}
