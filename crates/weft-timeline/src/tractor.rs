//! Tractors: a multitrack plus a field, producing one composite frame.

use parking_lot::Mutex;
use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;
use weft_core::frame::keys;
use weft_core::{Frame, Position, Result, SharedProfile, WeftError};

use crate::field::{Field, Planting};
use crate::filter::Filter;
use crate::multitrack::{Multitrack, Whence};
use crate::producer::{Producer, ProducerImpl};
use crate::service::{Service, ServiceKind};
use crate::transition::Transition;

/// Hide flag bits, on a track producer or a track frame.
pub const HIDE_VIDEO: i64 = 1;
pub const HIDE_AUDIO: i64 = 2;

#[derive(Debug, Default)]
struct TractorState {
    multitrack: Multitrack,
    field: Field,
}

/// Generator behind a tractor's producer.
struct TractorImpl {
    state: Arc<TractorState>,
}

impl TractorImpl {
    /// Highest track whose frame is present, not hidden for `mask` and
    /// carries a real source per `has`.
    fn pick(frames: &[Option<Frame>], mask: i64, has: impl Fn(&Frame) -> bool) -> Option<usize> {
        frames.iter().rposition(|slot| {
            slot.as_ref()
                .is_some_and(|f| f.properties().get_int(keys::HIDE) & mask == 0 && has(f))
        })
    }
}

impl ProducerImpl for TractorImpl {
    fn get_frame(&self, _producer: &Producer, index: Position) -> Result<Frame> {
        let state = &self.state;
        let tracks = state.multitrack.tracks();
        let mut frames: Vec<Option<Frame>> = state
            .multitrack
            .get_frames_at(index)
            .into_iter()
            .zip(&tracks)
            .map(|(frame, track)| {
                if let Some(track) = track {
                    let hide = track.properties().get_int(keys::HIDE);
                    if hide != 0 {
                        frame.properties().set_int(keys::HIDE, hide);
                    }
                }
                Some(frame)
            })
            .collect();

        for (filter, track) in state.field.filters() {
            if let Some(Some(frame)) = frames.get_mut(track) {
                filter.apply(frame);
            }
        }

        let count = frames.len();
        for (transition, a, b) in state.field.transitions() {
            if a == b || a >= count || b >= count || !transition.is_active(index) {
                continue;
            }
            let Some(b_frame) = frames[b].take() else {
                continue;
            };
            match frames[a].as_mut() {
                Some(a_frame) => transition.apply(a_frame, b_frame),
                None => frames[b] = Some(b_frame),
            }
        }

        let mut output = Frame::new(index);
        let video = Self::pick(&frames, HIDE_VIDEO, Frame::has_image);
        let audio = Self::pick(&frames, HIDE_AUDIO, Frame::has_audio);
        trace!(position = index, ?video, ?audio, "Tractor selected tracks");

        let mut shared: Vec<Option<Arc<Mutex<Frame>>>> = vec![None; count];
        let mut share = |i: usize, frames: &mut [Option<Frame>]| {
            shared[i]
                .get_or_insert_with(|| {
                    Arc::new(Mutex::new(frames[i].take().unwrap_or_else(|| Frame::blank(index))))
                })
                .clone()
        };

        match video {
            Some(i) => {
                let source = share(i, &mut frames);
                output.properties().inherit(source.lock().properties());
                output.push_image_callback(move |_, req| source.lock().pull_image(req));
            }
            None => output.set_test_image(true),
        }
        match audio {
            Some(i) => {
                let source = share(i, &mut frames);
                output.push_audio_callback(move |_, req| source.lock().pull_audio(req));
            }
            None => output.set_test_audio(true),
        }
        output.properties().remove(keys::HIDE);
        Ok(output)
    }

    fn length(&self) -> Option<Position> {
        Some(self.state.multitrack.length())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A composition producer.
///
/// Dereferences to its [`Producer`], so it can be played, cut, appended to
/// a playlist or connected as a track of another tractor.
#[derive(Clone)]
pub struct Tractor {
    producer: Producer,
    state: Arc<TractorState>,
}

impl Tractor {
    pub const SERVICE: &'static str = "tractor";

    pub fn new(profile: SharedProfile) -> Self {
        let state = Arc::new(TractorState::default());
        let producer = Producer::new(
            ServiceKind::Tractor,
            Self::SERVICE,
            profile,
            TractorImpl {
                state: state.clone(),
            },
            None,
        );
        Self { producer, state }
    }

    /// Recover the tractor behind a producer.
    pub fn from_producer(producer: &Producer) -> Option<Self> {
        let root = producer.root();
        let state = root.generator_as::<TractorImpl>()?.state.clone();
        Some(Self {
            producer: root,
            state,
        })
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn multitrack(&self) -> &Multitrack {
        &self.state.multitrack
    }

    pub fn field(&self) -> &Field {
        &self.state.field
    }

    fn check_track(&self, producer: &Producer) -> Result<()> {
        if producer.root().id() == self.producer.id() {
            return Err(WeftError::InvalidParameter(
                "A tractor cannot contain itself".into(),
            ));
        }
        Ok(())
    }

    /// Put `producer` on track `index`, extending or replacing.
    pub fn set_track(&self, producer: &Producer, index: usize) -> Result<()> {
        self.check_track(producer)?;
        self.state.multitrack.connect(producer, index)
    }

    /// Insert a track at `index` and renumber the field.
    pub fn insert_track(&self, producer: Option<&Producer>, index: usize) -> Result<()> {
        if let Some(p) = producer {
            self.check_track(p)?;
        }
        let _guard = self.producer.lock();
        self.state.multitrack.insert(producer, index)?;
        self.state.field.on_insert_track(index);
        debug!(track = index, "Track inserted");
        Ok(())
    }

    /// Remove track `index` and renumber the field.
    pub fn remove_track(&self, index: usize) -> Result<Option<Producer>> {
        let _guard = self.producer.lock();
        let removed = self.state.multitrack.remove(index)?;
        self.state.field.on_remove_track(index);
        debug!(track = index, "Track removed");
        Ok(removed)
    }

    pub fn track(&self, index: usize) -> Option<Producer> {
        self.state.multitrack.track(index)
    }

    pub fn track_count(&self) -> usize {
        self.state.multitrack.count()
    }

    /// Set [`HIDE_VIDEO`] / [`HIDE_AUDIO`] bits on a track.
    pub fn set_track_hide(&self, index: usize, flags: i64) -> Result<()> {
        let track = self
            .track(index)
            .ok_or_else(|| WeftError::index(index, self.track_count()))?;
        track.properties().set_int(keys::HIDE, flags);
        Ok(())
    }

    pub fn plant_filter(&self, filter: &Filter, track: usize) -> Result<()> {
        self.state.field.plant_filter(filter, track)
    }

    pub fn plant_transition(&self, transition: &Transition, a: usize, b: usize) -> Result<()> {
        self.state.field.plant_transition(transition, a, b)
    }

    /// Plant exactly as described, used when rebuilding a saved graph.
    pub fn restore_planting(&self, planting: Planting) -> Result<()> {
        self.state.field.restore(planting)
    }

    pub fn unplant(&self, id: Uuid) -> Option<Planting> {
        self.state.field.unplant(id)
    }

    pub fn plantings(&self) -> Vec<Planting> {
        self.state.field.plantings()
    }

    /// Track boundary query, see [`Multitrack::clip`].
    pub fn clip(&self, whence: Whence, index: i64) -> Position {
        self.state
            .multitrack
            .clip_at(whence, index, self.producer.position())
    }
}

impl Deref for Tractor {
    type Target = Producer;

    fn deref(&self) -> &Producer {
        &self.producer
    }
}

impl std::fmt::Debug for Tractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tractor")
            .field("tracks", &self.track_count())
            .field("plantings", &self.state.field.len())
            .field("position", &self.producer.position())
            .finish()
    }
}
