//! Parallel tracks read at one shared position.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;
use weft_core::{Frame, Position, Result, WeftError};

use crate::producer::{warn_and_blank, Producer};
use crate::service::Service;

/// Reference point for [`Multitrack::clip`] and `Playlist::clip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Count boundaries from the first.
    Start,
    /// Count from the boundary at or before the current position.
    Current,
    /// Count back from the last.
    End,
}

/// An ordered set of track slots.
///
/// Slots may be empty; an empty slot yields blank frames. A producer can be
/// connected to at most one slot.
#[derive(Debug, Default)]
pub struct Multitrack {
    tracks: RwLock<Vec<Option<Producer>>>,
    position: AtomicI64,
}

impl Multitrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn track(&self, index: usize) -> Option<Producer> {
        self.tracks.read().get(index).cloned().flatten()
    }

    /// Snapshot of every slot.
    pub fn tracks(&self) -> Vec<Option<Producer>> {
        self.tracks.read().clone()
    }

    /// Which slot holds `producer`.
    pub fn index_of(&self, producer: &Producer) -> Option<usize> {
        self.tracks
            .read()
            .iter()
            .position(|t| t.as_ref().is_some_and(|p| p.id() == producer.id()))
    }

    /// Put `producer` in slot `index`, growing the track list with empty
    /// slots as needed. Replacing a slot's own producer is allowed; a
    /// producer already in another slot is refused.
    pub fn connect(&self, producer: &Producer, index: usize) -> Result<()> {
        let mut tracks = self.tracks.write();
        if let Some(existing) = tracks
            .iter()
            .position(|t| t.as_ref().is_some_and(|p| p.id() == producer.id()))
        {
            if existing != index {
                return Err(WeftError::ProducerInUse { track: existing });
            }
        }
        if tracks.len() <= index {
            tracks.resize(index + 1, None);
        }
        tracks[index] = Some(producer.clone());
        debug!(track = index, producer = producer.service_name(), "Track connected");
        Ok(())
    }

    /// Insert a slot at `index`, shifting later tracks up. `index` may equal
    /// the track count.
    pub fn insert(&self, producer: Option<&Producer>, index: usize) -> Result<()> {
        let mut tracks = self.tracks.write();
        if index > tracks.len() {
            return Err(WeftError::index(index, tracks.len()));
        }
        if let Some(p) = producer {
            if let Some(existing) = tracks
                .iter()
                .position(|t| t.as_ref().is_some_and(|q| q.id() == p.id()))
            {
                return Err(WeftError::ProducerInUse { track: existing });
            }
        }
        tracks.insert(index, producer.cloned());
        Ok(())
    }

    /// Remove slot `index`, shifting later tracks down.
    pub fn remove(&self, index: usize) -> Result<Option<Producer>> {
        let mut tracks = self.tracks.write();
        if index >= tracks.len() {
            return Err(WeftError::index(index, tracks.len()));
        }
        Ok(tracks.remove(index))
    }

    /// Longest playtime among the tracks.
    pub fn length(&self) -> Position {
        self.tracks
            .read()
            .iter()
            .flatten()
            .map(Producer::get_playtime)
            .max()
            .unwrap_or(0)
    }

    pub fn position(&self) -> Position {
        self.position.load(Ordering::Acquire)
    }

    /// Move every track to `position`.
    pub fn seek(&self, position: Position) {
        self.position.store(position, Ordering::Release);
    }

    /// One frame per slot at the current position. Empty slots and failing
    /// tracks yield blank frames.
    pub fn get_frames(&self) -> Vec<Frame> {
        self.get_frames_at(self.position())
    }

    /// One frame per slot at `position`, leaving the stored position alone.
    pub fn get_frames_at(&self, position: Position) -> Vec<Frame> {
        self.tracks()
            .iter()
            .map(|slot| match slot {
                None => Frame::blank(position),
                Some(track) => track
                    .frame_at(position)
                    .map(|mut f| {
                        f.set_position(position);
                        f
                    })
                    .unwrap_or_else(|e| warn_and_blank(track.service_name(), position, &e)),
            })
            .collect()
    }

    /// Sorted, deduplicated positions where any track starts or ends.
    fn boundaries(&self) -> Vec<Position> {
        let mut edges = vec![0];
        for track in self.tracks.read().iter().flatten() {
            let playtime = track.get_playtime();
            if playtime > 0 {
                edges.push(playtime);
            }
        }
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Position of the `index`-th track boundary counted from `whence`.
    ///
    /// Out of range indices clamp to the first or last boundary.
    pub fn clip(&self, whence: Whence, index: i64) -> Position {
        self.clip_at(whence, index, self.position())
    }

    /// [`clip`](Self::clip) with `Whence::Current` taken as `position`.
    pub fn clip_at(&self, whence: Whence, index: i64, position: Position) -> Position {
        let edges = self.boundaries();
        let last = edges.len() as i64 - 1;
        let base = match whence {
            Whence::Start => 0,
            Whence::End => last,
            Whence::Current => {
                edges.iter().rposition(|&e| e <= position).unwrap_or(0) as i64
            }
        };
        edges[(base + index).clamp(0, last) as usize]
    }
}
