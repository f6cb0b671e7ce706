//! Playlists: clips and blanks played one after another.
//!
//! A playlist is a producer over a virtual timeline made of its entries.
//! Each entry is a blank of N frames or a clip (a cut of some producer),
//! optionally repeated. Position `p` belongs to the entry whose cumulative
//! span contains it, at local position `p - entry_start`.

use parking_lot::RwLock;
use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info};
use weft_core::{defaults, Frame, Position, Result, SharedProfile, WeftError};

use crate::multitrack::Whence;
use crate::producer::{warn_and_blank, Producer, ProducerImpl};
use crate::service::{Service, ServiceKind};
use crate::tractor::Tractor;
use crate::transition::{Dissolve, Transition};

/// What occupies one slot of a playlist.
#[derive(Debug, Clone)]
pub enum Entry {
    Blank(Position),
    Clip(Producer),
}

/// One slot: an entry played `repeat` times.
#[derive(Debug, Clone)]
pub struct PlaylistEntry {
    pub entry: Entry,
    pub repeat: usize,
}

impl PlaylistEntry {
    fn blank(length: Position) -> Self {
        Self {
            entry: Entry::Blank(length),
            repeat: 1,
        }
    }

    fn clip(producer: Producer) -> Self {
        Self {
            entry: Entry::Clip(producer),
            repeat: 1,
        }
    }

    /// Frames of a single play.
    pub fn unit_length(&self) -> Position {
        match &self.entry {
            Entry::Blank(length) => *length,
            Entry::Clip(producer) => producer.get_playtime(),
        }
    }

    /// Frames the slot occupies on the timeline.
    pub fn length(&self) -> Position {
        self.unit_length() * self.repeat.max(1) as Position
    }

    pub fn is_blank(&self) -> bool {
        matches!(self.entry, Entry::Blank(_))
    }

    pub fn producer(&self) -> Option<&Producer> {
        match &self.entry {
            Entry::Clip(producer) => Some(producer),
            Entry::Blank(_) => None,
        }
    }
}

/// Description of one entry, see [`Playlist::clip_info`].
#[derive(Debug, Clone)]
pub struct ClipInfo {
    pub index: usize,
    /// `None` for blanks
    pub producer: Option<Producer>,
    /// Service name of the clip's source, `"blank"` for blanks
    pub resource: String,
    /// Source in point
    pub frame_in: Position,
    /// Source out point
    pub frame_out: Position,
    /// Timeline position of the first frame
    pub start: Position,
    /// Frames on the timeline, repeats included
    pub frame_count: Position,
    /// Length of the clip's source
    pub length: Position,
    pub repeat: usize,
    pub is_blank: bool,
}

#[derive(Debug, Default)]
struct PlaylistState {
    entries: RwLock<Vec<PlaylistEntry>>,
}

impl PlaylistState {
    fn length(&self) -> Position {
        self.entries.read().iter().map(PlaylistEntry::length).sum()
    }
}

/// Find the slot owning `position` and the local position within it.
fn locate(entries: &[PlaylistEntry], position: Position) -> Option<(usize, Position)> {
    if position < 0 {
        return None;
    }
    let mut start = 0;
    for (index, entry) in entries.iter().enumerate() {
        let end = start + entry.length();
        if position < end {
            return Some((index, position - start));
        }
        start = end;
    }
    None
}

fn start_of(entries: &[PlaylistEntry], index: usize) -> Position {
    entries[..index.min(entries.len())]
        .iter()
        .map(PlaylistEntry::length)
        .sum()
}

struct PlaylistImpl {
    state: Arc<PlaylistState>,
}

impl ProducerImpl for PlaylistImpl {
    fn get_frame(&self, producer: &Producer, index: Position) -> Result<Frame> {
        let slot = {
            let entries = self.state.entries.read();
            locate(&entries, index).map(|(i, local)| (entries[i].clone(), local))
        };
        let Some((slot, local)) = slot else {
            return Ok(Frame::blank(index));
        };
        match &slot.entry {
            Entry::Blank(_) => Ok(Frame::blank(index)),
            Entry::Clip(clip) => {
                let unit = slot.unit_length().max(1);
                Ok(clip
                    .frame_at(local % unit)
                    .unwrap_or_else(|e| warn_and_blank(producer.service_name(), index, &e)))
            }
        }
    }

    fn length(&self) -> Option<Position> {
        Some(self.state.length())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A sequencing producer.
#[derive(Clone)]
pub struct Playlist {
    producer: Producer,
    state: Arc<PlaylistState>,
}

impl Playlist {
    pub const SERVICE: &'static str = "playlist";

    pub fn new(profile: SharedProfile) -> Self {
        let state = Arc::new(PlaylistState::default());
        let producer = Producer::new(
            ServiceKind::Playlist,
            Self::SERVICE,
            profile,
            PlaylistImpl {
                state: state.clone(),
            },
            None,
        );
        Self { producer, state }
    }

    /// Recover the playlist behind a producer.
    pub fn from_producer(producer: &Producer) -> Option<Self> {
        let root = producer.root();
        let state = root.generator_as::<PlaylistImpl>()?.state.clone();
        Some(Self {
            producer: root,
            state,
        })
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn count(&self) -> usize {
        self.state.entries.read().len()
    }

    /// Snapshot of the slots.
    pub fn entries(&self) -> Vec<PlaylistEntry> {
        self.state.entries.read().clone()
    }

    fn check_clip(&self, producer: &Producer) -> Result<()> {
        if producer.root().id() == self.producer.id() {
            return Err(WeftError::InvalidParameter(
                "A playlist cannot contain itself".into(),
            ));
        }
        Ok(())
    }

    fn check_index(entries: &[PlaylistEntry], index: usize) -> Result<()> {
        if index >= entries.len() {
            return Err(WeftError::index(index, entries.len()));
        }
        Ok(())
    }

    // ── Building ──

    /// Append `producer` whole. A cut is appended as is; anything else is
    /// cut at its current in and out points.
    pub fn append(&self, producer: &Producer) -> Result<()> {
        self.check_clip(producer)?;
        let clip = if producer.is_cut() {
            producer.clone()
        } else {
            producer.cut(producer.get_in(), producer.get_out())?
        };
        self.state.entries.write().push(PlaylistEntry::clip(clip));
        Ok(())
    }

    /// Append source frames `in..=out` of `producer`.
    pub fn append_io(&self, producer: &Producer, in_point: Position, out_point: Position) -> Result<()> {
        self.check_clip(producer)?;
        let clip = producer.cut(in_point, out_point)?;
        self.state.entries.write().push(PlaylistEntry::clip(clip));
        Ok(())
    }

    /// Append `length` frames of nothing.
    pub fn blank(&self, length: Position) -> Result<()> {
        if length <= 0 {
            return Err(WeftError::InvalidParameter(format!(
                "Blank length must be positive, got {length}"
            )));
        }
        self.state.entries.write().push(PlaylistEntry::blank(length));
        Ok(())
    }

    /// Insert a cut of `producer` before `index`. Indices past the end
    /// append. Returns the index used.
    pub fn insert(
        &self,
        producer: &Producer,
        index: usize,
        in_point: Position,
        out_point: Position,
    ) -> Result<usize> {
        self.check_clip(producer)?;
        let clip = producer.cut(in_point, out_point)?;
        let mut entries = self.state.entries.write();
        let index = index.min(entries.len());
        entries.insert(index, PlaylistEntry::clip(clip));
        Ok(index)
    }

    /// Insert a blank before `index`. Returns the index used.
    pub fn insert_blank(&self, index: usize, length: Position) -> Result<usize> {
        if length <= 0 {
            return Err(WeftError::InvalidParameter(format!(
                "Blank length must be positive, got {length}"
            )));
        }
        let mut entries = self.state.entries.write();
        let index = index.min(entries.len());
        entries.insert(index, PlaylistEntry::blank(length));
        Ok(index)
    }

    pub fn remove(&self, index: usize) -> Result<PlaylistEntry> {
        let mut entries = self.state.entries.write();
        Self::check_index(&entries, index)?;
        Ok(entries.remove(index))
    }

    /// Move entry `src` so it ends up at `dest`. `dest` past the end moves
    /// to the end.
    pub fn move_clip(&self, src: usize, dest: usize) -> Result<()> {
        let mut entries = self.state.entries.write();
        Self::check_index(&entries, src)?;
        let entry = entries.remove(src);
        let dest = dest.min(entries.len());
        entries.insert(dest, entry);
        Ok(())
    }

    /// Play entry `index` `times` times (at least once).
    pub fn repeat_clip(&self, index: usize, times: usize) -> Result<()> {
        let mut entries = self.state.entries.write();
        Self::check_index(&entries, index)?;
        entries[index].repeat = times.max(1);
        Ok(())
    }

    /// Set new source in/out points on a clip, or a new length on a blank.
    pub fn resize_clip(&self, index: usize, in_point: Position, out_point: Position) -> Result<()> {
        let mut entries = self.state.entries.write();
        Self::check_index(&entries, index)?;
        match &entries[index].entry {
            Entry::Clip(clip) => clip.set_in_and_out(in_point, out_point),
            Entry::Blank(_) => {
                let length = (out_point - in_point).abs() + 1;
                entries[index].entry = Entry::Blank(length);
                Ok(())
            }
        }
    }

    /// Turn a clip into a blank of the same timeline length.
    pub fn replace_with_blank(&self, index: usize) -> Result<Option<Producer>> {
        let mut entries = self.state.entries.write();
        Self::check_index(&entries, index)?;
        let length = entries[index].length();
        let old = std::mem::replace(&mut entries[index], PlaylistEntry::blank(length));
        Ok(old.producer().cloned())
    }

    /// Merge runs of adjacent blanks. Without `keep_length` a trailing
    /// blank is dropped.
    pub fn consolidate_blanks(&self, keep_length: bool) {
        let mut entries = self.state.entries.write();
        let mut merged: Vec<PlaylistEntry> = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            match (merged.last_mut(), &entry.entry) {
                (Some(last), Entry::Blank(_)) if last.is_blank() => {
                    let length = last.length() + entry.length();
                    *last = PlaylistEntry::blank(length);
                }
                _ => merged.push(entry),
            }
        }
        if !keep_length && merged.last().is_some_and(PlaylistEntry::is_blank) {
            merged.pop();
        }
        *entries = merged;
    }

    pub fn clear(&self) {
        self.state.entries.write().clear();
    }

    /// Remove every entry except the one under the play head, keeping the
    /// play head on the same frame of that entry.
    pub fn clean(&self) {
        let position = self.producer.position();
        let kept = {
            let mut entries = self.state.entries.write();
            match locate(&entries, position) {
                Some((index, local)) => {
                    let entry = entries.swap_remove(index);
                    *entries = vec![entry];
                    Some(local)
                }
                None => {
                    entries.clear();
                    None
                }
            }
        };
        self.producer.seek(kept.unwrap_or(0));
    }

    // ── Splitting and joining ──

    /// Split entry `index` at local `position` into two entries.
    ///
    /// A negative position counts back from the entry's end. The split
    /// point is clamped so both halves keep at least one frame. The second
    /// half of a clip is a new cut of the same source carrying the same
    /// filters and public properties.
    pub fn split(&self, index: usize, position: Position) -> Result<()> {
        let mut entries = self.state.entries.write();
        Self::check_index(&entries, index)?;
        let slot = entries[index].clone();
        if slot.repeat > 1 {
            return Err(WeftError::InvalidParameter(
                "Cannot split a repeated entry".into(),
            ));
        }
        let length = slot.unit_length();
        if length < 2 {
            return Err(WeftError::InvalidParameter(format!(
                "Entry {index} is too short to split"
            )));
        }
        let at = if position < 0 { length + position } else { position };
        let at = at.clamp(1, length - 1);

        let second = match &slot.entry {
            Entry::Blank(_) => {
                entries[index] = PlaylistEntry::blank(at);
                PlaylistEntry::blank(length - at)
            }
            Entry::Clip(first) => {
                let (in_point, out_point) = (first.get_in(), first.get_out());
                let second = first.root().cut(in_point + at, out_point)?;
                second.properties().inherit(first.properties());
                for filter in first.base().filters() {
                    second.attach(&filter)?;
                }
                first.set_in_and_out(in_point, in_point + at - 1)?;
                PlaylistEntry::clip(second)
            }
        };
        entries.insert(index + 1, second);
        debug!(index, at, "Entry split");
        Ok(())
    }

    /// Split whatever entry covers timeline `position`. Splitting on an
    /// entry boundary does nothing.
    pub fn split_at(&self, position: Position) -> Result<()> {
        let located = locate(&self.state.entries.read(), position);
        match located {
            Some((_, 0)) => Ok(()),
            Some((index, local)) => self.split(index, local),
            None => Err(WeftError::InvalidParameter(format!(
                "Position {position} is outside the playlist"
            ))),
        }
    }

    /// Fold `count` entries starting at `index` into one entry.
    ///
    /// With `merge`, contiguous clips of one source become a single cut.
    /// Otherwise, or when they are not contiguous, the entries move into a
    /// nested playlist that takes their place.
    pub fn join(&self, index: usize, count: usize, merge: bool) -> Result<()> {
        if count < 2 {
            return Ok(());
        }
        let mut entries = self.state.entries.write();
        let end = index + count;
        if end > entries.len() {
            return Err(WeftError::index(end - 1, entries.len()));
        }
        let group = &entries[index..end];

        let replacement = match merge.then(|| Self::merged(group)).flatten() {
            Some(cut) => cut?,
            None => {
                let nested = Playlist::new(self.producer.profile().clone());
                nested
                    .state
                    .entries
                    .write()
                    .extend(group.iter().cloned());
                let length = nested.state.length();
                nested.producer.cut(0, length - 1)?
            }
        };
        entries.splice(index..end, [PlaylistEntry::clip(replacement)]);
        debug!(index, count, merge, "Entries joined");
        Ok(())
    }

    /// A single cut covering `group` if it is a contiguous run of one source.
    fn merged(group: &[PlaylistEntry]) -> Option<Result<Producer>> {
        let clips: Vec<&Producer> = group
            .iter()
            .filter(|e| e.repeat == 1)
            .filter_map(PlaylistEntry::producer)
            .collect();
        if clips.len() != group.len() {
            return None;
        }
        let root = clips[0].root();
        let contiguous = clips.windows(2).all(|pair| {
            pair[1].root().ptr_eq(&root) && pair[1].get_in() == pair[0].get_out() + 1
        });
        if !contiguous {
            return None;
        }
        let (first, last) = (clips[0], clips[clips.len() - 1]);
        Some(first.cut(first.get_in(), last.get_out()))
    }

    /// Overlap the last `length` frames of entry `index` with the first
    /// `length` frames of entry `index + 1`.
    ///
    /// The overlap becomes a new entry holding a tractor with the tail on
    /// track 0, the head on track 1 and `transition` (a dissolve when
    /// `None`) planted between them over the whole overlap. The neighbours
    /// are shortened and dropped when nothing is left of them. On error the
    /// playlist is unchanged.
    pub fn mix(
        &self,
        index: usize,
        length: Option<Position>,
        transition: Option<Transition>,
    ) -> Result<()> {
        let length = length.unwrap_or(defaults::MIX_LENGTH);
        let mut entries = self.state.entries.write();
        if index + 1 >= entries.len() {
            return Err(WeftError::Mix(format!(
                "Entry {index} has no following entry to mix with"
            )));
        }
        if length <= 0 {
            return Err(WeftError::Mix(format!("Mix length must be positive, got {length}")));
        }
        let (a, b) = match (&entries[index], &entries[index + 1]) {
            (
                PlaylistEntry {
                    entry: Entry::Clip(a),
                    repeat: 1,
                },
                PlaylistEntry {
                    entry: Entry::Clip(b),
                    repeat: 1,
                },
            ) => (a.clone(), b.clone()),
            _ => {
                return Err(WeftError::Mix(
                    "Only two adjacent unrepeated clips can be mixed".into(),
                ))
            }
        };
        let (a_len, b_len) = (a.get_playtime(), b.get_playtime());
        if length > a_len || length > b_len {
            return Err(WeftError::Mix(format!(
                "Mix of {length} frames needs clips at least that long, got {a_len} and {b_len}"
            )));
        }

        // Build everything before touching the list
        let (a_in, a_out) = (a.get_in(), a.get_out());
        let (b_in, b_out) = (b.get_in(), b.get_out());
        let tail = a.root().cut(a_out - length + 1, a_out)?;
        let head = b.root().cut(b_in, b_in + length - 1)?;
        let tractor = Tractor::new(self.producer.profile().clone());
        tractor.set_track(&tail, 0)?;
        tractor.set_track(&head, 1)?;
        let transition =
            transition.unwrap_or_else(|| Dissolve::transition(self.producer.profile().clone()));
        transition.set_in_and_out(0, length - 1);
        tractor.plant_transition(&transition, 0, 1)?;
        let overlap = tractor.cut(0, length - 1)?;

        let mut replacement = Vec::with_capacity(3);
        if a_len > length {
            a.set_in_and_out(a_in, a_out - length)?;
            replacement.push(PlaylistEntry::clip(a));
        }
        replacement.push(PlaylistEntry::clip(overlap));
        if b_len > length {
            b.set_in_and_out(b_in + length, b_out)?;
            replacement.push(PlaylistEntry::clip(b));
        }
        entries.splice(index..index + 2, replacement);
        info!(index, length, transition = transition.service_name(), "Clips mixed");
        Ok(())
    }

    // ── Queries ──

    /// Total frames.
    pub fn length(&self) -> Position {
        self.state.length()
    }

    /// Entry and local position for timeline `position`.
    pub fn resolve(&self, position: Position) -> Option<(usize, Position)> {
        locate(&self.state.entries.read(), position)
    }

    /// Index of the entry at `position`, clamped to the first or last
    /// entry. `None` only when the playlist is empty.
    pub fn get_clip_at(&self, position: Position) -> Option<usize> {
        let entries = self.state.entries.read();
        if entries.is_empty() {
            return None;
        }
        Some(locate(&entries, position).map_or_else(
            || if position < 0 { 0 } else { entries.len() - 1 },
            |(index, _)| index,
        ))
    }

    pub fn clip_info(&self, index: usize) -> Result<ClipInfo> {
        let entries = self.state.entries.read();
        Self::check_index(&entries, index)?;
        let slot = &entries[index];
        let start = start_of(&entries, index);
        Ok(match &slot.entry {
            Entry::Blank(length) => ClipInfo {
                index,
                producer: None,
                resource: "blank".into(),
                frame_in: 0,
                frame_out: length - 1,
                start,
                frame_count: slot.length(),
                length: *length,
                repeat: slot.repeat,
                is_blank: true,
            },
            Entry::Clip(clip) => ClipInfo {
                index,
                producer: Some(clip.clone()),
                resource: clip.service_name().to_owned(),
                frame_in: clip.get_in(),
                frame_out: clip.get_out(),
                start,
                frame_count: slot.length(),
                length: clip.get_length(),
                repeat: slot.repeat,
                is_blank: false,
            },
        })
    }

    pub fn is_blank(&self, index: usize) -> bool {
        self.state
            .entries
            .read()
            .get(index)
            .is_some_and(PlaylistEntry::is_blank)
    }

    /// Timeline position of the first frame of entry `index`.
    pub fn clip_start(&self, index: usize) -> Position {
        start_of(&self.state.entries.read(), index)
    }

    /// Timeline frames of entry `index`, 0 when out of range.
    pub fn clip_length(&self, index: usize) -> Position {
        self.state
            .entries
            .read()
            .get(index)
            .map_or(0, PlaylistEntry::length)
    }

    /// Entry under the play head.
    pub fn current_clip(&self) -> Option<usize> {
        self.get_clip_at(self.producer.position())
    }

    /// Start of the entry `index` away from `whence`, clamped to the list.
    pub fn clip(&self, whence: Whence, index: i64) -> Position {
        let count = self.count() as i64;
        if count == 0 {
            return 0;
        }
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.current_clip().unwrap_or(0) as i64,
            Whence::End => count - 1,
        };
        self.clip_start((base + index).clamp(0, count - 1) as usize)
    }
}

impl Deref for Playlist {
    type Target = Producer;

    fn deref(&self) -> &Producer {
        &self.producer
    }
}

impl std::fmt::Debug for Playlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playlist")
            .field("entries", &self.count())
            .field("length", &self.length())
            .field("position", &self.producer.position())
            .finish()
    }
}
