//! Producers: services that generate frames at a position.
//!
//! A [`Producer`] is a cheap shared handle. Its generator is a
//! [`ProducerImpl`]; everything else (in/out, speed, end-of-file policy,
//! attached filters, cuts) is common and lives here.
//!
//! Positions are relative to the producer's in point. The generator is
//! asked for absolute source frames (`in + position`).

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use weft_core::frame::keys;
use weft_core::{defaults, samples_for_position, Frame, Position, Result, SharedProfile, WeftError};

use crate::service::{Service, ServiceBase, ServiceKind};

/// Frame property set on frames requested past the end.
pub const EOS: &str = "eos";

/// What happens when playback reaches the out point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EofPolicy {
    /// Freeze on the last frame and set speed to 0.
    #[default]
    Pause,
    /// Wrap back to the in point.
    Loop,
    /// Run past the end, yielding end-of-stream frames.
    Terminate,
}

impl EofPolicy {
    fn from_property(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("loop") => Self::Loop,
            Some("continue") | Some("terminate") => Self::Terminate,
            _ => Self::Pause,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Loop => "loop",
            Self::Terminate => "continue",
        }
    }
}

/// A frame generator.
pub trait ProducerImpl: Send + Sync + 'static {
    /// Build the frame for absolute source frame `index`, pushing the image
    /// (and optionally audio) callbacks. Must not evaluate anything.
    fn get_frame(&self, producer: &Producer, index: Position) -> Result<Frame>;

    /// Length computed from content, for containers whose length changes.
    fn length(&self) -> Option<Position> {
        None
    }

    /// Check the source can be opened. `None` means the generator has no
    /// such capability and is taken as valid.
    fn probe(&self, _producer: &Producer) -> Option<Result<()>> {
        None
    }

    /// Producer this one wraps, for introspection.
    fn wrapped(&self) -> Option<Producer> {
        None
    }

    /// Release generator resources. Called once.
    fn close(&self) {}

    fn as_any(&self) -> &dyn Any;
}

enum Source {
    Generator(Box<dyn ProducerImpl>),
    Cut(Producer),
}

#[derive(Debug, Default)]
struct PlayState {
    position: Position,
    speed: f64,
    /// Fractional frames accumulated at non-integer speeds
    remainder: f64,
}

struct ProducerInner {
    base: ServiceBase,
    source: Source,
    state: Mutex<PlayState>,
    /// Cuts taken from this producer that still hold its source
    cuts: AtomicUsize,
    released: AtomicBool,
}

impl ProducerInner {
    fn new(base: ServiceBase, source: Source) -> Self {
        Self {
            base,
            source,
            state: Mutex::new(PlayState {
                speed: 1.0,
                ..PlayState::default()
            }),
            cuts: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Give up the source once: a generator is closed, a cut hands its
    /// hold back to the parent. Returns `false` when already done.
    fn free_source(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        match &self.source {
            Source::Generator(g) => g.close(),
            Source::Cut(parent) => parent.0.cut_released(),
        }
        true
    }

    fn release(&self) {
        if self.free_source() {
            self.base.release();
        }
    }

    /// A closed parent is released with its last cut.
    fn cut_released(&self) {
        if self.cuts.fetch_sub(1, Ordering::SeqCst) == 1 && self.base.is_closed() {
            self.release();
            debug!(id = %self.base.id(), "Producer released with its last cut");
        }
    }
}

/// Shared handle to a producer. Clones refer to the same producer.
#[derive(Clone)]
pub struct Producer(Arc<ProducerInner>);

impl Producer {
    /// Wrap a generator. `length` seeds the `length` property unless the
    /// generator computes its own.
    pub fn new(
        kind: ServiceKind,
        service: &str,
        profile: SharedProfile,
        generator: impl ProducerImpl,
        length: Option<Position>,
    ) -> Self {
        let base = ServiceBase::new(kind, service, profile);
        if generator.length().is_none() {
            base.properties()
                .set_position("length", length.unwrap_or(defaults::GENERATOR_LENGTH).max(1));
        }
        base.properties().set_position("in", 0);
        base.properties().set_string("eof", EofPolicy::default().as_str());
        debug!(service, kind = %kind, "Producer created");
        Self(Arc::new(ProducerInner::new(
            base,
            Source::Generator(Box::new(generator)),
        )))
    }

    // ── Identity ──

    /// Whether two handles refer to the same producer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether this is a cut of another producer.
    pub fn is_cut(&self) -> bool {
        matches!(self.0.source, Source::Cut(_))
    }

    /// The producer a cut was taken from. `None` for non-cuts.
    pub fn parent(&self) -> Option<Producer> {
        match &self.0.source {
            Source::Cut(parent) => Some(parent.clone()),
            Source::Generator(_) => None,
        }
    }

    /// The producer owning the generator (self for non-cuts).
    pub fn root(&self) -> Producer {
        match &self.0.source {
            Source::Cut(parent) => parent.root(),
            Source::Generator(_) => self.clone(),
        }
    }

    /// The generator behind this producer or its parent.
    pub fn generator(&self) -> &dyn ProducerImpl {
        match &self.0.source {
            Source::Generator(g) => g.as_ref(),
            Source::Cut(parent) => parent.generator(),
        }
    }

    /// Downcast the generator.
    pub fn generator_as<T: Any>(&self) -> Option<&T> {
        self.generator().as_any().downcast_ref::<T>()
    }

    // ── Cuts ──

    /// A new producer over the same source with its own in/out/position.
    ///
    /// Cutting a cut cuts the original. `in`/`out` are source frames and are
    /// clamped to the source length. The source stays alive while any cut
    /// does, even after the original is closed.
    pub fn cut(&self, in_point: Position, out_point: Position) -> Result<Producer> {
        let parent = self.root();
        parent.0.cuts.fetch_add(1, Ordering::SeqCst);
        if parent.0.released.load(Ordering::SeqCst) {
            parent.0.cuts.fetch_sub(1, Ordering::SeqCst);
            return Err(WeftError::Resource(format!(
                "Producer {} is closed",
                parent.service_name()
            )));
        }
        let base = ServiceBase::new(
            parent.0.base.kind(),
            parent.0.base.service_name(),
            parent.0.base.profile().clone(),
        );
        base.properties().set_string("eof", EofPolicy::Pause.as_str());
        let cut = Self(Arc::new(ProducerInner::new(base, Source::Cut(parent))));
        cut.set_in_and_out(in_point, out_point)?;
        Ok(cut)
    }

    // ── Timing ──

    /// Total source length in frames.
    pub fn get_length(&self) -> Position {
        match &self.0.source {
            Source::Cut(parent) => parent.get_length(),
            Source::Generator(g) => g
                .length()
                .unwrap_or_else(|| self.properties().get_position("length")),
        }
    }

    pub fn get_in(&self) -> Position {
        self.properties().get_position("in")
    }

    /// Out point, never past the last source frame.
    pub fn get_out(&self) -> Position {
        let last = self.get_length() - 1;
        if self.properties().has("out") {
            self.properties().get_position("out").min(last)
        } else {
            last
        }
    }

    /// Frames between in and out inclusive.
    pub fn get_playtime(&self) -> Position {
        (self.get_out() - self.get_in() + 1).max(0)
    }

    /// Set both points. Out of range values are clamped; reversed points are
    /// swapped.
    pub fn set_in_and_out(&self, in_point: Position, out_point: Position) -> Result<()> {
        let length = self.get_length();
        if length <= 0 {
            return Err(WeftError::InvalidParameter(format!(
                "Cannot set in/out on empty producer {}",
                self.service_name()
            )));
        }
        let clamp = |p: Position| p.clamp(0, length - 1);
        let (mut a, mut b) = (clamp(in_point), clamp(out_point));
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        {
            let _guard = self.lock();
            self.properties().set_position("in", a);
            self.properties().set_position("out", b);
        }
        let position = self.position();
        self.seek(position);
        Ok(())
    }

    pub fn eof_policy(&self) -> EofPolicy {
        EofPolicy::from_property(self.properties().get_string("eof"))
    }

    pub fn set_eof_policy(&self, policy: EofPolicy) {
        self.properties().set_string("eof", policy.as_str());
    }

    /// Current position relative to the in point.
    pub fn position(&self) -> Position {
        self.0.state.lock().position
    }

    /// Absolute source frame at the current position.
    pub fn frame_index(&self) -> Position {
        self.get_in() + self.position()
    }

    pub fn speed(&self) -> f64 {
        self.0.state.lock().speed
    }

    pub fn set_speed(&self, speed: f64) {
        let mut state = self.0.state.lock();
        state.speed = speed;
        state.remainder = 0.0;
    }

    /// Move to `position`, applying the end-of-file policy.
    pub fn seek(&self, position: Position) {
        let playtime = self.get_playtime();
        let policy = self.eof_policy();
        let mut state = self.0.state.lock();
        state.position = if position < 0 || playtime <= 0 {
            0
        } else if position >= playtime {
            match policy {
                EofPolicy::Loop => position % playtime,
                EofPolicy::Pause => {
                    state.speed = 0.0;
                    playtime - 1
                }
                EofPolicy::Terminate => playtime,
            }
        } else {
            position
        };
        state.remainder = 0.0;
        trace!(service = self.service_name(), position = state.position, "Seek");
    }

    /// Advance by the current speed.
    pub fn prepare_next(&self) {
        let (next, remainder) = {
            let state = self.0.state.lock();
            if state.speed == 0.0 {
                return;
            }
            let total = state.remainder + state.speed;
            let step = total.trunc();
            (state.position + step as Position, total - step)
        };
        self.seek(next);
        self.0.state.lock().remainder = remainder;
    }

    // ── Frames ──

    /// Map a relative position onto a playable one, or `None` past the ends.
    fn resolve(&self, position: Position) -> Option<Position> {
        let playtime = self.get_playtime();
        if playtime <= 0 {
            return None;
        }
        if self.eof_policy() == EofPolicy::Loop {
            return Some(position.rem_euclid(playtime));
        }
        (0..playtime).contains(&position).then_some(position)
    }

    /// Generate at absolute source frame `index` and apply this producer's
    /// filters with the frame positioned at `position`.
    fn render(&self, index: Position, position: Position) -> Result<Frame> {
        let mut frame = match &self.0.source {
            Source::Generator(g) => g.get_frame(self, index)?,
            Source::Cut(parent) => {
                let parent_position = index - parent.get_in();
                parent.render(index, parent_position)?
            }
        };
        frame.set_position(position);
        self.0.base.apply_filters(&mut frame);
        Ok(frame)
    }

    /// The frame at relative `position` without moving the play head.
    ///
    /// Positions outside the playable range yield a blank end-of-stream
    /// frame (or wrap, for looping producers).
    pub fn frame_at(&self, position: Position) -> Result<Frame> {
        let frame = match self.resolve(position) {
            Some(p) => self.render(self.get_in() + p, p)?,
            None => {
                let frame = Frame::blank(position);
                frame.properties().set_int(EOS, 1);
                frame
            }
        };
        let profile = self.profile();
        let props = frame.properties();
        props.set_if_absent(keys::WIDTH, profile.width as i64);
        props.set_if_absent(keys::HEIGHT, profile.height as i64);
        props.set_if_absent(
            keys::AUDIO_SAMPLES,
            samples_for_position(position, profile.frame_rate, weft_core::audio::DEFAULT_FREQUENCY)
                as i64,
        );
        Ok(frame)
    }

    /// The frame at the play head, then advance by speed.
    pub fn get_frame(&self) -> Result<Frame> {
        if self.is_closed() {
            return Err(WeftError::Resource(format!(
                "Producer {} is closed",
                self.service_name()
            )));
        }
        let frame = self.frame_at(self.position());
        self.prepare_next();
        frame
    }

    // ── Capabilities ──

    /// Validate the source. Producers without a probe are valid.
    pub fn probe(&self) -> Result<()> {
        match &self.0.source {
            Source::Cut(parent) => parent.probe(),
            Source::Generator(g) => g.probe(self).unwrap_or(Ok(())),
        }
    }

    /// Close the producer: run the generator's release, drop filters and
    /// properties. Later calls do nothing.
    ///
    /// Cuts never close their parent. A parent closed while cuts remain
    /// refuses frames of its own but keeps the source for the cuts until the
    /// last one is closed or dropped.
    pub fn close(&self) -> bool {
        if !self.0.base.mark_closed() {
            return false;
        }
        let cuts = self.0.cuts.load(Ordering::SeqCst);
        if cuts == 0 {
            self.0.release();
            debug!(id = %self.id(), "Producer closed");
        } else {
            debug!(id = %self.id(), cuts, "Producer closed, source kept for its cuts");
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.0.base.is_closed()
    }
}

impl Service for Producer {
    fn base(&self) -> &ServiceBase {
        &self.0.base
    }

    fn get_frame(&self, _index: usize) -> Result<Frame> {
        Producer::get_frame(self)
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("service", &self.service_name())
            .field("cut", &self.is_cut())
            .field("in", &self.get_in())
            .field("out", &self.get_out())
            .field("position", &self.position())
            .finish()
    }
}

impl Drop for ProducerInner {
    fn drop(&mut self) {
        self.base.mark_closed();
        self.free_source();
    }
}

/// Log a failed frame request and substitute a blank placeholder.
pub(crate) fn warn_and_blank(service: &str, position: Position, error: &WeftError) -> Frame {
    warn!(service, position, error = %error, "Frame generation failed, substituting blank");
    Frame::blank(position)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let p = clip("a", 50);
        assert_eq!(p.get_length(), 50);
        assert_eq!((p.get_in(), p.get_out()), (0, 49));
        assert_eq!(p.get_playtime(), 50);
        assert_eq!(p.speed(), 1.0);
        assert_eq!(p.eof_policy(), EofPolicy::Pause);
    }

    #[test]
    fn test_get_frame_advances() {
        let p = clip("a", 10);
        p.set_in_and_out(2, 9).unwrap();
        let f0 = p.get_frame().unwrap();
        let f1 = p.get_frame().unwrap();
        assert_eq!((f0.position(), f1.position()), (0, 1));
        assert_eq!(f1.properties().get_position("source_index"), 3);
        assert_eq!(p.position(), 2);
        assert_eq!(p.frame_index(), 4);
    }

    #[test]
    fn test_eof_pause_freezes() {
        let p = clip("a", 3);
        p.seek(2);
        let last = p.get_frame().unwrap();
        assert_eq!(last.position(), 2);
        assert_eq!(p.position(), 2);
        assert_eq!(p.speed(), 0.0);
    }

    #[test]
    fn test_eof_loop_wraps() {
        let p = clip("a", 3);
        p.set_eof_policy(EofPolicy::Loop);
        let positions: Vec<Position> = (0..7).map(|_| p.get_frame().unwrap().position()).collect();
        assert_eq!(positions, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_eof_terminate_signals() {
        let p = clip("a", 2);
        p.set_eof_policy(EofPolicy::Terminate);
        assert!(!p.get_frame().unwrap().properties().get_bool(EOS));
        assert!(!p.get_frame().unwrap().properties().get_bool(EOS));
        assert!(p.get_frame().unwrap().properties().get_bool(EOS));
    }

    #[test]
    fn test_fractional_speed() {
        let p = clip("a", 100);
        p.set_speed(0.5);
        let positions: Vec<Position> = (0..6).map(|_| p.get_frame().unwrap().position()).collect();
        assert_eq!(positions, vec![0, 0, 1, 1, 2, 2]);
        p.set_speed(-1.0);
        p.seek(3);
        p.prepare_next();
        assert_eq!(p.position(), 2);
    }

    #[test]
    fn test_in_out_clamped_and_swapped() {
        let p = clip("a", 20);
        p.set_in_and_out(15, -4).unwrap();
        assert_eq!((p.get_in(), p.get_out()), (0, 15));
        p.set_in_and_out(5, 500).unwrap();
        assert_eq!((p.get_in(), p.get_out()), (5, 19));
    }

    #[test]
    fn test_cut_is_independent() {
        let (parent, calls) = counting("a", 100);
        let cut = parent.cut(10, 19).unwrap();
        assert!(cut.is_cut());
        assert!(cut.parent().unwrap().ptr_eq(&parent));
        assert_eq!(cut.get_playtime(), 10);

        cut.seek(5);
        assert_eq!(parent.position(), 0);
        let mut f = cut.get_frame().unwrap();
        assert_eq!(f.properties().get_position("source_index"), 15);
        f.get_image(&weft_core::ImageRequest::rgba(1, 1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A cut of a cut cuts the original
        let nested = cut.cut(0, 4).unwrap();
        assert!(nested.parent().unwrap().ptr_eq(&parent));
    }

    #[test]
    fn test_dropping_cut_keeps_parent_open() {
        let parent = clip("a", 10);
        let cut = parent.cut(0, 4).unwrap();
        drop(cut);
        assert!(!parent.is_closed());
        assert!(parent.get_frame().is_ok());
    }

    #[test]
    fn test_closed_parent_keeps_cuts_playable() {
        let released = Arc::new(AtomicUsize::new(0));
        let (parent, calls) = counting("a", 30);
        let r = released.clone();
        parent.properties().set_data("handle", 1u8, 1, Some(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        let first = parent.cut(10, 19).unwrap();
        let second = parent.cut(0, 4).unwrap();

        assert!(parent.close());
        assert!(parent.get_frame().is_err());
        // Still cuttable while the source lives.
        assert!(parent.cut(0, 1).is_ok());
        assert_eq!(first.get_playtime(), 10);
        let mut frame = first.frame_at(3).unwrap();
        assert_eq!(frame.properties().get_position("source_index"), 13);
        frame.get_image(&weft_core::ImageRequest::rgba(1, 1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The source goes with the last cut.
        drop(first);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(second.close());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(parent.cut(0, 1).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let released = Arc::new(AtomicUsize::new(0));
        let p = clip("a", 10);
        let r = released.clone();
        p.properties().set_data("handle", 1u8, 1, Some(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(p.close());
        assert!(!p.close());
        drop(p);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_producer_refuses_frames() {
        let p = clip("a", 10);
        p.close();
        assert!(p.get_frame().is_err());
    }

    #[test]
    fn test_probe_defaults_to_valid() {
        assert!(clip("a", 1).probe().is_ok());
    }

    #[test]
    fn test_frames_are_lazy() {
        let (p, calls) = counting("a", 100);
        for _ in 0..20 {
            drop(p.get_frame().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
