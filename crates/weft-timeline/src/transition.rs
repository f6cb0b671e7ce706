//! Transitions: services that combine a B frame into an A frame.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use weft_core::{Frame, Position, Result, SharedProfile, WeftError};

use crate::service::{Service, ServiceBase, ServiceKind};

/// The effect of a transition.
///
/// `process` consumes `b` and pushes onto `a` whatever callbacks combine the
/// two. Like filters it must not evaluate anything itself.
pub trait TransitionImpl: Send + Sync + 'static {
    fn process(&self, transition: &Transition, a: &mut Frame, b: Frame) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

struct TransitionInner {
    base: ServiceBase,
    imp: Box<dyn TransitionImpl>,
}

/// Shared handle to a transition.
#[derive(Clone)]
pub struct Transition(Arc<TransitionInner>);

impl Transition {
    pub fn new(service: &str, profile: SharedProfile, imp: impl TransitionImpl) -> Self {
        debug!(service, "Transition created");
        Self(Arc::new(TransitionInner {
            base: ServiceBase::new(ServiceKind::Transition, service, profile),
            imp: Box::new(imp),
        }))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn imp_as<T: Any>(&self) -> Option<&T> {
        self.0.imp.as_any().downcast_ref::<T>()
    }

    pub fn set_in_and_out(&self, in_point: Position, out_point: Position) {
        let _guard = self.lock();
        self.properties().set_position("in", in_point.min(out_point));
        self.properties().set_position("out", in_point.max(out_point));
    }

    pub fn get_in(&self) -> Position {
        self.properties().get_position("in")
    }

    /// Out point; `None` leaves the transition active forever.
    pub fn get_out(&self) -> Option<Position> {
        self.properties()
            .has("out")
            .then(|| self.properties().get_position("out"))
    }

    /// Whether the transition runs at timeline `position`.
    pub fn is_active(&self, position: Position) -> bool {
        if self.properties().get_bool("disable") {
            return false;
        }
        position >= self.get_in() && self.get_out().map_or(true, |out| position <= out)
    }

    /// Fraction through the transition at `position`, 0.0 at in and 1.0 at
    /// out. Unbounded transitions stay at 0.0 unless `progress` is set.
    pub fn progress(&self, position: Position) -> f64 {
        if self.properties().has("progress") {
            let length = self.get_out().map_or(1, |out| out - self.get_in() + 1);
            return self
                .properties()
                .get_animated_double("progress", position - self.get_in(), length)
                .clamp(0.0, 1.0);
        }
        let Some(out) = self.get_out() else {
            return 0.0;
        };
        let span = (out - self.get_in()).max(1) as f64;
        ((position - self.get_in()) as f64 / span).clamp(0.0, 1.0)
    }

    /// Combine `b` into `a`. On failure `a` passes through unchanged.
    pub fn apply(&self, a: &mut Frame, b: Frame) {
        if self.0.base.is_closed() {
            return;
        }
        let depth = (a.image_depth(), a.audio_depth());
        if let Err(e) = self.0.imp.process(self, a, b) {
            warn!(
                transition = self.service_name(),
                position = a.position(),
                error = %e,
                "Transition failed, passing A frame through"
            );
            while a.image_depth() > depth.0 {
                a.pop_image_callback();
            }
            while a.audio_depth() > depth.1 {
                a.pop_audio_callback();
            }
        }
    }

    /// Idempotent close.
    pub fn close(&self) -> bool {
        if !self.0.base.mark_closed() {
            return false;
        }
        self.0.base.release();
        true
    }
}

impl Service for Transition {
    fn base(&self) -> &ServiceBase {
        &self.0.base
    }

    /// Transitions only produce frames as part of a tractor.
    fn get_frame(&self, _index: usize) -> Result<Frame> {
        Err(WeftError::InvalidParameter(format!(
            "Transition {} must be planted in a tractor",
            self.service_name()
        )))
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("service", &self.service_name())
            .field("in", &self.get_in())
            .field("out", &self.get_out())
            .finish()
    }
}

/// Share a B frame between the image and audio callbacks of an A frame.
pub fn share_frame(frame: Frame) -> Arc<Mutex<Frame>> {
    Arc::new(Mutex::new(frame))
}

/// Cross-fade from A to B over the transition's span, video and audio.
///
/// This is the transition `mix` builds when the caller supplies none.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dissolve;

impl Dissolve {
    pub const SERVICE: &'static str = "dissolve";

    pub fn transition(profile: SharedProfile) -> Transition {
        Transition::new(Self::SERVICE, profile, Self)
    }
}

impl TransitionImpl for Dissolve {
    fn process(&self, transition: &Transition, a: &mut Frame, b: Frame) -> Result<()> {
        let t = transition.progress(a.position());
        let b = share_frame(b);

        let b_image = b.clone();
        a.push_image_callback(move |a, req| {
            let under = a.pull_image(req)?;
            let over = b_image.lock().get_image(req)?;
            Ok(under.blend(&over, t))
        });

        a.push_audio_callback(move |a, req| {
            let under = a.pull_audio(req)?;
            let over = b.lock().get_audio(req)?;
            Ok(under.mix(&over, t as f32))
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::profile;
    use weft_core::{AudioRequest, Color, Image, ImageFormat, ImageRequest};

    fn solid(position: Position, shade: u8) -> Frame {
        let mut frame = Frame::new(position);
        frame.set_image(Image::filled(
            ImageFormat::Rgba8,
            2,
            2,
            Color::rgb(shade, shade, shade),
        ));
        frame
    }

    #[test]
    fn test_progress_spans_in_to_out() {
        let t = Dissolve::transition(profile());
        t.set_in_and_out(10, 20);
        assert_eq!(t.progress(10), 0.0);
        assert_eq!(t.progress(15), 0.5);
        assert_eq!(t.progress(20), 1.0);
        assert_eq!(t.progress(99), 1.0);
        assert!(!t.is_active(9));
        assert!(t.is_active(20));
    }

    #[test]
    fn test_unbounded_is_always_active() {
        let t = Dissolve::transition(profile());
        assert!(t.is_active(0) && t.is_active(1_000_000));
        assert_eq!(t.progress(500), 0.0);
    }

    #[test]
    fn test_dissolve_blends_midway() {
        let t = Dissolve::transition(profile());
        t.set_in_and_out(0, 2);
        let mut a = solid(1, 0);
        t.apply(&mut a, solid(1, 200));
        let image = a.get_image(&ImageRequest::rgba(2, 2)).unwrap();
        assert_eq!(image.pixel(0, 0), Some([100, 100, 100, 255]));
    }

    #[test]
    fn test_dissolve_mixes_audio() {
        let t = Dissolve::transition(profile());
        t.set_in_and_out(0, 1);
        let mut a = Frame::blank(1);
        let mut b = Frame::new(1);
        let mut loud = weft_core::Audio::silence(48_000, 2, 4);
        loud.data.iter_mut().for_each(|s| *s = 1.0);
        b.set_audio(loud);
        t.apply(&mut a, b);
        let audio = a.get_audio(&AudioRequest::new(48_000, 2, 4)).unwrap();
        assert!((audio.peak() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_standalone_get_frame_is_an_error() {
        let t = Dissolve::transition(profile());
        assert!(Service::get_frame(&t, 0).is_err());
    }
}
