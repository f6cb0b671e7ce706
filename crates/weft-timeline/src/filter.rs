//! Filters: services that wrap a frame's pending work with their own.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use weft_core::{Frame, Position, Properties, Result, SharedProfile, WeftError};

use crate::service::{Service, ServiceBase, ServiceKind};

/// The effect of a filter.
///
/// `process` runs at `get_frame` time and must only push callbacks; the
/// pixel or sample work belongs inside them.
pub trait FilterImpl: Send + Sync + 'static {
    fn process(&self, filter: &Filter, frame: &mut Frame) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

struct FilterInner {
    base: ServiceBase,
    imp: Box<dyn FilterImpl>,
}

/// Shared handle to a filter.
#[derive(Clone)]
pub struct Filter(Arc<FilterInner>);

impl Filter {
    pub fn new(service: &str, profile: SharedProfile, imp: impl FilterImpl) -> Self {
        debug!(service, "Filter created");
        Self(Arc::new(FilterInner {
            base: ServiceBase::new(ServiceKind::Filter, service, profile),
            imp: Box::new(imp),
        }))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn imp_as<T: Any>(&self) -> Option<&T> {
        self.0.imp.as_any().downcast_ref::<T>()
    }

    /// Restrict the filter to frames `in..=out`.
    pub fn set_in_and_out(&self, in_point: Position, out_point: Position) {
        let _guard = self.lock();
        self.properties().set_position("in", in_point);
        self.properties().set_position("out", out_point);
    }

    pub fn get_in(&self) -> Position {
        self.properties().get_position("in")
    }

    /// Out point; `None` when unbounded.
    pub fn get_out(&self) -> Option<Position> {
        self.properties()
            .has("out")
            .then(|| self.properties().get_position("out"))
    }

    /// Whether the filter applies at `position`.
    pub fn is_active(&self, position: Position) -> bool {
        if self.properties().get_bool("disable") {
            return false;
        }
        position >= self.get_in() && self.get_out().map_or(true, |out| position <= out)
    }

    /// Position relative to the filter's in point.
    pub fn position_of(&self, frame: &Frame) -> Position {
        frame.position() - self.get_in()
    }

    /// Frames the filter spans, or the producer length when unbounded.
    pub fn length(&self, fallback: Position) -> Position {
        match self.get_out() {
            Some(out) => out - self.get_in() + 1,
            None => fallback,
        }
    }

    /// Evaluate an animated parameter for `frame`.
    pub fn animated_double(&self, key: &str, frame: &Frame, default: f64) -> f64 {
        let props: &Properties = self.properties();
        if !props.has(key) {
            return default;
        }
        let length = self.length(frame.properties().get_position("length").max(1));
        props.get_animated_double(key, self.position_of(frame), length)
    }

    /// Run the filter on `frame`. A failing filter leaves the frame to pass
    /// through unmodified.
    pub fn apply(&self, frame: &mut Frame) {
        if self.0.base.is_closed() || !self.is_active(frame.position()) {
            return;
        }
        let depth = frame.image_depth();
        let audio_depth = frame.audio_depth();
        if let Err(e) = self.0.imp.process(self, frame) {
            warn!(
                filter = self.service_name(),
                position = frame.position(),
                error = %e,
                "Filter failed, passing frame through"
            );
            while frame.image_depth() > depth {
                frame.pop_image_callback();
            }
            while frame.audio_depth() > audio_depth {
                frame.pop_audio_callback();
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

impl Service for Filter {
    fn base(&self) -> &ServiceBase {
        &self.0.base
    }

    /// Pull from the connected producer and apply this filter.
    fn get_frame(&self, _index: usize) -> Result<Frame> {
        let producer = self.0.base.upstream().ok_or_else(|| {
            WeftError::NotFound(format!("Filter {} has no producer", self.service_name()))
        })?;
        let mut frame = producer.get_frame()?;
        self.apply(&mut frame);
        Ok(frame)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("service", &self.service_name())
            .field("id", &self.id())
            .finish()
    }
}
