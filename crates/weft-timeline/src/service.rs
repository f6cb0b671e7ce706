//! The state and operations every service shares.

use parking_lot::{ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;
use weft_core::{Frame, Properties, Result, SharedProfile, WeftError};

use crate::filter::Filter;
use crate::producer::Producer;

/// Which capability set a service provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Producer,
    Playlist,
    Tractor,
    Filter,
    Transition,
    Consumer,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Producer => "producer",
            Self::Playlist => "playlist",
            Self::Tractor => "tractor",
            Self::Filter => "filter",
            Self::Transition => "transition",
            Self::Consumer => "consumer",
        };
        f.write_str(name)
    }
}

/// Identity, properties, filter chain and upstream link of a service.
pub struct ServiceBase {
    id: Uuid,
    kind: ServiceKind,
    service: String,
    profile: SharedProfile,
    properties: Properties,
    filters: RwLock<Vec<Filter>>,
    upstream: RwLock<Option<Producer>>,
    closed: AtomicBool,
}

impl ServiceBase {
    /// `service` is the identifying name the factory knows it by.
    pub fn new(kind: ServiceKind, service: &str, profile: SharedProfile) -> Self {
        let properties = Properties::new();
        properties.set_string("service", service);
        Self {
            id: Uuid::new_v4(),
            kind,
            service: service.to_owned(),
            profile,
            properties,
            filters: RwLock::new(Vec::new()),
            upstream: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn profile(&self) -> &SharedProfile {
        &self.profile
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Re-entrant lock for multi-key property updates.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.properties.lock()
    }

    // ── Filter chain ──

    /// Append `filter` to the chain. Attaching the same filter twice is a
    /// no-op; a filter cannot be attached to itself.
    pub fn attach(&self, filter: &Filter) -> Result<()> {
        if filter.id() == self.id {
            return Err(WeftError::InvalidParameter(
                "A filter cannot be attached to itself".into(),
            ));
        }
        let mut filters = self.filters.write();
        if filters.iter().any(|f| f.id() == filter.id()) {
            return Ok(());
        }
        debug!(service = %self.service, filter = filter.service_name(), "Filter attached");
        filters.push(filter.clone());
        Ok(())
    }

    /// Remove `filter` from the chain.
    pub fn detach(&self, filter: &Filter) -> bool {
        let mut filters = self.filters.write();
        let before = filters.len();
        filters.retain(|f| f.id() != filter.id());
        filters.len() != before
    }

    pub fn filter_count(&self) -> usize {
        self.filters.read().len()
    }

    pub fn filter(&self, index: usize) -> Option<Filter> {
        self.filters.read().get(index).cloned()
    }

    /// Snapshot of the chain in attachment order.
    pub fn filters(&self) -> Vec<Filter> {
        self.filters.read().clone()
    }

    /// Run every attached filter over `frame` in attachment order.
    ///
    /// Each filter's callbacks are lowered beneath those of the filters
    /// attached before it, so the last attached filter sits directly on the
    /// upstream work: its transform sees the rawest image and the first
    /// attached filter's transform runs last.
    pub fn apply_filters(&self, frame: &mut Frame) {
        let filters = self.filters();
        let (image_base, audio_base) = (frame.image_depth(), frame.audio_depth());
        for filter in &filters {
            let (image_depth, audio_depth) = (frame.image_depth(), frame.audio_depth());
            filter.apply(frame);
            frame.lower_image_callbacks(image_base, image_depth);
            frame.lower_audio_callbacks(audio_base, audio_depth);
        }
    }

    // ── Upstream ──

    pub fn connect_producer(&self, producer: &Producer) -> Result<()> {
        if producer.id() == self.id {
            return Err(WeftError::InvalidParameter(
                "A service cannot be connected to itself".into(),
            ));
        }
        *self.upstream.write() = Some(producer.clone());
        Ok(())
    }

    pub fn disconnect_producer(&self) -> Option<Producer> {
        self.upstream.write().take()
    }

    pub fn upstream(&self) -> Option<Producer> {
        self.upstream.read().clone()
    }

    // ── Lifecycle ──

    /// Mark closed. Returns `true` only for the first call.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop the filter chain, the upstream link and every property.
    pub(crate) fn release(&self) {
        let filters = std::mem::take(&mut *self.filters.write());
        let upstream = self.upstream.write().take();
        drop(filters);
        drop(upstream);
        self.properties.clear();
    }
}

impl fmt::Debug for ServiceBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBase")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("service", &self.service)
            .field("filters", &self.filter_count())
            .finish()
    }
}

/// Operations common to producers, filters, transitions and consumers.
pub trait Service {
    fn base(&self) -> &ServiceBase;

    /// Produce a frame. `index` selects an output for multi-output services
    /// and is ignored by everything else.
    fn get_frame(&self, index: usize) -> Result<Frame>;

    fn id(&self) -> Uuid {
        self.base().id()
    }

    fn kind(&self) -> ServiceKind {
        self.base().kind()
    }

    fn service_name(&self) -> &str {
        self.base().service_name()
    }

    fn properties(&self) -> &Properties {
        self.base().properties()
    }

    fn profile(&self) -> &SharedProfile {
        self.base().profile()
    }

    fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.base().lock()
    }

    fn attach(&self, filter: &Filter) -> Result<()> {
        self.base().attach(filter)
    }

    fn detach(&self, filter: &Filter) -> bool {
        self.base().detach(filter)
    }

    fn filter_count(&self) -> usize {
        self.base().filter_count()
    }

    fn filter(&self, index: usize) -> Option<Filter> {
        self.base().filter(index)
    }

    fn connect_producer(&self, producer: &Producer) -> Result<()> {
        self.base().connect_producer(producer)
    }
}
