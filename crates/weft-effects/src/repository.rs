//! Registry of service constructors, looked up by kind and id.

use tracing::debug;
use weft_core::{Result, SharedProfile, SharedResource, WeftError};
use weft_timeline::{Filter, Playlist, Producer, ServiceKind, Tractor, Transition};

use crate::filters::{Brightness, Greyscale, Volume};
use crate::producers::{Bars, Colour, SineTable, Timewarp, Tone};
use crate::transitions::{AudioMix, Dip, Dissolve, Wipe};

/// Builds a producer from a profile and an optional argument.
pub type ProducerCtor = Box<dyn Fn(SharedProfile, Option<&str>) -> Result<Producer> + Send + Sync>;
/// Builds a producer around another one.
pub type WrapperCtor =
    Box<dyn Fn(SharedProfile, Producer, Option<&str>) -> Result<Producer> + Send + Sync>;
pub type FilterCtor = Box<dyn Fn(SharedProfile, Option<&str>) -> Result<Filter> + Send + Sync>;
pub type TransitionCtor =
    Box<dyn Fn(SharedProfile, Option<&str>) -> Result<Transition> + Send + Sync>;

/// Service factory.
///
/// The argument passed to a constructor is what the built-in services
/// record as their `resource` property, so a saved graph can be rebuilt
/// from it.
pub struct Repository {
    producers: Vec<(String, ProducerCtor)>,
    wrappers: Vec<(String, WrapperCtor)>,
    filters: Vec<(String, FilterCtor)>,
    transitions: Vec<(String, TransitionCtor)>,
    sine: SharedResource<SineTable>,
}

impl Repository {
    /// A repository holding every built-in service.
    pub fn new() -> Self {
        let mut repo = Self::empty();
        let sine = repo.sine.clone();

        repo.register_producer(Colour::SERVICE, Colour::producer);
        repo.register_producer(Bars::SERVICE, |profile, _| Ok(Bars::producer(profile)));
        repo.register_producer(Tone::SERVICE, move |profile, arg| {
            Tone::producer(profile, &sine, arg)
        });
        repo.register_producer(Playlist::SERVICE, |profile, _| {
            Ok(Playlist::new(profile).producer().clone())
        });
        repo.register_producer(Tractor::SERVICE, |profile, _| {
            Ok(Tractor::new(profile).producer().clone())
        });
        repo.register_wrapper(Timewarp::SERVICE, Timewarp::producer);

        repo.register_filter(Brightness::SERVICE, |profile, arg| {
            Ok(Brightness::filter(profile, arg))
        });
        repo.register_filter(Greyscale::SERVICE, |profile, _| Ok(Greyscale::filter(profile)));
        repo.register_filter(Volume::SERVICE, |profile, arg| Ok(Volume::filter(profile, arg)));

        repo.register_transition(Dissolve::SERVICE, |profile, _| Ok(Dissolve::transition(profile)));
        repo.register_transition(Wipe::SERVICE, Wipe::transition);
        repo.register_transition(Dip::SERVICE, Dip::transition);
        repo.register_transition(AudioMix::SERVICE, |profile, _| {
            Ok(AudioMix::transition(profile))
        });
        repo
    }

    /// A repository with nothing registered.
    pub fn empty() -> Self {
        Self {
            producers: Vec::new(),
            wrappers: Vec::new(),
            filters: Vec::new(),
            transitions: Vec::new(),
            sine: SineTable::resource(),
        }
    }

    /// The wave table the built-in tone producers share.
    pub fn sine_table(&self) -> &SharedResource<SineTable> {
        &self.sine
    }

    /// Register a producer. A later registration under the same id wins.
    pub fn register_producer<F>(&mut self, id: &str, ctor: F)
    where
        F: Fn(SharedProfile, Option<&str>) -> Result<Producer> + Send + Sync + 'static,
    {
        debug!(id, "Registering producer");
        upsert(&mut self.producers, id, Box::new(ctor));
    }

    pub fn register_wrapper<F>(&mut self, id: &str, ctor: F)
    where
        F: Fn(SharedProfile, Producer, Option<&str>) -> Result<Producer> + Send + Sync + 'static,
    {
        debug!(id, "Registering wrapper");
        upsert(&mut self.wrappers, id, Box::new(ctor));
    }

    pub fn register_filter<F>(&mut self, id: &str, ctor: F)
    where
        F: Fn(SharedProfile, Option<&str>) -> Result<Filter> + Send + Sync + 'static,
    {
        debug!(id, "Registering filter");
        upsert(&mut self.filters, id, Box::new(ctor));
    }

    pub fn register_transition<F>(&mut self, id: &str, ctor: F)
    where
        F: Fn(SharedProfile, Option<&str>) -> Result<Transition> + Send + Sync + 'static,
    {
        debug!(id, "Registering transition");
        upsert(&mut self.transitions, id, Box::new(ctor));
    }

    pub fn create_producer(&self, profile: SharedProfile, id: &str, arg: Option<&str>) -> Result<Producer> {
        let ctor = find(&self.producers, ServiceKind::Producer, id)?;
        ctor(profile, arg)
    }

    pub fn create_wrapper(
        &self,
        profile: SharedProfile,
        id: &str,
        inner: Producer,
        arg: Option<&str>,
    ) -> Result<Producer> {
        let ctor = find(&self.wrappers, ServiceKind::Producer, id)?;
        ctor(profile, inner, arg)
    }

    pub fn create_filter(&self, profile: SharedProfile, id: &str, arg: Option<&str>) -> Result<Filter> {
        let ctor = find(&self.filters, ServiceKind::Filter, id)?;
        ctor(profile, arg)
    }

    pub fn create_transition(
        &self,
        profile: SharedProfile,
        id: &str,
        arg: Option<&str>,
    ) -> Result<Transition> {
        let ctor = find(&self.transitions, ServiceKind::Transition, id)?;
        ctor(profile, arg)
    }

    /// Registered ids of one kind. Wrappers count as producers.
    pub fn names(&self, kind: ServiceKind) -> Vec<&str> {
        fn ids<T>(list: &[(String, T)]) -> impl Iterator<Item = &str> {
            list.iter().map(|(id, _)| id.as_str())
        }
        match kind {
            ServiceKind::Producer | ServiceKind::Playlist | ServiceKind::Tractor => {
                ids(&self.producers).chain(ids(&self.wrappers)).collect()
            }
            ServiceKind::Filter => ids(&self.filters).collect(),
            ServiceKind::Transition => ids(&self.transitions).collect(),
            ServiceKind::Consumer => Vec::new(),
        }
    }

    pub fn contains(&self, kind: ServiceKind, id: &str) -> bool {
        self.names(kind).contains(&id)
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert<T>(list: &mut Vec<(String, T)>, id: &str, ctor: T) {
    match list.iter_mut().find(|(name, _)| name == id) {
        Some(slot) => slot.1 = ctor,
        None => list.push((id.to_owned(), ctor)),
    }
}

fn find<'a, T>(list: &'a [(String, T)], kind: ServiceKind, id: &str) -> Result<&'a T> {
    list.iter()
        .find(|(name, _)| name == id)
        .map(|(_, ctor)| ctor)
        .ok_or_else(|| WeftError::NotFound(format!("{kind} service '{id}'")))
}
