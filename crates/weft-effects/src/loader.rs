//! Rebuild a service graph from a [`Document`].

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use weft_core::{Result, SharedProfile, WeftError};
use weft_timeline::prelude::*;
use weft_timeline::{
    Document, EntryNode, Filter, NodeKind, Planting, Playlist, Producer, ServiceNode, Tractor,
    Transition,
};

use crate::repository::Repository;

/// A rebuilt node.
enum Built {
    Producer(Producer),
    Filter(Filter),
    Transition(Transition),
}

/// Turns documents back into live graphs through a [`Repository`].
///
/// Nodes are built in document order, so every reference resolves to a
/// service built earlier.
pub struct Loader<'a> {
    repository: &'a Repository,
}

impl<'a> Loader<'a> {
    pub fn new(repository: &'a Repository) -> Self {
        Self { repository }
    }

    /// Build the graph and return its root producer.
    pub fn load(&self, document: &Document) -> Result<Producer> {
        let profile = document.profile.clone().shared();
        let mut built: HashMap<&str, Built> = HashMap::with_capacity(document.services.len());

        for node in &document.services {
            let service = self.build(node, &profile, &built)?;
            match &service {
                Built::Producer(p) => self.finish(node, p, &built)?,
                Built::Filter(f) => self.finish(node, f, &built)?,
                Built::Transition(t) => self.finish(node, t, &built)?,
            }
            built.insert(node.id.as_str(), service);
        }

        let root = producer(&built, &document.root)?;
        info!(
            services = document.services.len(),
            root = root.service_name(),
            "Document loaded"
        );
        Ok(root)
    }

    pub fn load_json(&self, data: &[u8]) -> Result<Producer> {
        self.load(&Document::from_json(data)?)
    }

    pub fn load_file(&self, path: &Path) -> Result<Producer> {
        self.load(&Document::load_from_file(path)?)
    }

    fn build(
        &self,
        node: &ServiceNode,
        profile: &SharedProfile,
        built: &HashMap<&str, Built>,
    ) -> Result<Built> {
        let repo = self.repository;
        let arg = node.property("resource");
        debug!(id = %node.id, kind = ?node.kind, service = %node.service, "Building service");
        Ok(match node.kind {
            NodeKind::Producer => Built::Producer(match &node.wrapped {
                Some(inner) => {
                    let inner = producer(built, inner)?;
                    repo.create_wrapper(profile.clone(), &node.service, inner, arg)?
                }
                None => repo.create_producer(profile.clone(), &node.service, arg)?,
            }),
            NodeKind::Cut => {
                let parent_id = node.parent.as_deref().ok_or_else(|| {
                    WeftError::Serialization(format!("Cut {} has no parent", node.id))
                })?;
                let parent = producer(built, parent_id)?;
                let in_point = position(node, "in")?.unwrap_or(0);
                let out_point = position(node, "out")?.unwrap_or_else(|| parent.get_length() - 1);
                Built::Producer(parent.cut(in_point, out_point)?)
            }
            NodeKind::Playlist => {
                let playlist = Playlist::new(profile.clone());
                for entry in &node.entries {
                    match entry {
                        EntryNode::Blank { length } => playlist.blank(*length)?,
                        EntryNode::Clip { producer: id, repeat } => {
                            playlist.append(&producer(built, id)?)?;
                            if *repeat > 1 {
                                playlist.repeat_clip(playlist.count() - 1, *repeat)?;
                            }
                        }
                    }
                }
                Built::Producer(playlist.producer().clone())
            }
            NodeKind::Tractor => {
                let tractor = Tractor::new(profile.clone());
                for (index, track) in node.tracks.iter().enumerate() {
                    match track {
                        Some(id) => tractor.set_track(&producer(built, id)?, index)?,
                        None => tractor.insert_track(None, index)?,
                    }
                }
                for planting in &node.plantings {
                    let planting = match planting.track_b {
                        Some(b) => Planting::Transition {
                            transition: transition(built, &planting.service)?,
                            a: planting.track_a,
                            b,
                        },
                        None => Planting::Filter {
                            filter: filter(built, &planting.service)?,
                            track: planting.track_a,
                        },
                    };
                    tractor.restore_planting(planting)?;
                }
                Built::Producer(tractor.producer().clone())
            }
            NodeKind::Filter => Built::Filter(repo.create_filter(profile.clone(), &node.service, arg)?),
            NodeKind::Transition => {
                Built::Transition(repo.create_transition(profile.clone(), &node.service, arg)?)
            }
        })
    }

    /// Copy the recorded properties and attach the recorded filters.
    fn finish(&self, node: &ServiceNode, service: &dyn Service, built: &HashMap<&str, Built>) -> Result<()> {
        {
            let _guard = service.lock();
            for (key, value) in &node.properties {
                service.properties().set_string(key, value.as_str());
            }
        }
        for id in &node.filters {
            service.attach(&filter(built, id)?)?;
        }
        Ok(())
    }
}

fn position(node: &ServiceNode, key: &str) -> Result<Option<i64>> {
    node.property(key)
        .map(|text| {
            text.trim().parse::<i64>().map_err(|_| {
                WeftError::Serialization(format!("{} has invalid {key} '{text}'", node.id))
            })
        })
        .transpose()
}

fn lookup<'m>(built: &'m HashMap<&str, Built>, id: &str) -> Result<&'m Built> {
    built
        .get(id)
        .ok_or_else(|| WeftError::Serialization(format!("Unknown service {id}")))
}

fn producer(built: &HashMap<&str, Built>, id: &str) -> Result<Producer> {
    match lookup(built, id)? {
        Built::Producer(p) => Ok(p.clone()),
        _ => Err(WeftError::Serialization(format!("{id} is not a producer"))),
    }
}

fn filter(built: &HashMap<&str, Built>, id: &str) -> Result<Filter> {
    match lookup(built, id)? {
        Built::Filter(f) => Ok(f.clone()),
        _ => Err(WeftError::Serialization(format!("{id} is not a filter"))),
    }
}

fn transition(built: &HashMap<&str, Built>, id: &str) -> Result<Transition> {
    match lookup(built, id)? {
        Built::Transition(t) => Ok(t.clone()),
        _ => Err(WeftError::Serialization(format!("{id} is not a transition"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Brightness, Greyscale, Volume};
    use crate::producers::{Bars, Colour, Timewarp, Tone};
    use crate::transitions::{Dissolve, Wipe};
    use weft_core::{FrameRate, ImageRequest, Profile};

    fn profile() -> SharedProfile {
        Profile::preview(8, 4, FrameRate::FPS_25).shared()
    }

    /// Two tracks: a playlist with a mix and a split, and a warped tone
    /// with a fade, joined by a wipe.
    fn graph(repo: &Repository) -> Tractor {
        let p = profile();
        let red = Colour::producer(p.clone(), Some("red")).unwrap();
        let bars = Bars::producer(p.clone());
        bars.attach(&Greyscale::filter(p.clone())).unwrap();

        let video = Playlist::new(p.clone());
        video.append_io(&red, 0, 49).unwrap();
        video.append_io(&bars, 10, 59).unwrap();
        video.blank(5).unwrap();
        video.append_io(&red, 100, 109).unwrap();
        video.repeat_clip(3, 3).unwrap();
        video.mix(0, Some(10), None).unwrap();
        video.split(2, 20).unwrap();

        let tone = Tone::producer(p.clone(), repo.sine_table(), Some("440")).unwrap();
        let slow = Timewarp::producer(p.clone(), tone, Some("0.5")).unwrap();
        let fade = Volume::filter(p.clone(), Some("0=0;24=1"));
        fade.set_in_and_out(0, 24);
        slow.attach(&fade).unwrap();

        let tractor = Tractor::new(p.clone());
        tractor.set_track(video.producer(), 0).unwrap();
        tractor.set_track(&slow, 1).unwrap();
        tractor.insert_track(None, 2).unwrap();
        let wipe = Wipe::transition(p.clone(), Some("down")).unwrap();
        wipe.set_in_and_out(0, 30);
        tractor.plant_transition(&wipe, 0, 1).unwrap();
        let glow = Brightness::filter(p.clone(), Some("1.2"));
        tractor.plant_filter(&glow, 0).unwrap();
        tractor
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let repo = Repository::new();
        let tractor = graph(&repo);
        let saved = Document::from_producer(&tractor);

        let json = saved.to_json().unwrap();
        let loaded = Loader::new(&repo).load_json(&json).unwrap();
        let again = Document::from_producer(&loaded);
        assert_eq!(again.canonical(), saved.canonical());
        assert_eq!(loaded.get_length(), tractor.get_length());
    }

    #[test]
    fn test_loaded_graph_renders_like_original() {
        let repo = Repository::new();
        let tractor = graph(&repo);
        let loaded = Loader::new(&repo)
            .load(&Document::from_producer(&tractor))
            .unwrap();
        let req = ImageRequest::rgba(0, 0);
        for position in [0, 15, 45, 70, 90] {
            let a = tractor.frame_at(position).unwrap().get_image(&req).unwrap();
            let b = loaded.frame_at(position).unwrap().get_image(&req).unwrap();
            assert_eq!(a, b, "frame {position} differs");
        }
    }

    #[test]
    fn test_degenerate_planting_survives() {
        let repo = Repository::new();
        let tractor = graph(&repo);
        let dissolve = Dissolve::transition(profile());
        tractor.plant_transition(&dissolve, 1, 2).unwrap();
        tractor.remove_track(2).unwrap();
        let saved = Document::from_producer(&tractor);
        let loaded = Loader::new(&repo).load(&saved).unwrap();
        let rebuilt = Tractor::from_producer(&loaded).unwrap();
        assert!(rebuilt.plantings().iter().any(Planting::is_degenerate));
        assert_eq!(Document::from_producer(&loaded).canonical(), saved.canonical());
    }

    #[test]
    fn test_unknown_service_fails() {
        let repo = Repository::new();
        let red = Colour::producer(profile(), Some("red")).unwrap();
        let mut doc = Document::from_producer(&red);
        doc.services[0].service = "avformat".into();
        let err = Loader::new(&repo).load(&doc).unwrap_err();
        assert!(matches!(err, WeftError::NotFound(_)));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let repo = Repository::new();
        let red = Colour::producer(profile(), Some("red")).unwrap();
        red.attach(&Greyscale::filter(profile())).unwrap();
        let mut doc = Document::from_producer(&red);
        // the filter node comes first; rebuild it as a producer instead
        assert_eq!(doc.services[0].kind, NodeKind::Filter);
        doc.services[0].kind = NodeKind::Producer;
        doc.services[0].service = "bars".into();
        let err = Loader::new(&repo).load(&doc).unwrap_err();
        assert!(matches!(err, WeftError::Serialization(_)));
    }
}
