//! Graph documents with versioning and migration.
//!
//! A [`Document`] lists every service reachable from a root producer, each
//! once, children before parents. Services refer to each other by id.
//! Rebuilding a graph needs a factory and lives in `weft-effects`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;
use weft_core::{Profile, Result, WeftError};

use crate::field::Planting;
use crate::filter::Filter;
use crate::playlist::{Entry, Playlist};
use crate::producer::Producer;
use crate::service::Service;
use crate::tractor::Tractor;
use crate::transition::Transition;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// What a node rebuilds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Producer,
    Cut,
    Playlist,
    Tractor,
    Filter,
    Transition,
}

/// A playlist slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryNode {
    Blank { length: i64 },
    Clip { producer: String, repeat: usize },
}

/// A field planting. Filters have no `track_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantingNode {
    pub service: String,
    pub track_a: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_b: Option<usize>,
}

/// One service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub kind: NodeKind,
    /// Factory id
    pub service: String,
    /// Text form of every public property, in store order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<(String, String)>,
    /// Attached filters, in attachment order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    /// Source of a cut
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Producer inside a wrapping producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plantings: Vec<PlantingNode>,
}

impl ServiceNode {
    fn new(id: Uuid, kind: NodeKind, service: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            service: service.to_owned(),
            properties: Vec::new(),
            filters: Vec::new(),
            parent: None,
            wrapped: None,
            entries: Vec::new(),
            tracks: Vec::new(),
            plantings: Vec::new(),
        }
    }

    /// Value of property `key`.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Versioned graph description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Schema version for migration.
    pub version: u32,
    /// Crate version that wrote this document.
    pub app_version: String,
    pub profile: Profile,
    /// Id of the producer to play
    pub root: String,
    pub services: Vec<ServiceNode>,
}

/// Depth-first walk emitting each service after everything it refers to.
#[derive(Default)]
struct Collector {
    seen: HashSet<Uuid>,
    nodes: Vec<ServiceNode>,
}

impl Collector {
    fn properties(service: &dyn Service) -> Vec<(String, String)> {
        service
            .properties()
            .to_pairs()
            .into_iter()
            .filter(|(k, _)| !k.starts_with('_') && k != "service")
            .collect()
    }

    fn filters(&mut self, service: &dyn Service) -> Vec<String> {
        service
            .base()
            .filters()
            .iter()
            .map(|f| self.filter(f))
            .collect()
    }

    fn filter(&mut self, filter: &Filter) -> String {
        let id = filter.id();
        if self.seen.insert(id) {
            let mut node = ServiceNode::new(id, NodeKind::Filter, filter.service_name());
            node.properties = Self::properties(filter);
            node.filters = self.filters(filter);
            self.nodes.push(node);
        }
        id.to_string()
    }

    fn transition(&mut self, transition: &Transition) -> String {
        let id = transition.id();
        if self.seen.insert(id) {
            let mut node = ServiceNode::new(id, NodeKind::Transition, transition.service_name());
            node.properties = Self::properties(transition);
            self.nodes.push(node);
        }
        id.to_string()
    }

    fn producer(&mut self, producer: &Producer) -> String {
        let id = producer.id();
        if !self.seen.insert(id) {
            return id.to_string();
        }
        let mut node = if let Some(parent) = producer.parent() {
            let mut node = ServiceNode::new(id, NodeKind::Cut, producer.service_name());
            node.parent = Some(self.producer(&parent));
            node
        } else if let Some(playlist) = Playlist::from_producer(producer) {
            let mut node = ServiceNode::new(id, NodeKind::Playlist, producer.service_name());
            for slot in playlist.entries() {
                node.entries.push(match &slot.entry {
                    Entry::Blank(length) => EntryNode::Blank { length: *length },
                    Entry::Clip(clip) => EntryNode::Clip {
                        producer: self.producer(clip),
                        repeat: slot.repeat,
                    },
                });
            }
            node
        } else if let Some(tractor) = Tractor::from_producer(producer) {
            let mut node = ServiceNode::new(id, NodeKind::Tractor, producer.service_name());
            node.tracks = tractor
                .multitrack()
                .tracks()
                .iter()
                .map(|t| t.as_ref().map(|p| self.producer(p)))
                .collect();
            node.plantings = tractor
                .plantings()
                .iter()
                .map(|planting| match planting {
                    Planting::Filter { filter, track } => PlantingNode {
                        service: self.filter(filter),
                        track_a: *track,
                        track_b: None,
                    },
                    Planting::Transition { transition, a, b } => PlantingNode {
                        service: self.transition(transition),
                        track_a: *a,
                        track_b: Some(*b),
                    },
                })
                .collect();
            node
        } else {
            let mut node = ServiceNode::new(id, NodeKind::Producer, producer.service_name());
            node.wrapped = producer.generator().wrapped().map(|inner| self.producer(&inner));
            node
        };
        node.properties = Self::properties(producer);
        node.filters = self.filters(producer);
        self.nodes.push(node);
        id.to_string()
    }
}

impl Document {
    /// Describe the graph reachable from `root`.
    pub fn from_producer(root: &Producer) -> Self {
        let mut collector = Collector::default();
        let root_id = collector.producer(root);
        Self {
            version: CURRENT_VERSION,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            profile: Profile::clone(root.profile()),
            root: root_id,
            services: collector.nodes,
        }
    }

    pub fn node(&self, id: &str) -> Option<&ServiceNode> {
        self.services.iter().find(|n| n.id == id)
    }

    /// The same document with ids replaced by their node order (`n0`, `n1`,
    /// ...), so two descriptions of equal graphs compare equal.
    pub fn canonical(&self) -> Self {
        let names: HashMap<&str, String> = self
            .services
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), format!("n{i}")))
            .collect();
        let rename = |id: &String| names.get(id.as_str()).cloned().unwrap_or_else(|| id.clone());
        let services = self
            .services
            .iter()
            .map(|n| ServiceNode {
                id: rename(&n.id),
                filters: n.filters.iter().map(rename).collect(),
                parent: n.parent.as_ref().map(rename),
                wrapped: n.wrapped.as_ref().map(rename),
                entries: n
                    .entries
                    .iter()
                    .map(|e| match e {
                        EntryNode::Clip { producer, repeat } => EntryNode::Clip {
                            producer: rename(producer),
                            repeat: *repeat,
                        },
                        blank => blank.clone(),
                    })
                    .collect(),
                tracks: n.tracks.iter().map(|t| t.as_ref().map(rename)).collect(),
                plantings: n
                    .plantings
                    .iter()
                    .map(|p| PlantingNode {
                        service: rename(&p.service),
                        ..p.clone()
                    })
                    .collect(),
                ..n.clone()
            })
            .collect();
        Self {
            root: rename(&self.root),
            services,
            ..self.clone()
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| WeftError::Serialization(format!("Failed to serialize document: {}", e)))
    }

    /// Deserialize from JSON bytes, applying migrations if needed.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| WeftError::Serialization(format!("Invalid JSON: {}", e)))?;

        let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        if version > CURRENT_VERSION {
            return Err(WeftError::Serialization(format!(
                "Document version {} is newer than supported version {}",
                version, CURRENT_VERSION
            )));
        }

        let migrated = migrate(raw, version)?;
        let document: Self = serde_json::from_value(migrated)
            .map_err(|e| WeftError::Serialization(format!("Failed to parse document: {}", e)))?;
        document.validate()?;
        Ok(document)
    }

    /// Every reference names an earlier node.
    fn validate(&self) -> Result<()> {
        let mut known = HashSet::new();
        let missing = |what: &str, id: &str| {
            WeftError::Serialization(format!("{what} refers to unknown service {id}"))
        };
        for node in &self.services {
            let refs = node
                .filters
                .iter()
                .chain(node.parent.iter())
                .chain(node.wrapped.iter())
                .chain(node.tracks.iter().flatten())
                .chain(node.plantings.iter().map(|p| &p.service))
                .chain(node.entries.iter().filter_map(|e| match e {
                    EntryNode::Clip { producer, .. } => Some(producer),
                    EntryNode::Blank { .. } => None,
                }));
            for id in refs {
                if !known.contains(id.as_str()) {
                    return Err(missing(node.id.as_str(), id.as_str()));
                }
            }
            known.insert(node.id.as_str());
        }
        if !known.contains(self.root.as_str()) {
            return Err(missing("root", self.root.as_str()));
        }
        Ok(())
    }

    /// Save to a file path.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        let data = self.to_json()?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load from a file path.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data)
    }
}

/// Apply sequential migrations from `from_version` to CURRENT_VERSION.
fn migrate(mut data: serde_json::Value, from_version: u32) -> Result<serde_json::Value> {
    let mut version = from_version;

    while version < CURRENT_VERSION {
        match version {
            0 => {
                // v0 → v1: bare service list without header
                if let Some(services) = data.get("services").cloned() {
                    let root = data
                        .get("root")
                        .cloned()
                        .or_else(|| {
                            services
                                .as_array()
                                .and_then(|s| s.last())
                                .and_then(|n| n.get("id"))
                                .cloned()
                        })
                        .unwrap_or(serde_json::Value::Null);
                    let profile = data.get("profile").cloned().unwrap_or_else(|| {
                        serde_json::to_value(Profile::default()).unwrap_or_default()
                    });
                    data = serde_json::json!({
                        "version": 1,
                        "app_version": "0.0.0",
                        "profile": profile,
                        "root": root,
                        "services": services,
                    });
                }
                version = 1;
            }
            _ => {
                return Err(WeftError::Serialization(format!(
                    "No migration path from version {}",
                    version
                )));
            }
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::*;
    use crate::transition::Dissolve;

    fn sample() -> Tractor {
        let tractor = Tractor::new(profile());
        let pl = Playlist::new(profile());
        let a = clip("a", 100);
        pl.blank(10).unwrap();
        pl.append_io(&a, 0, 19).unwrap();
        pl.append_io(&a, 40, 49).unwrap();
        pl.repeat_clip(2, 2).unwrap();
        tractor.set_track(pl.producer(), 0).unwrap();
        tractor.set_track(&clip("b", 30), 1).unwrap();
        let t = Dissolve::transition(profile());
        t.set_in_and_out(0, 9);
        tractor.plant_transition(&t, 0, 1).unwrap();
        tractor
    }

    #[test]
    fn test_children_precede_parents() {
        let doc = Document::from_producer(sample().producer());
        assert_eq!(doc.services.last().unwrap().id, doc.root);
        assert_eq!(doc.node(&doc.root).unwrap().kind, NodeKind::Tractor);
        doc.validate().unwrap();
    }

    #[test]
    fn test_shared_source_listed_once() {
        let doc = Document::from_producer(sample().producer());
        let a_nodes = doc
            .services
            .iter()
            .filter(|n| n.kind == NodeKind::Producer && n.service == "a")
            .count();
        assert_eq!(a_nodes, 1);
        let cuts = doc.services.iter().filter(|n| n.kind == NodeKind::Cut).count();
        assert_eq!(cuts, 2);
    }

    #[test]
    fn test_playlist_and_plantings_described() {
        let doc = Document::from_producer(sample().producer());
        let root = doc.node(&doc.root).unwrap();
        assert_eq!(root.tracks.len(), 2);
        assert_eq!(root.plantings[0].track_a, 0);
        assert_eq!(root.plantings[0].track_b, Some(1));

        let playlist = doc.node(root.tracks[0].as_ref().unwrap()).unwrap();
        assert_eq!(playlist.kind, NodeKind::Playlist);
        assert_eq!(playlist.entries[0], EntryNode::Blank { length: 10 });
        let EntryNode::Clip { producer, repeat } = &playlist.entries[2] else {
            panic!("expected a clip");
        };
        assert_eq!(*repeat, 2);
        let cut = doc.node(producer).unwrap();
        assert_eq!(cut.property("in"), Some("40"));
        assert_eq!(cut.property("out"), Some("49"));
    }

    #[test]
    fn test_json_roundtrip() {
        let doc = Document::from_producer(sample().producer());
        let json = doc.to_json().unwrap();
        let loaded = Document::from_json(&json).unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.version, CURRENT_VERSION);
    }

    #[test]
    fn test_canonical_ignores_ids() {
        let a = Document::from_producer(sample().producer()).canonical();
        let b = Document::from_producer(sample().producer()).canonical();
        assert_eq!(a.services, b.services);
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn test_migration_v0() {
        let doc = Document::from_producer(&clip("a", 10));
        let raw = serde_json::json!({ "services": doc.services });
        let loaded = Document::from_json(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.root, doc.root);
    }

    #[test]
    fn test_future_version_rejected() {
        let json = serde_json::json!({
            "version": 999,
            "services": [],
        });
        let data = serde_json::to_vec(&json).unwrap();
        assert!(Document::from_json(&data).is_err());
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let mut doc = Document::from_producer(sample().producer());
        doc.services.remove(0);
        let json = doc.to_json().unwrap();
        assert!(Document::from_json(&json).is_err());
    }
}
