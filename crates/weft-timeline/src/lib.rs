//! Weft Timeline - Services and composition
//!
//! Implements the service graph that turns sources into one frame stream:
//! - Producers with in/out, speed, end-of-file policy and cuts
//! - Filters and transitions that wrap a frame's pending work
//! - Playlists sequencing clips and blanks
//! - Multitracks and tractors merging parallel tracks through a field
//! - Documents describing a graph for persistence

pub mod field;
pub mod filter;
pub mod multitrack;
pub mod playlist;
pub mod producer;
pub mod serialization;
pub mod service;
pub mod tractor;
pub mod transition;

pub use field::{Field, Planting};
pub use filter::{Filter, FilterImpl};
pub use multitrack::{Multitrack, Whence};
pub use playlist::{ClipInfo, Entry, Playlist, PlaylistEntry};
pub use producer::{EofPolicy, Producer, ProducerImpl, EOS};
pub use serialization::{Document, EntryNode, NodeKind, PlantingNode, ServiceNode};
pub use service::{Service, ServiceBase, ServiceKind};
pub use tractor::{Tractor, HIDE_AUDIO, HIDE_VIDEO};
pub use transition::{share_frame, Dissolve, Transition, TransitionImpl};

/// Traits needed to drive services.
pub mod prelude {
    pub use crate::filter::FilterImpl;
    pub use crate::producer::ProducerImpl;
    pub use crate::service::Service;
    pub use crate::transition::TransitionImpl;
}
