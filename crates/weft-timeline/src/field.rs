//! The planting table of a tractor.
//!
//! Every planting records the track index (or pair of indices) it applies
//! to. Inserting or removing tracks renumbers the table so plantings keep
//! following the tracks they were planted on.

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;
use weft_core::{Result, WeftError};

use crate::filter::Filter;
use crate::service::Service;
use crate::transition::Transition;

/// One entry of the field.
#[derive(Debug, Clone)]
pub enum Planting {
    Filter { filter: Filter, track: usize },
    Transition { transition: Transition, a: usize, b: usize },
}

impl Planting {
    /// Id of the planted service.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Filter { filter, .. } => filter.id(),
            Self::Transition { transition, .. } => transition.id(),
        }
    }

    /// Lowest and highest track index the planting touches.
    pub fn tracks(&self) -> (usize, usize) {
        match *self {
            Self::Filter { track, .. } => (track, track),
            Self::Transition { a, b, .. } => (a, b),
        }
    }

    /// A transition whose endpoints collapsed onto one track.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Transition { a, b, .. } if a == b)
    }
}

#[derive(Debug, Default)]
pub struct Field {
    plantings: RwLock<Vec<Planting>>,
}

impl Field {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_planted(plantings: &[Planting], id: Uuid) -> bool {
        plantings.iter().any(|p| p.id() == id)
    }

    /// Run `filter` on the frame of `track`.
    pub fn plant_filter(&self, filter: &Filter, track: usize) -> Result<()> {
        let mut plantings = self.plantings.write();
        if Self::is_planted(&plantings, filter.id()) {
            return Err(WeftError::InvalidParameter(format!(
                "Filter {} is already planted",
                filter.service_name()
            )));
        }
        plantings.push(Planting::Filter {
            filter: filter.clone(),
            track,
        });
        debug!(filter = filter.service_name(), track, "Filter planted");
        Ok(())
    }

    /// Combine track `b` into track `a` with `transition`.
    pub fn plant_transition(&self, transition: &Transition, a: usize, b: usize) -> Result<()> {
        if a == b {
            return Err(WeftError::InvalidParameter(format!(
                "Transition {} needs two distinct tracks, got {a} and {b}",
                transition.service_name()
            )));
        }
        let mut plantings = self.plantings.write();
        if Self::is_planted(&plantings, transition.id()) {
            return Err(WeftError::InvalidParameter(format!(
                "Transition {} is already planted",
                transition.service_name()
            )));
        }
        plantings.push(Planting::Transition {
            transition: transition.clone(),
            a,
            b,
        });
        debug!(transition = transition.service_name(), a, b, "Transition planted");
        Ok(())
    }

    /// Re-create a planting as recorded, degenerate transitions included.
    pub fn restore(&self, planting: Planting) -> Result<()> {
        let mut plantings = self.plantings.write();
        if Self::is_planted(&plantings, planting.id()) {
            return Err(WeftError::InvalidParameter(format!(
                "Service {} is already planted",
                planting.id()
            )));
        }
        plantings.push(planting);
        Ok(())
    }

    /// Remove the planting of the service with `id`.
    pub fn unplant(&self, id: Uuid) -> Option<Planting> {
        let mut plantings = self.plantings.write();
        let index = plantings.iter().position(|p| p.id() == id)?;
        Some(plantings.remove(index))
    }

    /// Snapshot in planting order.
    pub fn plantings(&self) -> Vec<Planting> {
        self.plantings.read().clone()
    }

    /// Planted filters with their track.
    pub fn filters(&self) -> Vec<(Filter, usize)> {
        self.plantings
            .read()
            .iter()
            .filter_map(|p| match p {
                Planting::Filter { filter, track } => Some((filter.clone(), *track)),
                Planting::Transition { .. } => None,
            })
            .collect()
    }

    /// Planted transitions ordered by `(a, b)`, ties kept in planting order.
    pub fn transitions(&self) -> Vec<(Transition, usize, usize)> {
        let mut transitions: Vec<_> = self
            .plantings
            .read()
            .iter()
            .filter_map(|p| match p {
                Planting::Transition { transition, a, b } => Some((transition.clone(), *a, *b)),
                Planting::Filter { .. } => None,
            })
            .collect();
        transitions.sort_by_key(|(_, a, b)| (*a, *b));
        transitions
    }

    pub fn len(&self) -> usize {
        self.plantings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plantings.read().is_empty()
    }

    /// A track was inserted at `index`: every index at or above it moves up.
    pub fn on_insert_track(&self, index: usize) {
        for planting in self.plantings.write().iter_mut() {
            match planting {
                Planting::Filter { track, .. } => {
                    if *track >= index {
                        *track += 1;
                    }
                }
                Planting::Transition { a, b, .. } => {
                    if *a >= index {
                        *a += 1;
                    }
                    if *b >= index {
                        *b += 1;
                    }
                }
            }
        }
    }

    /// Track `index` was removed.
    ///
    /// Filters above it move down; a filter on the removed track keeps its
    /// index. A transition is adjusted when `a > index` or `b >= index`: `a`
    /// moves down only when above, `b` always moves down. Transitions may end
    /// up with `a == b` and are left in place.
    pub fn on_remove_track(&self, index: usize) {
        for planting in self.plantings.write().iter_mut() {
            match planting {
                Planting::Filter { track, .. } => {
                    if *track > index {
                        *track -= 1;
                    }
                }
                Planting::Transition { transition, a, b } => {
                    if *a > index || *b >= index {
                        if *a > index {
                            *a -= 1;
                        }
                        *b = b.saturating_sub(1);
                        if a == b {
                            debug!(
                                transition = transition.service_name(),
                                track = *a,
                                "Transition left degenerate by track removal"
                            );
                        }
                    }
                }
            }
        }
    }
}
