use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Catalog identifier of an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntersectionId(pub u32);

/// Catalog identifier of a road feeding one or more intersections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoadId(pub u32);

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side of the intersection a road arrives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

/// One (intersection, road, direction) triple under independent signal control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Approach {
    pub intersection_id: IntersectionId,
    pub road_id: RoadId,
    pub direction: Direction,
}

/// A road attached to an intersection, as listed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachRoad {
    pub road_id: RoadId,
    pub road_name: String,
    pub direction: Direction,
}

/// Represents a signalised intersection (node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intersection {
    /// Unique identifier for the intersection.
    pub id: IntersectionId,
    /// Human readable name, e.g. "Main St & 5th Ave".
    pub name: String,
    /// Roads in registration order. Order breaks ties in the scheduler.
    pub approaches: Vec<ApproachRoad>,
}

impl Intersection {
    pub fn new(id: u32, name: &str, approaches: Vec<(u32, &str, Direction)>) -> Self {
        Self {
            id: IntersectionId(id),
            name: name.to_string(),
            approaches: approaches
                .into_iter()
                .map(|(road_id, road_name, direction)| ApproachRoad {
                    road_id: RoadId(road_id),
                    road_name: road_name.to_string(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn has_road(&self, road_id: RoadId) -> bool {
        self.approaches.iter().any(|a| a.road_id == road_id)
    }

    /// Approaches of this intersection in registration order.
    pub fn approach_keys(&self) -> impl Iterator<Item = Approach> + '_ {
        self.approaches.iter().map(move |road| Approach {
            intersection_id: self.id,
            road_id: road.road_id,
            direction: road.direction,
        })
    }
}

/// Static intersection catalog, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct IntersectionCatalog {
    intersections: Vec<Intersection>,
    index: HashMap<IntersectionId, usize>,
}

impl IntersectionCatalog {
    /// Builds the catalog. A repeated intersection id keeps its first registration.
    pub fn new(intersections: Vec<Intersection>) -> Self {
        let mut kept = Vec::with_capacity(intersections.len());
        let mut index = HashMap::new();
        for intersection in intersections {
            if index.contains_key(&intersection.id) {
                log::warn!(
                    "Duplicate intersection {} in catalog, keeping first registration",
                    intersection.id
                );
                continue;
            }
            index.insert(intersection.id, kept.len());
            kept.push(intersection);
        }
        Self {
            intersections: kept,
            index,
        }
    }

    pub fn get(&self, id: IntersectionId) -> Option<&Intersection> {
        self.index.get(&id).map(|&i| &self.intersections[i])
    }

    pub fn contains(&self, id: IntersectionId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn has_approach(&self, intersection_id: IntersectionId, road_id: RoadId) -> bool {
        self.get(intersection_id)
            .map(|i| i.has_road(road_id))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intersection> {
        self.intersections.iter()
    }

    /// Every approach across the catalog, intersection by intersection.
    pub fn approaches(&self) -> impl Iterator<Item = Approach> + '_ {
        self.intersections.iter().flat_map(|i| i.approach_keys())
    }

    pub fn len(&self) -> usize {
        self.intersections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intersections.is_empty()
    }
}
