use crate::models::intersection::{IntersectionId, RoadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vehicle count observed on one approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub intersection_id: IntersectionId,
    pub road_id: RoadId,
    pub vehicle_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl TrafficSample {
    pub fn new(intersection_id: u32, road_id: u32, vehicle_count: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            intersection_id: IntersectionId(intersection_id),
            road_id: RoadId(road_id),
            vehicle_count,
            timestamp,
        }
    }
}
