// src/shared_data.rs

use crate::models::emergency::{EmergencyEvent, EmergencyStatus};
use crate::models::intersection::{Direction, IntersectionId, RoadId};
use crate::models::signal::{ApproachSignal, SignalColor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which writer produced a signal batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSource {
    Scheduler,
    Corridor,
}

/// Committed signal state of one intersection, handed to the repository mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalBatch {
    pub intersection_id: IntersectionId,
    pub source: BatchSource,
    pub committed_at: DateTime<Utc>,
    pub approaches: Vec<ApproachSignal>,
}

impl SignalBatch {
    pub fn green_road(&self) -> Option<RoadId> {
        self.approaches
            .iter()
            .find(|a| a.state.is_green())
            .map(|a| a.road_id)
    }

    /// Flattens the batch into csv rows, one per approach.
    pub fn to_records(&self) -> Vec<SignalStateRecord> {
        self.approaches
            .iter()
            .map(|a| SignalStateRecord {
                committed_at: self.committed_at,
                source: self.source,
                intersection_id: a.intersection_id,
                road_id: a.road_id,
                direction: a.direction,
                signal_color: a.state.signal_color,
                green_time: a.state.green_time,
            })
            .collect()
    }
}

/// Csv row for `signal_state.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStateRecord {
    pub committed_at: DateTime<Utc>,
    pub source: BatchSource,
    pub intersection_id: IntersectionId,
    pub road_id: RoadId,
    pub direction: Direction,
    pub signal_color: SignalColor,
    pub green_time: u32,
}

/// Csv row for `emergency_log.csv`. Status changes are appended, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyLogRecord {
    pub event_id: u64,
    pub emergency_type: String,
    /// Route as "1>2>3".
    pub route: String,
    pub status: EmergencyStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub changed_at: DateTime<Utc>,
}

impl EmergencyLogRecord {
    pub fn opened(event: &EmergencyEvent) -> Self {
        Self {
            event_id: event.id,
            emergency_type: event.emergency_type.clone(),
            route: format_route(&event.route),
            status: event.status,
            created_at: Some(event.created_at),
            changed_at: event.created_at,
        }
    }

    pub fn status_change(event_id: u64, status: EmergencyStatus, at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            emergency_type: String::new(),
            route: String::new(),
            status,
            created_at: None,
            changed_at: at,
        }
    }
}

pub fn format_route(route: &[IntersectionId]) -> String {
    route
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(">")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_route() {
        let route = vec![IntersectionId(1), IntersectionId(2), IntersectionId(3)];
        assert_eq!(format_route(&route), "1>2>3");
        assert_eq!(format_route(&[]), "");
    }
}
