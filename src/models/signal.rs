use crate::models::intersection::{Approach, Direction, IntersectionId, RoadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The possible states for an approach signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalColor {
    Red,
    Green,
}

/// Live signal state of a single approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachState {
    pub signal_color: SignalColor,
    /// Seconds of green granted; always 0 while red.
    pub green_time: u32,
    pub last_updated: DateTime<Utc>,
}

impl ApproachState {
    pub fn red(at: DateTime<Utc>) -> Self {
        Self {
            signal_color: SignalColor::Red,
            green_time: 0,
            last_updated: at,
        }
    }

    pub fn green(green_time: u32, at: DateTime<Utc>) -> Self {
        Self {
            signal_color: SignalColor::Green,
            green_time,
            last_updated: at,
        }
    }

    pub fn is_green(&self) -> bool {
        self.signal_color == SignalColor::Green
    }
}

/// One row of a signal snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachSignal {
    pub intersection_id: IntersectionId,
    pub road_id: RoadId,
    pub direction: Direction,
    #[serde(flatten)]
    pub state: ApproachState,
}

impl ApproachSignal {
    pub fn new(approach: Approach, state: ApproachState) -> Self {
        Self {
            intersection_id: approach.intersection_id,
            road_id: approach.road_id,
            direction: approach.direction,
            state,
        }
    }
}

/// A consistent read of every approach, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub taken_at: DateTime<Utc>,
    pub approaches: Vec<ApproachSignal>,
}

impl SignalSnapshot {
    pub fn state_of(&self, intersection_id: IntersectionId, road_id: RoadId) -> Option<ApproachState> {
        self.approaches
            .iter()
            .find(|a| a.intersection_id == intersection_id && a.road_id == road_id)
            .map(|a| a.state)
    }

    pub fn intersection(&self, intersection_id: IntersectionId) -> impl Iterator<Item = &ApproachSignal> {
        self.approaches
            .iter()
            .filter(move |a| a.intersection_id == intersection_id)
    }

    /// Number of green approaches at an intersection.
    pub fn green_count(&self, intersection_id: IntersectionId) -> usize {
        self.intersection(intersection_id)
            .filter(|a| a.state.is_green())
            .count()
    }

    pub fn is_all_red(&self, intersection_id: IntersectionId) -> bool {
        self.intersection(intersection_id)
            .all(|a| !a.state.is_green() && a.state.green_time == 0)
    }
}
