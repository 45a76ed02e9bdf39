use crate::models::intersection::IntersectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmergencyStatus {
    Active,
    Cleared,
}

impl fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EmergencyStatus::Active => write!(f, "ACTIVE"),
            EmergencyStatus::Cleared => write!(f, "CLEARED"),
        }
    }
}

/// Why an emergency left the ACTIVE state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    Explicit,
    AutoTimeout,
    Shutdown,
}

/// A green corridor request and its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub id: u64,
    /// Intersections the corridor opens, in travel order.
    pub route: Vec<IntersectionId>,
    /// Free-form label, e.g. "AMBULANCE".
    pub emergency_type: String,
    pub status: EmergencyStatus,
    pub created_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

/// Predefined corridor between two intersections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyRoute {
    pub route_id: u32,
    pub name: String,
    pub start: IntersectionId,
    pub end: IntersectionId,
    pub path: Vec<IntersectionId>,
}

/// Returned to the caller once a trigger has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyTicket {
    pub event_id: u64,
    pub path: Vec<IntersectionId>,
}
