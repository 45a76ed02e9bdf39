use crate::models::emergency::EmergencyTicket;
use crate::models::intersection::{IntersectionId, RoadId};

/// Failures surfaced by the signal control engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Emergency {active_id} is already active")]
    Conflict { active_id: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Timed out after {waited_ms}ms waiting for the signal state lock")]
    Concurrency { waited_ms: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The corridor is running, but its emergency log entry could not be written.
    #[error("Emergency {} is active but was not logged: {cause}", .ticket.event_id)]
    Unlogged {
        ticket: EmergencyTicket,
        #[source]
        cause: Box<ControlError>,
    },
}

impl ControlError {
    pub fn unknown_intersection(id: IntersectionId) -> Self {
        ControlError::Validation(format!("unknown intersection {}", id))
    }

    pub fn unknown_approach(intersection_id: IntersectionId, road_id: RoadId) -> Self {
        ControlError::Validation(format!(
            "road {} is not an approach of intersection {}",
            road_id, intersection_id
        ))
    }

    /// Transient errors are retried on the next scheduler cycle rather than reported as bugs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControlError::Persistence(_) | ControlError::Concurrency { .. }
        )
    }

    // Set when a trigger was accepted despite the error.
    pub fn ticket(&self) -> Option<&EmergencyTicket> {
        match self {
            ControlError::Unlogged { ticket, .. } => Some(ticket),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
