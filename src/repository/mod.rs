pub mod csv_mirror;
pub mod memory;

pub use csv_mirror::CsvMirrorRepository;
pub use memory::{InMemoryRepository, SeedData};

use crate::error::Result;
use crate::models::emergency::{EmergencyEvent, EmergencyRoute, EmergencyStatus};
use crate::models::intersection::{Intersection, IntersectionId};
use crate::models::traffic::TrafficSample;
use crate::shared_data::SignalBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence and catalog collaborator of the control engine.
///
/// Every write may fail with `ControlError::Persistence`; the engine treats
/// the repository as a mirror and never lets a failure here stall live control.
#[async_trait]
pub trait TrafficRepository: Send + Sync {
    /// Intersection catalog in registration order.
    async fn fetch_intersections(&self) -> Result<Vec<Intersection>>;

    /// Current per-approach vehicle counts.
    async fn fetch_approach_traffic(&self) -> Result<Vec<TrafficSample>>;

    async fn fetch_predefined_route(
        &self,
        start: IntersectionId,
        end: IntersectionId,
    ) -> Result<Option<Vec<IntersectionId>>>;

    async fn fetch_emergency_routes(&self) -> Result<Vec<EmergencyRoute>>;

    async fn record_traffic_sample(&self, sample: TrafficSample) -> Result<()>;

    async fn persist_signal_state(&self, batch: &SignalBatch) -> Result<()>;

    async fn append_emergency_log(&self, event: &EmergencyEvent) -> Result<()>;

    async fn update_emergency_log(
        &self,
        event_id: u64,
        status: EmergencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;
}
