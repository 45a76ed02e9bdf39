use crate::error::{ControlError, Result};
use crate::models::emergency::{EmergencyEvent, EmergencyRoute, EmergencyStatus};
use crate::models::intersection::{Intersection, IntersectionId};
use crate::models::traffic::TrafficSample;
use crate::repository::TrafficRepository;
use crate::shared_data::SignalBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Initial repository contents, usually read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub intersections: Vec<Intersection>,
    pub routes: Vec<EmergencyRoute>,
    pub samples: Vec<TrafficSample>,
}

/// A status change applied to an emergency log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyLogUpdate {
    pub event_id: u64,
    pub status: EmergencyStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Failures {
    fetch_traffic: bool,
    persist_all: bool,
    persist_for: HashSet<IntersectionId>,
    emergency_log: bool,
    emergency_log_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct RepositoryState {
    intersections: Vec<Intersection>,
    routes: Vec<EmergencyRoute>,
    samples: Vec<TrafficSample>,
    batches: Vec<SignalBatch>,
    emergency_log: Vec<EmergencyEvent>,
    log_updates: Vec<EmergencyLogUpdate>,
    failures: Failures,
}

/// Process-local repository. Used by the demo binary and as a test double,
/// with switchable failures for the persistence paths.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryRepository {
    pub fn new(seed: SeedData) -> Self {
        Self {
            state: Mutex::new(RepositoryState {
                intersections: seed.intersections,
                routes: seed.routes,
                samples: seed.samples,
                ..RepositoryState::default()
            }),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let seed: SeedData = serde_json::from_str(json)
            .map_err(|e| ControlError::Config(format!("invalid seed data: {}", e)))?;
        Ok(Self::new(seed))
    }

    fn state(&self) -> Result<MutexGuard<'_, RepositoryState>> {
        self.state
            .lock()
            .map_err(|_| ControlError::Persistence("in-memory repository lock poisoned".to_string()))
    }

    pub fn fail_traffic_fetch(&self, fail: bool) {
        if let Ok(mut state) = self.state() {
            state.failures.fetch_traffic = fail;
        }
    }

    pub fn fail_all_persistence(&self, fail: bool) {
        if let Ok(mut state) = self.state() {
            state.failures.persist_all = fail;
        }
    }

    pub fn fail_persistence_for(&self, intersection_id: IntersectionId) {
        if let Ok(mut state) = self.state() {
            state.failures.persist_for.insert(intersection_id);
        }
    }

    pub fn fail_emergency_log(&self, fail: bool) {
        if let Ok(mut state) = self.state() {
            state.failures.emergency_log = fail;
        }
    }

    /// Holds every emergency log append for `delay` before writing it.
    pub fn delay_emergency_log(&self, delay: Duration) {
        if let Ok(mut state) = self.state() {
            state.failures.emergency_log_delay = Some(delay);
        }
    }

    pub fn persisted_batches(&self) -> Vec<SignalBatch> {
        self.state().map(|s| s.batches.clone()).unwrap_or_default()
    }

    pub fn emergency_log(&self) -> Vec<EmergencyEvent> {
        self.state().map(|s| s.emergency_log.clone()).unwrap_or_default()
    }

    pub fn emergency_log_updates(&self) -> Vec<EmergencyLogUpdate> {
        self.state().map(|s| s.log_updates.clone()).unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<TrafficSample> {
        self.state().map(|s| s.samples.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TrafficRepository for InMemoryRepository {
    async fn fetch_intersections(&self) -> Result<Vec<Intersection>> {
        Ok(self.state()?.intersections.clone())
    }

    async fn fetch_approach_traffic(&self) -> Result<Vec<TrafficSample>> {
        let state = self.state()?;
        if state.failures.fetch_traffic {
            return Err(ControlError::Persistence("traffic store unreachable".to_string()));
        }
        Ok(state.samples.clone())
    }

    async fn fetch_predefined_route(
        &self,
        start: IntersectionId,
        end: IntersectionId,
    ) -> Result<Option<Vec<IntersectionId>>> {
        let state = self.state()?;
        Ok(state
            .routes
            .iter()
            .find(|r| r.start == start && r.end == end)
            .map(|r| r.path.clone()))
    }

    async fn fetch_emergency_routes(&self) -> Result<Vec<EmergencyRoute>> {
        Ok(self.state()?.routes.clone())
    }

    // Upserts on (intersection, road), the latest sample replaces the previous one.
    async fn record_traffic_sample(&self, sample: TrafficSample) -> Result<()> {
        let mut state = self.state()?;
        let existing = state
            .samples
            .iter()
            .position(|s| s.intersection_id == sample.intersection_id && s.road_id == sample.road_id);
        match existing {
            Some(i) => state.samples[i] = sample,
            None => state.samples.push(sample),
        }
        Ok(())
    }

    async fn persist_signal_state(&self, batch: &SignalBatch) -> Result<()> {
        let mut state = self.state()?;
        if state.failures.persist_all || state.failures.persist_for.contains(&batch.intersection_id) {
            return Err(ControlError::Persistence(format!(
                "signal state write rejected for intersection {}",
                batch.intersection_id
            )));
        }
        state.batches.push(batch.clone());
        Ok(())
    }

    async fn append_emergency_log(&self, event: &EmergencyEvent) -> Result<()> {
        let delay = {
            let state = self.state()?;
            state.failures.emergency_log_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state()?;
        if state.failures.emergency_log {
            return Err(ControlError::Persistence("emergency log unavailable".to_string()));
        }
        state.emergency_log.push(event.clone());
        Ok(())
    }

    async fn update_emergency_log(
        &self,
        event_id: u64,
        status: EmergencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state()?;
        if state.failures.emergency_log {
            return Err(ControlError::Persistence("emergency log unavailable".to_string()));
        }
        if let Some(entry) = state.emergency_log.iter_mut().find(|e| e.id == event_id) {
            entry.status = status;
            if status == EmergencyStatus::Cleared {
                entry.cleared_at = Some(at);
            }
        }
        state.log_updates.push(EmergencyLogUpdate {
            event_id,
            status,
            at,
        });
        Ok(())
    }
}
