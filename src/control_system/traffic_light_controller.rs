use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::control_system::adaptive_scheduler::{AdaptiveScheduler, TickOutcome};
use crate::control_system::density_policy::{GreenTimePolicy, StepDensityPolicy};
use crate::control_system::emergency_coordinator::EmergencyCoordinator;
use crate::control_system::signal_state_store::{CorridorPhase, SignalStateStore};
use crate::error::{ControlError, Result};
use crate::models::emergency::{EmergencyEvent, EmergencyRoute, EmergencyTicket};
use crate::models::intersection::{Intersection, IntersectionCatalog, IntersectionId, RoadId};
use crate::models::signal::SignalSnapshot;
use crate::models::traffic::TrafficSample;
use crate::repository::TrafficRepository;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ControllerInner {
    config: ControllerConfig,
    catalog: Arc<IntersectionCatalog>,
    store: Arc<SignalStateStore>,
    repository: Arc<dyn TrafficRepository>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<AdaptiveScheduler>,
    coordinator: Arc<EmergencyCoordinator>,
    shutdown: CancellationToken,
}

/// Handle to the signal control engine.
///
/// Cloning is cheap; every clone drives the same store, scheduler and
/// emergency coordinator.
#[derive(Clone)]
pub struct TrafficLightController {
    inner: Arc<ControllerInner>,
}

/// Background scheduler loop started by [`TrafficLightController::spawn_scheduler`].
pub struct SchedulerHandle {
    task: JoinHandle<()>,
    stop: CancellationToken,
}

impl SchedulerHandle {
    // Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            log::error!("Scheduler task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl TrafficLightController {
    // Loads the intersection catalog and seeds every approach RED, using the default density policy.
    pub async fn initialize(
        config: ControllerConfig,
        repository: Arc<dyn TrafficRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::initialize_with_policy(config, repository, clock, Arc::new(StepDensityPolicy::default()))
            .await
    }

    pub async fn initialize_with_policy(
        config: ControllerConfig,
        repository: Arc<dyn TrafficRepository>,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn GreenTimePolicy>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(IntersectionCatalog::new(repository.fetch_intersections().await?));
        if catalog.is_empty() {
            return Err(ControlError::Config("intersection catalog is empty".to_string()));
        }

        let store = Arc::new(SignalStateStore::new(&catalog, clock.clone(), config.lock_timeout()));
        let scheduler = Arc::new(AdaptiveScheduler::new(
            store.clone(),
            repository.clone(),
            catalog.clone(),
            policy,
            clock.clone(),
            config.cycle_time(),
        ));
        let coordinator = Arc::new(EmergencyCoordinator::new(
            store.clone(),
            repository.clone(),
            catalog.clone(),
            clock.clone(),
            config.corridor_green_time(),
            config.auto_clear_timeout(),
        ));
        log::info!(
            "Traffic light controller ready: {} intersections, {} approaches",
            catalog.len(),
            catalog.approaches().count()
        );

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                catalog,
                store,
                repository,
                clock,
                scheduler,
                coordinator,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        let stop = self.inner.shutdown.child_token();
        let scheduler = self.inner.scheduler.clone();
        let task = tokio::spawn(scheduler.run(stop.clone()));
        SchedulerHandle { task, stop }
    }

    // Runs a scheduler pass now instead of waiting for the next cycle.
    pub async fn run_tick_now(&self) -> Result<TickOutcome> {
        self.inner.scheduler.tick().await
    }

    pub async fn get_signal_status(&self) -> Result<SignalSnapshot> {
        self.inner.store.snapshot().await
    }

    // Stores a vehicle count for an approach, then re-ticks if configured to.
    // A failed re-tick is logged, not returned; the sample itself was stored.
    pub async fn record_traffic_sample(
        &self,
        intersection_id: IntersectionId,
        road_id: RoadId,
        vehicle_count: u32,
    ) -> Result<Option<TickOutcome>> {
        if !self.inner.catalog.contains(intersection_id) {
            return Err(ControlError::unknown_intersection(intersection_id));
        }
        if !self.inner.catalog.has_approach(intersection_id, road_id) {
            return Err(ControlError::unknown_approach(intersection_id, road_id));
        }

        let sample = TrafficSample {
            intersection_id,
            road_id,
            vehicle_count,
            timestamp: self.inner.clock.now(),
        };
        self.inner.repository.record_traffic_sample(sample).await?;
        log::debug!(
            "Recorded {} vehicles on road {} at intersection {}",
            vehicle_count,
            road_id,
            intersection_id
        );

        if !self.inner.config.retick_on_sample {
            return Ok(None);
        }
        match self.run_tick_now().await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                log::warn!("Re-tick after traffic sample failed: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn trigger_emergency(
        &self,
        start: IntersectionId,
        end: IntersectionId,
        emergency_type: &str,
    ) -> Result<EmergencyTicket> {
        self.inner.coordinator.trigger(start, end, emergency_type).await
    }

    // Idempotent. Corridor intersections go RED and normal scheduling resumes on the next cycle.
    pub async fn clear_emergency(&self, event_id: Option<u64>) -> Result<Option<EmergencyEvent>> {
        self.inner.coordinator.clear(event_id).await
    }

    // Same as clear_emergency, then re-times signals without waiting for the cycle.
    pub async fn clear_emergency_and_retick(&self, event_id: Option<u64>) -> Result<Option<EmergencyEvent>> {
        let cleared = self.clear_emergency(event_id).await;
        if !matches!(cleared, Ok(None)) {
            if let Err(e) = self.run_tick_now().await {
                log::warn!("Re-tick after emergency clear failed: {}", e);
            }
        }
        cleared
    }

    pub async fn get_emergency_status(&self) -> Result<Option<EmergencyEvent>> {
        self.inner.coordinator.status().await
    }

    pub async fn get_corridor_phase(&self) -> Result<Option<CorridorPhase>> {
        self.inner.coordinator.corridor_phase().await
    }

    pub fn list_intersections(&self) -> Vec<Intersection> {
        self.inner.catalog.iter().cloned().collect()
    }

    pub async fn list_emergency_routes(&self) -> Result<Vec<EmergencyRoute>> {
        self.inner.repository.fetch_emergency_routes().await
    }

    // Stops every scheduler loop and clears any live emergency.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        match self.inner.coordinator.shutdown().await {
            Ok(Some(event)) => log::info!("Emergency {} cleared on shutdown", event.id),
            Ok(None) => {}
            Err(e) => log::error!("Emergency clear on shutdown incomplete: {}", e),
        }
    }
}
