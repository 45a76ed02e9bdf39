use crate::clock::Clock;
use crate::control_system::density_policy::{DensityLevel, GreenTimePolicy};
use crate::control_system::signal_state_store::{SignalScope, SignalStateStore, SignalWrite};
use crate::error::{ControlError, Result};
use crate::models::intersection::{IntersectionCatalog, IntersectionId, RoadId};
use crate::models::traffic::TrafficSample;
use crate::repository::TrafficRepository;
use crate::shared_data::{BatchSource, SignalBatch};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The green assignment chosen for one intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDecision {
    pub intersection_id: IntersectionId,
    pub road_id: RoadId,
    pub vehicle_count: u32,
    pub green_time: u32,
    pub density: DensityLevel,
}

/// What a completed tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub decisions: Vec<SignalDecision>,
    /// Intersections whose new state was applied but could not be mirrored.
    pub persistence_failures: Vec<(IntersectionId, ControlError)>,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// An emergency held the preemption slot, nothing was written.
    Skipped,
    Applied(TickReport),
}

impl TickOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped)
    }

    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Applied(report) => Some(report),
            TickOutcome::Skipped => None,
        }
    }
}

/// Periodically re-times every sampled intersection from vehicle counts.
pub struct AdaptiveScheduler {
    store: Arc<SignalStateStore>,
    repository: Arc<dyn TrafficRepository>,
    catalog: Arc<IntersectionCatalog>,
    policy: Arc<dyn GreenTimePolicy>,
    clock: Arc<dyn Clock>,
    cycle_time: Duration,
}

impl AdaptiveScheduler {
    pub fn new(
        store: Arc<SignalStateStore>,
        repository: Arc<dyn TrafficRepository>,
        catalog: Arc<IntersectionCatalog>,
        policy: Arc<dyn GreenTimePolicy>,
        clock: Arc<dyn Clock>,
        cycle_time: Duration,
    ) -> Self {
        Self {
            store,
            repository,
            catalog,
            policy,
            clock,
            cycle_time,
        }
    }

    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    /// Picks the busiest approach of every intersection that has samples.
    ///
    /// The latest sample per approach counts; approaches without one count as
    /// zero. Ties go to the approach registered first in the catalog.
    pub fn plan(&self, samples: &[TrafficSample]) -> Vec<SignalDecision> {
        let mut latest: HashMap<(IntersectionId, RoadId), &TrafficSample> = HashMap::new();
        for sample in samples {
            if !self.catalog.has_approach(sample.intersection_id, sample.road_id) {
                log::debug!(
                    "Ignoring sample for unknown approach {}/{}",
                    sample.intersection_id,
                    sample.road_id
                );
                continue;
            }
            let key = (sample.intersection_id, sample.road_id);
            let newer = latest
                .get(&key)
                .map_or(true, |current| current.timestamp <= sample.timestamp);
            if newer {
                latest.insert(key, sample);
            }
        }

        let mut decisions = Vec::new();
        for intersection in self.catalog.iter() {
            let sampled = intersection
                .approaches
                .iter()
                .any(|a| latest.contains_key(&(intersection.id, a.road_id)));
            if !sampled {
                continue;
            }

            let mut best: Option<(RoadId, u32)> = None;
            for approach in &intersection.approaches {
                let count = latest
                    .get(&(intersection.id, approach.road_id))
                    .map(|s| s.vehicle_count)
                    .unwrap_or(0);
                match best {
                    Some((_, top)) if top >= count => {}
                    _ => best = Some((approach.road_id, count)),
                }
            }

            if let Some((road_id, vehicle_count)) = best {
                decisions.push(SignalDecision {
                    intersection_id: intersection.id,
                    road_id,
                    vehicle_count,
                    green_time: self.policy.green_time(vehicle_count),
                    density: DensityLevel::from_count(vehicle_count),
                });
            }
        }
        decisions
    }

    /// Runs one scheduling pass.
    ///
    /// Errors mean the tick was abandoned and the previous signal state is untouched.
    pub async fn tick(&self) -> Result<TickOutcome> {
        if self.store.is_preempted().await? {
            log::debug!("Emergency active, skipping scheduler tick");
            return Ok(TickOutcome::Skipped);
        }

        let samples = self.repository.fetch_approach_traffic().await?;
        if samples.is_empty() {
            return Err(ControlError::NotFound("no traffic samples available".to_string()));
        }
        let decisions = self.plan(&samples);
        if decisions.is_empty() {
            return Err(ControlError::NotFound(
                "no traffic samples for catalogued approaches".to_string(),
            ));
        }

        let batches = {
            let mut guard = self.store.lock().await?;
            // An emergency may have started while samples were being fetched.
            if guard.preemption().is_some() {
                log::debug!("Emergency started during tick, discarding plan");
                return Ok(TickOutcome::Skipped);
            }
            let mut writes = Vec::with_capacity(decisions.len() * 2);
            for decision in &decisions {
                writes.push(SignalWrite::AllRed(SignalScope::Intersection(decision.intersection_id)));
                writes.push(SignalWrite::Green {
                    intersection_id: decision.intersection_id,
                    road_id: decision.road_id,
                    green_time: decision.green_time,
                });
            }
            guard.apply(&writes)?;

            let committed_at = guard.now();
            decisions
                .iter()
                .map(|d| SignalBatch {
                    intersection_id: d.intersection_id,
                    source: BatchSource::Scheduler,
                    committed_at,
                    approaches: guard.intersection_signals(d.intersection_id),
                })
                .collect::<Vec<_>>()
        };

        for decision in &decisions {
            log::info!(
                "Intersection {}: road {} GREEN for {}s ({} vehicles, {:?} density)",
                decision.intersection_id,
                decision.road_id,
                decision.green_time,
                decision.vehicle_count,
                decision.density
            );
        }

        let mut report = TickReport {
            decisions,
            persistence_failures: Vec::new(),
        };
        for batch in &batches {
            if let Err(e) = self.repository.persist_signal_state(batch).await {
                log::error!(
                    "Failed to persist signal state for intersection {}: {}",
                    batch.intersection_id,
                    e
                );
                report.persistence_failures.push((batch.intersection_id, e));
            }
        }
        Ok(TickOutcome::Applied(report))
    }

    /// Ticks every `cycle_time` until `shutdown` fires. A failed tick is logged and retried next cycle.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        log::info!("Adaptive scheduler started, cycle time {:?}", self.cycle_time);
        loop {
            match self.tick().await {
                Ok(TickOutcome::Applied(report)) => {
                    log::debug!(
                        "Tick applied to {} intersections, {} mirror failures",
                        report.decisions.len(),
                        report.persistence_failures.len()
                    );
                }
                Ok(TickOutcome::Skipped) => {}
                Err(e) if e.is_transient() => log::warn!("Scheduler tick abandoned: {}", e),
                Err(e) => log::error!("Scheduler tick failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.clock.sleep(self.cycle_time) => {}
            }
        }
        log::info!("Adaptive scheduler stopped");
    }
}
