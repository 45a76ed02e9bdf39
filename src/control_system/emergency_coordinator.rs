use crate::clock::Clock;
use crate::control_system::signal_state_store::{
    CorridorPhase, Preemption, SignalGuard, SignalScope, SignalStateStore, SignalWrite,
};
use crate::error::{ControlError, Result};
use crate::models::emergency::{ClearReason, EmergencyEvent, EmergencyStatus, EmergencyTicket};
use crate::models::intersection::{IntersectionCatalog, IntersectionId};
use crate::repository::TrafficRepository;
use crate::shared_data::{format_route, BatchSource, SignalBatch};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Drives green corridors and owns the emergency lifecycle (IDLE -> ACTIVE -> IDLE).
///
/// The active event lives in the store's preemption slot, so installing or
/// removing it is serialized with every signal write. Each accepted trigger
/// spawns a corridor task, and the corridor spawns a cancellable auto-clear
/// monitor once it reaches the last intersection.
pub struct EmergencyCoordinator {
    store: Arc<SignalStateStore>,
    repository: Arc<dyn TrafficRepository>,
    catalog: Arc<IntersectionCatalog>,
    clock: Arc<dyn Clock>,
    corridor_green_time: Duration,
    corridor_green_secs: u32,
    auto_clear_timeout: Duration,
    next_id: AtomicU64,
}

impl EmergencyCoordinator {
    pub fn new(
        store: Arc<SignalStateStore>,
        repository: Arc<dyn TrafficRepository>,
        catalog: Arc<IntersectionCatalog>,
        clock: Arc<dyn Clock>,
        corridor_green_time: Duration,
        auto_clear_timeout: Duration,
    ) -> Self {
        Self {
            store,
            repository,
            catalog,
            clock,
            corridor_green_time,
            corridor_green_secs: u32::try_from(corridor_green_time.as_secs()).unwrap_or(u32::MAX),
            auto_clear_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Resolves the corridor path between two catalogued intersections.
    ///
    /// A predefined route wins; otherwise the path is `[start, end]`.
    pub async fn resolve_route(&self, start: IntersectionId, end: IntersectionId) -> Result<Vec<IntersectionId>> {
        for id in [start, end] {
            if !self.catalog.contains(id) {
                return Err(ControlError::unknown_intersection(id));
            }
        }
        if start == end {
            return Ok(vec![start]);
        }

        let path = match self.repository.fetch_predefined_route(start, end).await {
            Ok(Some(path)) if !path.is_empty() => {
                if let Some(unknown) = path.iter().find(|id| !self.catalog.contains(**id)) {
                    return Err(ControlError::Validation(format!(
                        "predefined route {} -> {} passes unknown intersection {}",
                        start, end, unknown
                    )));
                }
                path
            }
            Ok(_) => vec![start, end],
            Err(e) => {
                log::warn!(
                    "Route lookup {} -> {} failed, using direct path: {}",
                    start,
                    end,
                    e
                );
                vec![start, end]
            }
        };

        if path.is_empty() {
            return Err(ControlError::NotFound(format!("no route from {} to {}", start, end)));
        }
        Ok(path)
    }

    // Accepts a corridor request and starts traversal in the background.
    // If the log write fails the corridor still runs and the ticket comes
    // back inside `ControlError::Unlogged`.
    pub async fn trigger(
        self: &Arc<Self>,
        start: IntersectionId,
        end: IntersectionId,
        emergency_type: &str,
    ) -> Result<EmergencyTicket> {
        let emergency_type = emergency_type.trim();
        if emergency_type.is_empty() {
            return Err(ControlError::Validation("emergency type must not be empty".to_string()));
        }
        if let Some(active) = self.store.active_emergency().await? {
            return Err(ControlError::Conflict { active_id: active.id });
        }

        let path = self.resolve_route(start, end).await?;
        let cancel = CancellationToken::new();
        let (logged_tx, logged_rx) = watch::channel(false);

        let (event, first_batch) = {
            let mut guard = self.store.lock().await?;
            if let Some(active) = guard.preemption() {
                return Err(ControlError::Conflict {
                    active_id: active.event.id,
                });
            }
            let event = EmergencyEvent {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                route: path.clone(),
                emergency_type: emergency_type.to_string(),
                status: EmergencyStatus::Active,
                created_at: guard.now(),
                cleared_at: None,
            };
            // Step 0: every signal red, then the first corridor intersection green.
            guard.apply(&[
                SignalWrite::AllRed(SignalScope::All),
                SignalWrite::IntersectionGreen {
                    intersection_id: path[0],
                    green_time: self.corridor_green_secs,
                },
            ])?;
            guard.begin_preemption(Preemption {
                event: event.clone(),
                phase: CorridorPhase::Traversing { step: 0 },
                cancel: cancel.clone(),
                logged: logged_rx,
            })?;
            (event, corridor_batch(&guard, path[0]))
        };

        log::warn!(
            "Emergency {} ({}) ACTIVE, corridor {}",
            event.id,
            event.emergency_type,
            format_route(&event.route)
        );

        let coordinator = Arc::clone(self);
        let (event_id, route) = (event.id, event.route.clone());
        tokio::spawn(async move {
            coordinator.run_corridor(event_id, route, cancel).await;
        });

        self.mirror(&first_batch).await;
        let ticket = EmergencyTicket {
            event_id: event.id,
            path,
        };
        let appended = self.repository.append_emergency_log(&event).await;
        // A clear that raced this trigger is waiting for the entry to exist.
        logged_tx.send_replace(true);
        match appended {
            Ok(()) => Ok(ticket),
            Err(e) => {
                log::error!("Failed to log emergency {}: {}", event.id, e);
                Err(ControlError::Unlogged {
                    ticket,
                    cause: Box::new(e),
                })
            }
        }
    }

    /// Clears the active emergency. Idempotent.
    ///
    /// With `Some(id)`, only that event is cleared; any other id is a no-op.
    /// Returns the cleared event, or `None` when nothing was cleared.
    ///
    /// Every intersection on the corridor is reset to RED/0. They stay red
    /// until the scheduler re-times them on its next tick.
    pub async fn clear(&self, event_id: Option<u64>) -> Result<Option<EmergencyEvent>> {
        self.release(event_id, ClearReason::Explicit).await
    }

    pub async fn status(&self) -> Result<Option<EmergencyEvent>> {
        self.store.active_emergency().await
    }

    // Where the live corridor is; `None` when no emergency is active.
    pub async fn corridor_phase(&self) -> Result<Option<CorridorPhase>> {
        let guard = self.store.lock().await?;
        Ok(guard.preemption().map(|p| p.phase))
    }

    // Clears whatever is active, used when the controller stops.
    pub async fn shutdown(&self) -> Result<Option<EmergencyEvent>> {
        self.release(None, ClearReason::Shutdown).await
    }

    async fn release(&self, event_id: Option<u64>, reason: ClearReason) -> Result<Option<EmergencyEvent>> {
        let (event, reset_batches, mut logged) = {
            let mut guard = self.store.lock().await?;
            let held = match (event_id, guard.preemption()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(id), Some(active)) => {
                    if active.event.id != id {
                        log::warn!(
                            "Ignoring {:?} clear for emergency {}, emergency {} is active",
                            reason,
                            id,
                            active.event.id
                        );
                    }
                    active.event.id == id
                }
            };
            if !held {
                return Ok(None);
            }
            let Some(preemption) = guard.end_preemption() else {
                return Ok(None);
            };
            // Stops the corridor and the auto-clear monitor. Both re-check under this lock.
            preemption.cancel.cancel();
            let logged = preemption.logged.clone();

            let mut route = preemption.event.route.clone();
            route.dedup();
            let writes: Vec<SignalWrite> = route
                .iter()
                .map(|&id| SignalWrite::AllRed(SignalScope::Intersection(id)))
                .collect();
            if let Err(e) = guard.apply(&writes) {
                log::error!("Failed to reset corridor signals: {}", e);
            }

            let mut event = preemption.event;
            event.status = EmergencyStatus::Cleared;
            event.cleared_at = Some(guard.now());
            let batches: Vec<SignalBatch> = route.iter().map(|&id| corridor_batch(&guard, id)).collect();
            (event, batches, logged)
        };

        log::warn!("Emergency {} CLEARED ({:?})", event.id, reason);

        for batch in &reset_batches {
            self.mirror(batch).await;
        }
        // The entry must exist before its clearance is recorded.
        let written = logged.wait_for(|done| *done).await.map(|_| ());
        if written.is_err() {
            log::warn!("Emergency {} was cleared before its log entry was written", event.id);
        }
        let cleared_at = event.cleared_at.unwrap_or_else(|| self.clock.now());
        if let Err(e) = self
            .repository
            .update_emergency_log(event.id, EmergencyStatus::Cleared, cleared_at)
            .await
        {
            log::error!("Failed to record clearance of emergency {}: {}", event.id, e);
            return Err(e);
        }
        Ok(Some(event))
    }

    async fn run_corridor(self: Arc<Self>, event_id: u64, path: Vec<IntersectionId>, cancel: CancellationToken) {
        let green_secs = self.corridor_green_secs;
        log::info!("Corridor {}: intersection {} GREEN for {}s", event_id, path[0], green_secs);

        for step in 1..path.len() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.clock.sleep(self.corridor_green_time) => {}
            }

            let (previous, next) = (path[step - 1], path[step]);
            let batches = {
                let Some(mut guard) = self.lock_live(&cancel).await else {
                    return;
                };
                let Some(preemption) = guard.preemption_for(event_id) else {
                    return;
                };
                preemption.phase = CorridorPhase::Traversing { step };
                let writes = [
                    SignalWrite::AllRed(SignalScope::Intersection(previous)),
                    SignalWrite::IntersectionGreen {
                        intersection_id: next,
                        green_time: green_secs,
                    },
                ];
                if let Err(e) = guard.apply(&writes) {
                    log::error!("Corridor {} step {} rejected: {}", event_id, step, e);
                    return;
                }
                [corridor_batch(&guard, previous), corridor_batch(&guard, next)]
            };
            log::info!(
                "Corridor {}: intersection {} RED, intersection {} GREEN for {}s",
                event_id,
                previous,
                next,
                green_secs
            );
            for batch in &batches {
                self.mirror(batch).await;
            }
        }

        {
            let Some(mut guard) = self.lock_live(&cancel).await else {
                return;
            };
            let Some(preemption) = guard.preemption_for(event_id) else {
                return;
            };
            preemption.phase = CorridorPhase::Completing;
        }
        log::info!(
            "Corridor {} reached its last intersection, auto-clear in {:?}",
            event_id,
            self.auto_clear_timeout
        );

        let coordinator = Arc::clone(&self);
        tokio::spawn(async move {
            coordinator.monitor_completion(event_id, cancel).await;
        });
    }

    async fn monitor_completion(self: Arc<Self>, event_id: u64, cancel: CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = self.clock.sleep(self.auto_clear_timeout) => {}
        }
        // A clear that raced the timer has already cancelled the token under the lock.
        // Lock timeouts are retried, the safety net must not give up while the event is live.
        while !cancel.is_cancelled() {
            match self.release(Some(event_id), ClearReason::AutoTimeout).await {
                Ok(Some(_)) => {
                    log::info!("Emergency {} auto-cleared after timeout", event_id);
                    return;
                }
                Ok(None) => return,
                Err(e @ ControlError::Concurrency { .. }) => {
                    log::warn!("Auto-clear of emergency {} waiting on signal state: {}", event_id, e);
                }
                Err(e) => {
                    log::error!("Auto-clear of emergency {} incomplete: {}", event_id, e);
                    return;
                }
            }
        }
    }

    // Retries on lock timeouts until the corridor is cancelled.
    async fn lock_live(&self, cancel: &CancellationToken) -> Option<SignalGuard<'_>> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.store.lock().await {
                Ok(guard) => return Some(guard),
                Err(e) => log::warn!("Corridor waiting on signal state: {}", e),
            }
        }
    }

    async fn mirror(&self, batch: &SignalBatch) {
        if let Err(e) = self.repository.persist_signal_state(batch).await {
            log::error!(
                "Failed to persist corridor state for intersection {}: {}",
                batch.intersection_id,
                e
            );
        }
    }
}

fn corridor_batch(guard: &SignalGuard<'_>, intersection_id: IntersectionId) -> SignalBatch {
    SignalBatch {
        intersection_id,
        source: BatchSource::Corridor,
        committed_at: guard.now(),
        approaches: guard.intersection_signals(intersection_id),
    }
}
