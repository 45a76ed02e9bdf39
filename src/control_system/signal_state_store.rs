use crate::clock::Clock;
use crate::error::{ControlError, Result};
use crate::models::emergency::EmergencyEvent;
use crate::models::intersection::{Approach, IntersectionCatalog, IntersectionId, RoadId};
use crate::models::signal::{ApproachSignal, ApproachState, SignalSnapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Target of a bulk red write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalScope {
    All,
    Intersection(IntersectionId),
}

/// One step of an atomic write batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalWrite {
    AllRed(SignalScope),
    Green {
        intersection_id: IntersectionId,
        road_id: RoadId,
        green_time: u32,
    },
    /// Every approach of the intersection goes green.
    IntersectionGreen {
        intersection_id: IntersectionId,
        green_time: u32,
    },
}

/// Where the live corridor currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorridorPhase {
    Traversing { step: usize },
    Completing,
}

/// The active emergency as held under the store lock. Its presence is the preemption flag.
#[derive(Debug, Clone)]
pub struct Preemption {
    pub event: EmergencyEvent,
    pub phase: CorridorPhase,
    /// Cancels the corridor traversal and the auto-clear monitor.
    pub cancel: CancellationToken,
    /// Turns true once the trigger has written the emergency log entry.
    pub logged: watch::Receiver<bool>,
}

struct ControlState {
    approaches: Vec<(Approach, ApproachState)>,
    index: HashMap<(IntersectionId, RoadId), usize>,
    by_intersection: HashMap<IntersectionId, Vec<usize>>,
    preemption: Option<Preemption>,
}

impl ControlState {
    fn indices(&self, scope: SignalScope) -> Result<Vec<usize>> {
        match scope {
            SignalScope::All => Ok((0..self.approaches.len()).collect()),
            SignalScope::Intersection(id) => self
                .by_intersection
                .get(&id)
                .cloned()
                .ok_or_else(|| ControlError::unknown_intersection(id)),
        }
    }

    fn check(&self, write: &SignalWrite) -> Result<()> {
        match *write {
            SignalWrite::AllRed(scope) => self.indices(scope).map(|_| ()),
            SignalWrite::Green {
                intersection_id,
                road_id,
                ..
            } => {
                if self.index.contains_key(&(intersection_id, road_id)) {
                    Ok(())
                } else {
                    Err(ControlError::unknown_approach(intersection_id, road_id))
                }
            }
            SignalWrite::IntersectionGreen { intersection_id, .. } => self
                .indices(SignalScope::Intersection(intersection_id))
                .map(|_| ()),
        }
    }

    fn apply(&mut self, write: &SignalWrite, at: DateTime<Utc>) -> usize {
        let (indices, state) = match *write {
            SignalWrite::AllRed(scope) => {
                (self.indices(scope).unwrap_or_default(), ApproachState::red(at))
            }
            SignalWrite::Green {
                intersection_id,
                road_id,
                green_time,
            } => (
                self.index
                    .get(&(intersection_id, road_id))
                    .map(|&i| vec![i])
                    .unwrap_or_default(),
                ApproachState::green(green_time, at),
            ),
            SignalWrite::IntersectionGreen {
                intersection_id,
                green_time,
            } => (
                self.indices(SignalScope::Intersection(intersection_id))
                    .unwrap_or_default(),
                ApproachState::green(green_time, at),
            ),
        };
        for &i in &indices {
            self.approaches[i].1 = state;
        }
        indices.len()
    }
}

/// Authoritative in-memory table of approach signal state plus the preemption slot.
///
/// Both live behind one async mutex. A [`SignalGuard`] is the only way to
/// mutate either, so a batch is visible to readers fully applied or not at all.
pub struct SignalStateStore {
    state: Mutex<ControlState>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl SignalStateStore {
    /// Seeds every catalog approach as RED/0.
    pub fn new(catalog: &IntersectionCatalog, clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
        let now = clock.now();
        let mut approaches = Vec::new();
        let mut index = HashMap::new();
        let mut by_intersection: HashMap<IntersectionId, Vec<usize>> = HashMap::new();
        for approach in catalog.approaches() {
            let key = (approach.intersection_id, approach.road_id);
            if index.contains_key(&key) {
                continue;
            }
            let i = approaches.len();
            index.insert(key, i);
            by_intersection.entry(approach.intersection_id).or_default().push(i);
            approaches.push((approach, ApproachState::red(now)));
        }
        // Intersections with no roads still form a valid (empty) scope.
        for intersection in catalog.iter() {
            by_intersection.entry(intersection.id).or_default();
        }

        Self {
            state: Mutex::new(ControlState {
                approaches,
                index,
                by_intersection,
                preemption: None,
            }),
            clock,
            lock_timeout,
        }
    }

    /// Enters the critical section, failing with `Concurrency` after the lock timeout.
    pub async fn lock(&self) -> Result<SignalGuard<'_>> {
        match tokio::time::timeout(self.lock_timeout, self.state.lock()).await {
            Ok(state) => Ok(SignalGuard {
                state,
                now: self.clock.now(),
            }),
            Err(_) => Err(ControlError::Concurrency {
                waited_ms: self.lock_timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn apply_batch(&self, writes: &[SignalWrite]) -> Result<()> {
        let mut guard = self.lock().await?;
        guard.apply(writes)
    }

    pub async fn set_all_red(&self, scope: SignalScope) -> Result<()> {
        self.apply_batch(&[SignalWrite::AllRed(scope)]).await
    }

    pub async fn set_green(&self, intersection_id: IntersectionId, road_id: RoadId, green_time: u32) -> Result<()> {
        self.apply_batch(&[SignalWrite::Green {
            intersection_id,
            road_id,
            green_time,
        }])
        .await
    }

    pub async fn snapshot(&self) -> Result<SignalSnapshot> {
        let guard = self.lock().await?;
        Ok(guard.snapshot())
    }

    /// Whether an emergency currently holds the preemption slot.
    pub async fn is_preempted(&self) -> Result<bool> {
        let guard = self.lock().await?;
        Ok(guard.preemption().is_some())
    }

    pub async fn active_emergency(&self) -> Result<Option<EmergencyEvent>> {
        let guard = self.lock().await?;
        Ok(guard.preemption().map(|p| p.event.clone()))
    }
}

/// Exclusive access to the signal table for one batch.
pub struct SignalGuard<'a> {
    state: MutexGuard<'a, ControlState>,
    now: DateTime<Utc>,
}

impl SignalGuard<'_> {
    /// Validates every write first, then applies them in order.
    pub fn apply(&mut self, writes: &[SignalWrite]) -> Result<()> {
        for write in writes {
            self.state.check(write)?;
        }
        let now = self.now;
        for write in writes {
            self.state.apply(write, now);
        }
        Ok(())
    }

    pub fn intersection_signals(&self, intersection_id: IntersectionId) -> Vec<ApproachSignal> {
        self.state
            .by_intersection
            .get(&intersection_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| {
                        let (approach, state) = self.state.approaches[i];
                        ApproachSignal::new(approach, state)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            taken_at: self.now,
            approaches: self
                .state
                .approaches
                .iter()
                .map(|&(approach, state)| ApproachSignal::new(approach, state))
                .collect(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn preemption(&self) -> Option<&Preemption> {
        self.state.preemption.as_ref()
    }

    /// The preemption for `event_id`, if that event is the active one.
    pub fn preemption_for(&mut self, event_id: u64) -> Option<&mut Preemption> {
        self.state
            .preemption
            .as_mut()
            .filter(|p| p.event.id == event_id)
    }

    /// Installs a preemption. Fails with `Conflict` if one is already held.
    pub fn begin_preemption(&mut self, preemption: Preemption) -> Result<()> {
        if let Some(active) = &self.state.preemption {
            return Err(ControlError::Conflict {
                active_id: active.event.id,
            });
        }
        self.state.preemption = Some(preemption);
        Ok(())
    }

    /// Removes the preemption, if any, and returns it.
    pub fn end_preemption(&mut self) -> Option<Preemption> {
        self.state.preemption.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::models::emergency::EmergencyStatus;
    use crate::models::intersection::{Direction, Intersection};
    use crate::models::signal::SignalColor;

    fn store() -> SignalStateStore {
        let catalog = IntersectionCatalog::new(vec![
            Intersection::new(1, "A", vec![(10, "North Rd", Direction::North), (11, "East Rd", Direction::East)]),
            Intersection::new(2, "B", vec![(11, "East Rd", Direction::West), (12, "South Rd", Direction::South)]),
        ]);
        SignalStateStore::new(&catalog, Arc::new(TokioClock::new()), Duration::from_millis(200))
    }

    fn event(id: u64) -> EmergencyEvent {
        EmergencyEvent {
            id,
            route: vec![IntersectionId(1)],
            emergency_type: "FIRE".to_string(),
            status: EmergencyStatus::Active,
            created_at: Utc::now(),
            cleared_at: None,
        }
    }

    #[tokio::test]
    async fn test_seeded_all_red() {
        let snapshot = store().snapshot().await.unwrap();
        assert_eq!(snapshot.approaches.len(), 4);
        assert!(snapshot
            .approaches
            .iter()
            .all(|a| a.state.signal_color == SignalColor::Red && a.state.green_time == 0));
    }

    #[tokio::test]
    async fn test_set_green_leaves_siblings_alone() {
        let store = store();
        store.set_green(IntersectionId(1), RoadId(10), 20).await.unwrap();
        store.set_green(IntersectionId(1), RoadId(11), 30).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.green_count(IntersectionId(1)), 2);

        store.set_all_red(SignalScope::Intersection(IntersectionId(1))).await.unwrap();
        store.set_all_red(SignalScope::Intersection(IntersectionId(1))).await.unwrap();
        assert!(store.snapshot().await.unwrap().is_all_red(IntersectionId(1)));
    }

    #[tokio::test]
    async fn test_invalid_batch_applies_nothing() {
        let store = store();
        store.set_green(IntersectionId(2), RoadId(12), 10).await.unwrap();
        let before = store.snapshot().await.unwrap();

        let err = store
            .apply_batch(&[
                SignalWrite::AllRed(SignalScope::All),
                SignalWrite::Green {
                    intersection_id: IntersectionId(2),
                    road_id: RoadId(99),
                    green_time: 10,
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        let after = store.snapshot().await.unwrap();
        assert_eq!(before.approaches, after.approaches);
    }

    #[tokio::test]
    async fn test_same_road_on_two_intersections_is_independent() {
        let store = store();
        store.set_green(IntersectionId(1), RoadId(11), 20).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.state_of(IntersectionId(1), RoadId(11)).unwrap().is_green());
        assert!(!snapshot.state_of(IntersectionId(2), RoadId(11)).unwrap().is_green());
    }

    #[tokio::test]
    async fn test_second_preemption_conflicts() {
        let store = store();
        let mut guard = store.lock().await.unwrap();
        guard
            .begin_preemption(Preemption {
                event: event(1),
                phase: CorridorPhase::Traversing { step: 0 },
                cancel: CancellationToken::new(),
                logged: watch::channel(true).1,
            })
            .unwrap();
        let err = guard
            .begin_preemption(Preemption {
                event: event(2),
                phase: CorridorPhase::Traversing { step: 0 },
                cancel: CancellationToken::new(),
                logged: watch::channel(true).1,
            })
            .unwrap_err();
        assert_eq!(err, ControlError::Conflict { active_id: 1 });
        assert!(guard.preemption_for(2).is_none());
        assert!(guard.preemption_for(1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_timeout_is_concurrency_error() {
        let store = store();
        let _held = store.lock().await.unwrap();
        let err = store.snapshot().await.unwrap_err();
        assert_eq!(err, ControlError::Concurrency { waited_ms: 200 });
    }
}
