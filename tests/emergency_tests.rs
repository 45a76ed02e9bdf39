mod common;

use common::{controller, controller_with, id, manual_config};
use smart_traffic::control_system::{CorridorPhase, TickOutcome};
use smart_traffic::models::emergency::EmergencyStatus;
use smart_traffic::models::intersection::RoadId;
use smart_traffic::models::signal::SignalSnapshot;
use smart_traffic::shared_data::BatchSource;
use smart_traffic::{ControlError, ControllerConfig, TrafficLightController};
use std::time::Duration;

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

async fn snapshot(controller: &TrafficLightController) -> SignalSnapshot {
    controller.get_signal_status().await.unwrap()
}

fn corridor_green(snapshot: &SignalSnapshot, intersection: u32) -> bool {
    snapshot
        .intersection(id(intersection))
        .all(|a| a.state.is_green() && a.state.green_time == 20)
}

#[tokio::test(start_paused = true)]
async fn test_corridor_follows_predefined_route() {
    let (controller, repo) = controller().await;
    let ticket = controller
        .trigger_emergency(id(1), id(3), "AMBULANCE")
        .await
        .unwrap();
    assert_eq!(ticket.path, vec![id(1), id(2), id(3)]);

    let status = controller.get_emergency_status().await.unwrap().unwrap();
    assert_eq!(status.id, ticket.event_id);
    assert_eq!(status.route, ticket.path);
    assert_eq!(status.emergency_type, "AMBULANCE");
    assert_eq!(status.status, EmergencyStatus::Active);

    sleep_secs(10).await;
    let s = snapshot(&controller).await;
    assert!(corridor_green(&s, 1));
    assert!(s.is_all_red(id(2)));
    assert!(s.is_all_red(id(3)));
    let phase = controller.get_corridor_phase().await.unwrap();
    assert_eq!(phase, Some(CorridorPhase::Traversing { step: 0 }));

    sleep_secs(20).await;
    let s = snapshot(&controller).await;
    assert!(s.is_all_red(id(1)));
    assert!(corridor_green(&s, 2));
    assert!(s.is_all_red(id(3)));
    let phase = controller.get_corridor_phase().await.unwrap();
    assert_eq!(phase, Some(CorridorPhase::Traversing { step: 1 }));

    sleep_secs(20).await;
    let s = snapshot(&controller).await;
    assert!(s.is_all_red(id(1)));
    assert!(s.is_all_red(id(2)));
    assert!(corridor_green(&s, 3));
    let phase = controller.get_corridor_phase().await.unwrap();
    assert_eq!(phase, Some(CorridorPhase::Completing));

    // The last intersection holds until cleared.
    sleep_secs(90).await;
    assert!(corridor_green(&snapshot(&controller).await, 3));
    assert!(controller.get_emergency_status().await.unwrap().is_some());

    let cleared = controller.clear_emergency(Some(ticket.event_id)).await.unwrap().unwrap();
    assert_eq!(cleared.status, EmergencyStatus::Cleared);
    assert_eq!(controller.get_corridor_phase().await.unwrap(), None);
    assert!(cleared.cleared_at.is_some());
    assert!(snapshot(&controller).await.is_all_red(id(3)));

    let corridor_batches = repo
        .persisted_batches()
        .into_iter()
        .filter(|b| b.source == BatchSource::Corridor)
        .count();
    assert!(corridor_batches >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_route_falls_back_to_direct_path() {
    let (controller, _repo) = controller().await;
    let ticket = controller.trigger_emergency(id(5), id(9), "FIRE").await.unwrap();
    assert_eq!(ticket.path, vec![id(5), id(9)]);

    sleep_secs(25).await;
    let s = snapshot(&controller).await;
    assert!(s.is_all_red(id(5)));
    assert!(corridor_green(&s, 9));
}

#[tokio::test(start_paused = true)]
async fn test_same_start_and_end_is_single_intersection() {
    let (controller, _repo) = controller().await;
    let ticket = controller.trigger_emergency(id(2), id(2), "POLICE").await.unwrap();
    assert_eq!(ticket.path, vec![id(2)]);
    assert!(corridor_green(&snapshot(&controller).await, 2));
}

#[tokio::test(start_paused = true)]
async fn test_second_trigger_is_rejected() {
    let (controller, _repo) = controller().await;
    let first = controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();
    let err = controller
        .trigger_emergency(id(5), id(9), "FIRE")
        .await
        .unwrap_err();
    assert_eq!(err, ControlError::Conflict { active_id: first.event_id });

    let active = controller.get_emergency_status().await.unwrap().unwrap();
    assert_eq!(active.id, first.event_id);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_trigger_mutates_nothing() {
    let (controller, repo) = controller().await;
    let before = snapshot(&controller).await;

    let err = controller.trigger_emergency(id(1), id(77), "FIRE").await.unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));
    let err = controller.trigger_emergency(id(1), id(3), "   ").await.unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));

    assert!(controller.get_emergency_status().await.unwrap().is_none());
    assert!(repo.emergency_log().is_empty());
    assert_eq!(snapshot(&controller).await.approaches, before.approaches);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_is_preempted_until_cleared() {
    let (controller, repo) = controller().await;
    controller.record_traffic_sample(id(1), RoadId(10), 2).await.unwrap();
    controller.record_traffic_sample(id(2), RoadId(21), 18).await.unwrap();

    let ticket = controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();
    let handle = controller.spawn_scheduler();

    sleep_secs(45).await;
    assert!(controller.run_tick_now().await.unwrap().is_skipped());
    let scheduler_batches = repo
        .persisted_batches()
        .iter()
        .filter(|b| b.source == BatchSource::Scheduler)
        .count();
    assert_eq!(scheduler_batches, 0);
    assert!(corridor_green(&snapshot(&controller).await, 3));

    // Recording traffic during an emergency stores the sample but writes no signals.
    let (retick_controller, _) = controller_with(ControllerConfig::default()).await;
    retick_controller.trigger_emergency(id(5), id(9), "FIRE").await.unwrap();
    let outcome = retick_controller
        .record_traffic_sample(id(5), RoadId(50), 9)
        .await
        .unwrap();
    assert!(matches!(outcome, Some(TickOutcome::Skipped)));

    controller.clear_emergency(Some(ticket.event_id)).await.unwrap();
    // Next cycle of the loop (t = 60) re-times the sampled intersections.
    sleep_secs(20).await;
    let s = snapshot(&controller).await;
    assert_eq!(s.state_of(id(1), RoadId(10)).unwrap().green_time, 10);
    assert_eq!(s.state_of(id(2), RoadId(21)).unwrap().green_time, 30);
    assert!(s.is_all_red(id(3)));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_and_retick_resumes_immediately() {
    let (controller, _repo) = controller().await;
    controller.record_traffic_sample(id(1), RoadId(11), 6).await.unwrap();
    controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();

    sleep_secs(5).await;
    controller.clear_emergency_and_retick(None).await.unwrap();
    let s = snapshot(&controller).await;
    assert_eq!(s.green_count(id(1)), 1);
    assert_eq!(s.state_of(id(1), RoadId(11)).unwrap().green_time, 20);
}

#[tokio::test(start_paused = true)]
async fn test_clear_is_idempotent() {
    let (controller, repo) = controller().await;
    let ticket = controller.trigger_emergency(id(5), id(9), "FIRE").await.unwrap();

    let first = controller.clear_emergency(None).await.unwrap();
    assert_eq!(first.map(|e| e.id), Some(ticket.event_id));
    assert!(controller.clear_emergency(None).await.unwrap().is_none());
    assert!(controller.clear_emergency(Some(ticket.event_id)).await.unwrap().is_none());

    let updates = repo.emergency_log_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, EmergencyStatus::Cleared);
    let log = repo.emergency_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, EmergencyStatus::Cleared);
}

#[tokio::test(start_paused = true)]
async fn test_clear_with_stale_id_keeps_active_event() {
    let (controller, _repo) = controller().await;
    let ticket = controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();
    let result = controller.clear_emergency(Some(ticket.event_id + 100)).await.unwrap();
    assert!(result.is_none());
    assert!(controller.get_emergency_status().await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_clear_mid_corridor_stops_traversal() {
    let (controller, _repo) = controller().await;
    controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();

    sleep_secs(10).await;
    controller.clear_emergency(None).await.unwrap();

    sleep_secs(60).await;
    let s = snapshot(&controller).await;
    for intersection in [1, 2, 3] {
        assert!(s.is_all_red(id(intersection)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_auto_clear_after_timeout() {
    let (controller, repo) = controller().await;
    let ticket = controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();

    // Corridor reaches intersection 3 at t = 40, auto-clear fires at t = 160.
    sleep_secs(155).await;
    assert!(controller.get_emergency_status().await.unwrap().is_some());

    sleep_secs(10).await;
    assert!(controller.get_emergency_status().await.unwrap().is_none());
    let updates = repo.emergency_log_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].event_id, ticket.event_id);

    // A manual clear afterwards is a no-op.
    assert!(controller.clear_emergency(None).await.unwrap().is_none());
    assert_eq!(repo.emergency_log_updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_timer_never_clears_next_emergency() {
    let (controller, repo) = controller().await;
    let first = controller.trigger_emergency(id(5), id(9), "FIRE").await.unwrap();

    // First corridor completes at t = 20, its monitor would fire at t = 140.
    sleep_secs(30).await;
    controller.clear_emergency(Some(first.event_id)).await.unwrap();
    let second = controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();

    // Past the first monitor's deadline, before the second's (t = 190).
    sleep_secs(120).await;
    let active = controller.get_emergency_status().await.unwrap().unwrap();
    assert_eq!(active.id, second.event_id);

    let updates = repo.emergency_log_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].event_id, first.event_id);

    sleep_secs(60).await;
    assert!(controller.get_emergency_status().await.unwrap().is_none());
    assert_eq!(repo.emergency_log_updates().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_log_failure_is_reported_but_corridor_runs() {
    let (controller, repo) = controller().await;
    repo.fail_emergency_log(true);

    let err = controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap_err();
    assert!(matches!(err, ControlError::Unlogged { .. }));
    let ticket = err.ticket().unwrap();
    let active = controller.get_emergency_status().await.unwrap().unwrap();
    assert_eq!(active.id, ticket.event_id);
    assert_eq!(active.route, ticket.path);

    sleep_secs(25).await;
    assert!(corridor_green(&snapshot(&controller).await, 2));

    let err = controller.clear_emergency(None).await.unwrap_err();
    assert!(matches!(err, ControlError::Persistence(_)));
    assert!(controller.get_emergency_status().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clear_during_trigger_logging_marks_entry_cleared() {
    let (controller, repo) = controller().await;
    repo.delay_emergency_log(Duration::from_millis(50));

    let trigger = tokio::spawn({
        let controller = controller.clone();
        async move { controller.trigger_emergency(id(5), id(9), "FIRE").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let cleared = controller.clear_emergency(None).await.unwrap().unwrap();
    let ticket = trigger.await.unwrap().unwrap();
    assert_eq!(cleared.id, ticket.event_id);

    let log = repo.emergency_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, EmergencyStatus::Cleared);
    assert_eq!(repo.emergency_log_updates().len(), 1);
    assert!(controller.get_emergency_status().await.unwrap().is_none());

    // The corridor was cancelled along with the event.
    sleep_secs(30).await;
    let s = snapshot(&controller).await;
    assert!(s.is_all_red(id(5)));
    assert!(s.is_all_red(id(9)));
}

#[tokio::test(start_paused = true)]
async fn test_custom_corridor_timing() {
    let config = ControllerConfig {
        corridor_green_secs: 5,
        auto_clear_secs: 10,
        ..manual_config()
    };
    let (controller, _repo) = controller_with(config).await;
    controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();

    sleep_secs(7).await;
    let s = snapshot(&controller).await;
    assert!(s.intersection(id(2)).all(|a| a.state.green_time == 5));

    // Reaches 3 at t = 10, cleared at t = 20.
    sleep_secs(14).await;
    assert!(controller.get_emergency_status().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_clears_live_emergency() {
    let (controller, repo) = controller().await;
    controller.trigger_emergency(id(1), id(3), "AMBULANCE").await.unwrap();
    let handle = controller.spawn_scheduler();

    controller.shutdown().await;
    assert!(controller.get_emergency_status().await.unwrap().is_none());
    assert_eq!(repo.emergency_log_updates().len(), 1);

    sleep_secs(1).await;
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_routes_are_listed() {
    let (controller, _repo) = controller().await;
    let routes = controller.list_emergency_routes().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].path, vec![id(1), id(2), id(3)]);
    assert_eq!(controller.list_intersections().len(), 5);
}
