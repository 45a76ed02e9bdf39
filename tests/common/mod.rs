#![allow(dead_code)]

use smart_traffic::models::emergency::EmergencyRoute;
use smart_traffic::models::intersection::{Direction, Intersection, IntersectionId};
use smart_traffic::repository::{InMemoryRepository, SeedData};
use smart_traffic::{ControllerConfig, TokioClock, TrafficLightController};
use std::sync::Arc;

pub fn id(n: u32) -> IntersectionId {
    IntersectionId(n)
}

/// Intersections 1, 2, 3, 5 and 9 with two roads each; a predefined route 1 -> 2 -> 3.
pub fn seed() -> SeedData {
    SeedData {
        intersections: vec![
            Intersection::new(1, "I1", vec![(10, "A", Direction::North), (11, "B", Direction::East)]),
            Intersection::new(2, "I2", vec![(20, "C", Direction::North), (21, "D", Direction::West)]),
            Intersection::new(3, "I3", vec![(30, "E", Direction::South), (31, "F", Direction::East)]),
            Intersection::new(5, "I5", vec![(50, "G", Direction::North), (51, "H", Direction::East)]),
            Intersection::new(9, "I9", vec![(90, "J", Direction::South), (91, "K", Direction::West)]),
        ],
        routes: vec![EmergencyRoute {
            route_id: 1,
            name: "Hospital corridor".to_string(),
            start: id(1),
            end: id(3),
            path: vec![id(1), id(2), id(3)],
        }],
        samples: Vec::new(),
    }
}

pub fn manual_config() -> ControllerConfig {
    ControllerConfig {
        retick_on_sample: false,
        ..ControllerConfig::default()
    }
}

pub async fn controller_with(config: ControllerConfig) -> (TrafficLightController, Arc<InMemoryRepository>) {
    let repository = Arc::new(InMemoryRepository::new(seed()));
    let controller = TrafficLightController::initialize(config, repository.clone(), Arc::new(TokioClock::new()))
        .await
        .expect("controller initializes");
    (controller, repository)
}

pub async fn controller() -> (TrafficLightController, Arc<InMemoryRepository>) {
    controller_with(manual_config()).await
}
