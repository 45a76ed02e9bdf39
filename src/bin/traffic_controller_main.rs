// traffic_controller_main.rs
use rand::Rng;
use smart_traffic::control_system::TickOutcome;
use smart_traffic::models::emergency::EmergencyRoute;
use smart_traffic::models::intersection::{Direction, Intersection, IntersectionId, RoadId};
use smart_traffic::repository::{CsvMirrorRepository, InMemoryRepository, SeedData};
use smart_traffic::{ControllerConfig, TokioClock, TrafficLightController};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const ENV_SEED_PATH: &str = "TRAFFIC_SEED";

// Four intersections along two parallel avenues, with one predefined hospital route.
fn demo_seed() -> SeedData {
    SeedData {
        intersections: vec![
            Intersection::new(
                1,
                "Main St & 1st Ave",
                vec![(1, "Main St", Direction::North), (2, "1st Ave", Direction::East)],
            ),
            Intersection::new(
                2,
                "Main St & 2nd Ave",
                vec![(1, "Main St", Direction::North), (3, "2nd Ave", Direction::East)],
            ),
            Intersection::new(
                3,
                "Main St & 3rd Ave",
                vec![(1, "Main St", Direction::South), (4, "3rd Ave", Direction::West)],
            ),
            Intersection::new(
                4,
                "Oak St & 3rd Ave",
                vec![(5, "Oak St", Direction::North), (4, "3rd Ave", Direction::East)],
            ),
        ],
        routes: vec![EmergencyRoute {
            route_id: 1,
            name: "Main St to City Hospital".to_string(),
            start: IntersectionId(1),
            end: IntersectionId(3),
            path: vec![IntersectionId(1), IntersectionId(2), IntersectionId(3)],
        }],
        samples: Vec::new(),
    }
}

fn load_repository() -> Result<InMemoryRepository, Box<dyn std::error::Error>> {
    match std::env::var(ENV_SEED_PATH) {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(InMemoryRepository::from_json(&json)?)
        }
        Err(_) => Ok(InMemoryRepository::new(demo_seed())),
    }
}

// Simulated road sensors: a random count for a random approach every few seconds.
async fn run_sensors(controller: TrafficLightController) {
    let approaches: Vec<(IntersectionId, RoadId)> = controller
        .list_intersections()
        .iter()
        .flat_map(|i| i.approaches.iter().map(move |a| (i.id, a.road_id)))
        .collect();
    if approaches.is_empty() {
        return;
    }
    loop {
        let (intersection_id, road_id, count) = {
            let mut rng = rand::rng();
            let (i, r) = approaches[rng.random_range(0..approaches.len())];
            (i, r, rng.random_range(0..=25))
        };
        if let Err(e) = controller
            .record_traffic_sample(intersection_id, road_id, count)
            .await
        {
            log::warn!("Sensor update rejected: {}", e);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

fn print_help() {
    println!("\nTraffic Controller Admin CLI");
    println!("  status                         show every approach signal");
    println!("  intersections                  list the intersection catalog");
    println!("  routes                         list predefined emergency routes");
    println!("  traffic <int> <road> <count>   record a vehicle count");
    println!("  tick                           re-time signals now");
    println!("  trigger <start> <end> <type>   open a green corridor");
    println!("  clear [event_id]               clear the active emergency");
    println!("  emergency                      show the active emergency");
    println!("  quit");
}

async fn print_status(controller: &TrafficLightController) {
    match controller.get_signal_status().await {
        Ok(snapshot) => {
            for a in snapshot.approaches {
                println!(
                    "Intersection {} road {} ({:?}): {:?} {}s",
                    a.intersection_id, a.road_id, a.direction, a.state.signal_color, a.state.green_time
                );
            }
        }
        Err(e) => eprintln!("Error reading signal status: {}", e),
    }
}

fn parse_ids(parts: &[&str]) -> Option<Vec<u32>> {
    parts.iter().map(|p| p.parse::<u32>().ok()).collect()
}

async fn handle_command(controller: &TrafficLightController, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [] => {}
        ["status"] => print_status(controller).await,
        ["intersections"] => {
            for i in controller.list_intersections() {
                println!("{} {} roads {:?}", i.id, i.name, i.approaches);
            }
        }
        ["routes"] => match controller.list_emergency_routes().await {
            Ok(routes) => {
                for r in routes {
                    println!("{} {}: {} -> {} via {:?}", r.route_id, r.name, r.start, r.end, r.path);
                }
            }
            Err(e) => eprintln!("Error listing routes: {}", e),
        },
        ["traffic", rest @ ..] if rest.len() == 3 => match parse_ids(rest) {
            Some(ids) => {
                match controller
                    .record_traffic_sample(IntersectionId(ids[0]), RoadId(ids[1]), ids[2])
                    .await
                {
                    Ok(Some(TickOutcome::Skipped)) => println!("Recorded; emergency active, signals unchanged."),
                    Ok(_) => println!("Recorded."),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            None => println!("Usage: traffic <int> <road> <count>"),
        },
        ["tick"] => match controller.run_tick_now().await {
            Ok(TickOutcome::Skipped) => println!("Emergency active, tick skipped."),
            Ok(TickOutcome::Applied(report)) => println!(
                "Re-timed {} intersections ({} mirror failures).",
                report.decisions.len(),
                report.persistence_failures.len()
            ),
            Err(e) => eprintln!("Tick failed: {}", e),
        },
        ["trigger", start, end, kind] => match parse_ids(&[*start, *end]) {
            Some(ids) => match controller
                .trigger_emergency(IntersectionId(ids[0]), IntersectionId(ids[1]), kind)
                .await
            {
                Ok(ticket) => println!("Emergency {} corridor {:?}", ticket.event_id, ticket.path),
                Err(e) => match e.ticket() {
                    Some(ticket) => println!(
                        "Emergency {} corridor {:?} (not logged: {})",
                        ticket.event_id, ticket.path, e
                    ),
                    None => eprintln!("Trigger rejected: {}", e),
                },
            },
            None => println!("Usage: trigger <start> <end> <type>"),
        },
        ["clear"] => report_clear(controller.clear_emergency_and_retick(None).await),
        ["clear", id] => match id.parse::<u64>() {
            Ok(id) => report_clear(controller.clear_emergency_and_retick(Some(id)).await),
            Err(_) => println!("Usage: clear [event_id]"),
        },
        ["emergency"] => match controller.get_emergency_status().await {
            Ok(Some(event)) => {
                println!(
                    "Emergency {} ({}) since {} along {:?}",
                    event.id, event.emergency_type, event.created_at, event.route
                );
                if let Ok(Some(phase)) = controller.get_corridor_phase().await {
                    println!("Corridor phase: {:?}", phase);
                }
            }
            Ok(None) => println!("No active emergency."),
            Err(e) => eprintln!("Error: {}", e),
        },
        ["quit"] | ["exit"] => return false,
        _ => print_help(),
    }
    true
}

fn report_clear(result: smart_traffic::Result<Option<smart_traffic::models::emergency::EmergencyEvent>>) {
    match result {
        Ok(Some(event)) => println!("Emergency {} cleared.", event.id),
        Ok(None) => println!("No matching active emergency."),
        Err(e) => eprintln!("Cleared, but logging failed: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ControllerConfig::from_env_or_default()?;
    let repository = CsvMirrorRepository::new(load_repository()?, config.log_dir.clone())?;
    let controller =
        TrafficLightController::initialize(config, Arc::new(repository), Arc::new(TokioClock::new())).await?;

    let scheduler = controller.spawn_scheduler();
    let sensors = tokio::spawn(run_sensors(controller.clone()));

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !handle_command(&controller, line.trim()).await {
            break;
        }
    }

    println!("Shutting down...");
    sensors.abort();
    controller.shutdown().await;
    scheduler.shutdown().await;
    Ok(())
}
