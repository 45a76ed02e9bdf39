// control_system/mod.rs
pub mod adaptive_scheduler;
pub mod density_policy;
pub mod emergency_coordinator;
pub mod signal_state_store;
pub mod traffic_light_controller;

pub use adaptive_scheduler::{AdaptiveScheduler, SignalDecision, TickOutcome, TickReport};
pub use density_policy::{DensityLevel, DensityStep, GreenTimePolicy, StepDensityPolicy};
pub use emergency_coordinator::EmergencyCoordinator;
pub use signal_state_store::{CorridorPhase, SignalScope, SignalStateStore, SignalWrite};
pub use traffic_light_controller::{SchedulerHandle, TrafficLightController};
