pub mod clock;
pub mod config;
pub mod control_system;
pub mod error;
pub mod global_variables;
pub mod models;
pub mod repository;
pub mod shared_data;

pub use clock::{Clock, TokioClock};
pub use config::ControllerConfig;
pub use control_system::TrafficLightController;
pub use error::{ControlError, Result};
