// Scheduler cadence
pub const DEFAULT_CYCLE_TIME_SECS: u64 = 60;

// Emergency corridor timing
pub const DEFAULT_CORRIDOR_GREEN_SECS: u64 = 20;
pub const DEFAULT_AUTO_CLEAR_SECS: u64 = 120;

// Store critical section
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

// Csv mirror
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const SIGNAL_STATE_CSV: &str = "signal_state.csv";
pub const EMERGENCY_LOG_CSV: &str = "emergency_log.csv";

// Environment overrides
pub const ENV_CONFIG_PATH: &str = "TRAFFIC_CONFIG";
pub const ENV_CYCLE_TIME: &str = "TRAFFIC_CYCLE_TIME";
pub const ENV_CORRIDOR_GREEN: &str = "TRAFFIC_CORRIDOR_GREEN";
pub const ENV_AUTO_CLEAR: &str = "TRAFFIC_AUTO_CLEAR";
pub const ENV_LOG_DIR: &str = "TRAFFIC_LOG_DIR";
