use serde::{Deserialize, Serialize};

/// Maps an approach's vehicle count to the green time it is granted.
pub trait GreenTimePolicy: Send + Sync {
    /// Green time in seconds.
    fn green_time(&self, vehicle_count: u32) -> u32;
}

impl<F> GreenTimePolicy for F
where
    F: Fn(u32) -> u32 + Send + Sync,
{
    fn green_time(&self, vehicle_count: u32) -> u32 {
        self(vehicle_count)
    }
}

/// One step of a [`StepDensityPolicy`]: counts up to `max_count` get `green_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensityStep {
    pub max_count: u32,
    pub green_secs: u32,
}

/// Step function over vehicle count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDensityPolicy {
    steps: Vec<DensityStep>,
    saturated_secs: u32,
}

impl StepDensityPolicy {
    /// Steps are sorted by `max_count`; counts above the last step get `saturated_secs`.
    pub fn new(mut steps: Vec<DensityStep>, saturated_secs: u32) -> Self {
        steps.sort_by_key(|s| s.max_count);
        Self {
            steps,
            saturated_secs,
        }
    }
}

impl Default for StepDensityPolicy {
    // <=5 -> 10s, <=15 -> 20s, otherwise 30s
    fn default() -> Self {
        Self::new(
            vec![
                DensityStep {
                    max_count: 5,
                    green_secs: 10,
                },
                DensityStep {
                    max_count: 15,
                    green_secs: 20,
                },
            ],
            30,
        )
    }
}

impl GreenTimePolicy for StepDensityPolicy {
    fn green_time(&self, vehicle_count: u32) -> u32 {
        self.steps
            .iter()
            .find(|s| vehicle_count <= s.max_count)
            .map(|s| s.green_secs)
            .unwrap_or(self.saturated_secs)
    }
}

/// Coarse congestion label for an approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DensityLevel {
    Low,
    Medium,
    High,
}

impl DensityLevel {
    pub fn from_count(vehicle_count: u32) -> Self {
        match vehicle_count {
            0..=5 => DensityLevel::Low,
            6..=15 => DensityLevel::Medium,
            _ => DensityLevel::High,
        }
    }
}
