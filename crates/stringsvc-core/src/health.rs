use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Serving,
    NotServing,
}

impl HealthStatus {
    pub fn is_serving(self) -> bool {
        self == HealthStatus::Serving
    }
}

impl From<bool> for HealthStatus {
    fn from(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Serving
        } else {
            HealthStatus::NotServing
        }
    }
}
