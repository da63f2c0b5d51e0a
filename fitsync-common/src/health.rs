//! Liveness probe payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the process started serving.
    pub uptime: f64,
    pub environment: String,
}
