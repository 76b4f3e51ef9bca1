//! Health check handler

use axum::{extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{response::SuccessEnvelope, state::AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthData {
    /// RFC 3339 time of the check
    pub timestamp: String,
    /// Seconds since the gateway started
    pub uptime: f64,
}

/// Liveness of the gateway process; backends are not probed
pub async fn health_check(State(state): State<AppState>) -> Json<SuccessEnvelope<HealthData>> {
    Json(SuccessEnvelope::new(
        "API Gateway running correctly",
        HealthData {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            uptime: state.uptime().as_secs_f64(),
        },
    ))
}
