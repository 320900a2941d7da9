use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use super::AppState;
use crate::config::Mode;
use crate::create_timestamp;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: &'static str,
    workers: usize,
    timestamp: String,
}

#[get("/health")]
pub async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let workers = state.health.alive();
    // A worker-mode process with no live consumer cannot make progress
    let healthy = state.mode == Mode::Sync || workers > 0;

    let body = HealthResponse {
        status: if healthy { "ok" } else { "unavailable" },
        mode: state.mode.as_str(),
        workers,
        timestamp: create_timestamp(),
    };

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        log::warn!("Health check failed: no live workers");
        HttpResponse::ServiceUnavailable().json(body)
    }
}
