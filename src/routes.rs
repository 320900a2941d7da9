mod health;
mod jobs;
mod judge;
mod submissions;

pub use health::health_handler;
pub use jobs::{EnqueueRequest, get_job_handler, get_queue_stats_handler, post_job_handler};
pub use judge::post_judge_handler;
pub use submissions::get_submission_handler;

use std::sync::Arc;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::Mode;
use crate::engine::Judge;
use crate::queue::JobQueue;
use crate::store::ResultStore;
use crate::worker::PoolHealth;

/// Shared by every handler
pub struct AppState {
    pub mode: Mode,
    pub queue: Arc<JobQueue>,
    pub store: Arc<dyn ResultStore>,
    pub judge: Arc<Judge>,
    pub health: Arc<PoolHealth>,
    /// Bounds synchronous judging to the configured concurrency
    pub sync_slots: Arc<Semaphore>,
}

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

#[derive(Serialize)]
struct ErrorResponseWithMessage {
    reason: &'static str,
    code: u32,
    message: String,
}

fn invalid_argument(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message,
    })
}

fn not_found(message: String) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponseWithMessage {
        reason: "ERR_NOT_FOUND",
        code: 3,
        message,
    })
}

fn external_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse {
        reason: "ERR_EXTERNAL",
        code: 5,
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message: err.to_string(),
    });
    InternalError::from_response(err, response).into()
}

/// Registers the routes available in `mode`
pub fn configure(mode: Mode) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(health_handler).service(get_submission_handler);
        match mode {
            Mode::Worker => {
                cfg.service(post_job_handler)
                    .service(get_job_handler)
                    .service(get_queue_stats_handler);
            }
            Mode::Sync => {
                cfg.service(post_judge_handler);
            }
        }
    }
}
