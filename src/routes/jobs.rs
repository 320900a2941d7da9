mod get;
mod post;

pub use get::{get_job_handler, get_queue_stats_handler};
pub use post::post_job_handler;

use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use super::{AppState, external_error, invalid_argument, not_found};
use crate::queue::EnqueueOptions;
use crate::submission::JobPayload;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub payload: JobPayload,
    /// Lower values are judged first
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub delay_ms: u64,
}

impl EnqueueRequest {
    fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            delay: std::time::Duration::from_millis(self.delay_ms),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    job_id: String,
}
