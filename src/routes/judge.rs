use actix_web::{HttpResponse, Responder, post, web};

use super::{AppState, external_error, invalid_argument};
use crate::engine::NoProgress;
use crate::submission::JobPayload;
use crate::verdict::JudgeResult;

const SYNC_WORKER: &str = "sync";

/// Judges one payload in place and answers with its result
#[post("/judge")]
pub async fn post_judge_handler(
    state: web::Data<AppState>,
    body: web::Json<JobPayload>,
) -> impl Responder {
    let payload = body.into_inner();
    if let Err(e) = payload.validate() {
        return invalid_argument(e.to_string());
    }
    let submission_id = payload.submission_id.clone();

    let Ok(_slot) = state.sync_slots.acquire().await else {
        log::error!("Synchronous judging slots were closed");
        return external_error();
    };

    if let Err(e) = state.store.mark_judging(&submission_id, SYNC_WORKER, 1).await {
        log::error!("Failed to mark submission {submission_id} as judging: {e:#}");
        return external_error();
    }

    let result = match state
        .judge
        .judge(&payload.submission(), &payload.problem, &NoProgress)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            log::error!("Synchronous judging of {submission_id} failed: {e:#}");
            JudgeResult::internal_error()
        }
    };

    if let Err(e) = state.store.save_result(&submission_id, &result).await {
        log::error!("Failed to save result of submission {submission_id}: {e:#}");
        return external_error();
    }

    HttpResponse::Ok().json(result)
}
