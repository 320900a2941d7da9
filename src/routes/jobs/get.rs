use super::*;

#[get("/jobs/{id}")]
pub async fn get_job_handler(
    state: web::Data<AppState>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let job_id = path.into_inner().0;

    match state.queue.status(&job_id).await {
        Ok(Some(status)) => HttpResponse::Ok().json(status),
        Ok(None) => {
            log::info!("Got nothing with job id {job_id} from queue");
            not_found(format!("Job {job_id} not found."))
        }
        Err(e) => {
            log::error!("Failed to retrieve job {job_id}: {e}");
            external_error()
        }
    }
}

#[get("/queue/stats")]
pub async fn get_queue_stats_handler(state: web::Data<AppState>) -> impl Responder {
    match state.queue.stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            log::error!("Failed to count queue jobs: {e}");
            external_error()
        }
    }
}
