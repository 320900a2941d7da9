use super::*;

#[post("/jobs")]
pub async fn post_job_handler(
    state: web::Data<AppState>,
    body: web::Json<EnqueueRequest>,
) -> impl Responder {
    let request = body.into_inner();
    if let Err(e) = request.payload.validate() {
        return invalid_argument(e.to_string());
    }
    let job_id = request.payload.submission_id.clone();

    // A submission already in the queue keeps its current state
    match state.queue.submit(&request.payload, request.options()).await {
        Ok(true) => HttpResponse::Ok().json(EnqueueResponse { job_id }),
        Ok(false) => {
            log::info!("Job {job_id} already queued, not added again");
            HttpResponse::Ok().json(EnqueueResponse { job_id })
        }
        Err(e) => {
            log::error!("Failed to enqueue job {job_id}: {e:#}");
            external_error()
        }
    }
}
