use actix_web::{HttpResponse, Responder, get, web};

use super::{AppState, external_error, not_found};

#[get("/submissions/{id}")]
pub async fn get_submission_handler(
    state: web::Data<AppState>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let submission_id = path.into_inner().0;

    match state.store.fetch(&submission_id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => {
            log::info!("Got nothing with submission id {submission_id} from database");
            not_found(format!("Submission {submission_id} not found."))
        }
        Err(e) => {
            log::error!("Failed to retrieve submission {submission_id}: {e:#}");
            external_error()
        }
    }
}
