mod common;

use std::sync::Arc;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Semaphore;

use judger::config::Mode;
use judger::queue::JobQueue;
use judger::routes::{AppState, configure, json_error_handler};
use judger::store::{ResultStore, SqliteResultStore};
use judger::worker::PoolHealth;

use common::*;

fn app_state(pool: sqlx::SqlitePool, guard: &TestEnvGuard, mode: Mode) -> AppState {
    AppState {
        mode,
        queue: Arc::new(JobQueue::new(pool.clone(), fast_policy())),
        store: Arc::new(SqliteResultStore::new(pool)),
        judge: Arc::new(judge_with(Arc::new(FakeSandbox::default()), &guard.work_root)),
        health: Arc::new(PoolHealth::default()),
        sync_slots: Arc::new(Semaphore::new(2)),
    }
}

fn sum_request(id: &str, source: &str) -> serde_json::Value {
    json!({
        "submissionId": id,
        "sourceCode": source,
        "language": "c++17",
        "problem": {
            "id": "sum",
            "testCases": [{"stdin": "5\n1 2 3 4 5", "expectedStdout": "15\n"}],
            "timeLimitSeconds": 2,
            "memoryLimitMB": 256,
            "maxPoint": 100
        }
    })
}

macro_rules! init_app {
    ($state:expr, $mode:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .configure(configure($mode)),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health_without_workers_is_unavailable() {
    let (pool, guard) = create_test_env("http_health").await;
    let app = init_app!(app_state(pool, &guard, Mode::Worker), Mode::Worker);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body,
        expected: json!({"status": "unavailable", "mode": "worker", "workers": 0})
    );
}

#[actix_web::test]
async fn test_health_in_sync_mode() {
    let (pool, guard) = create_test_env("http_health_sync").await;
    let app = init_app!(app_state(pool, &guard, Mode::Sync), Mode::Sync);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "sync");
    assert!(body["timestamp"].is_string());
}

#[actix_web::test]
async fn test_post_job_then_get_status() {
    let (pool, guard) = create_test_env("http_jobs").await;
    let state = app_state(pool, &guard, Mode::Worker);
    let queue = state.queue.clone();
    let store = state.store.clone();
    let app = init_app!(state, Mode::Worker);

    let mut request = sum_request("s1", "sum");
    request["priority"] = json!(3);
    let req = test::TestRequest::post()
        .uri("/jobs")
        .set_json(&request)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"jobId": "s1"}));

    let record = store.fetch("s1").await.unwrap().unwrap();
    assert_eq!(serde_json::to_value(record.status).unwrap(), "PENDING");

    let req = test::TestRequest::get().uri("/jobs/s1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body,
        expected: json!({"id": "s1", "state": "waiting", "priority": 3, "attempts": 0})
    );

    let req = test::TestRequest::get().uri("/queue/stats").to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!({"waiting": 1, "active": 0, "completed": 0, "failed": 0, "delayed": 0})
    );

    // Posting the same submission again does not queue a second job
    let req = test::TestRequest::post()
        .uri("/jobs")
        .set_json(&request)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(queue.stats().await.unwrap().waiting, 1);
}

#[actix_web::test]
async fn test_delayed_job_reports_delayed() {
    let (pool, guard) = create_test_env("http_delay").await;
    let app = init_app!(app_state(pool, &guard, Mode::Worker), Mode::Worker);

    let mut request = sum_request("s1", "sum");
    request["delayMs"] = json!(60_000);
    let req = test::TestRequest::post()
        .uri("/jobs")
        .set_json(&request)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri("/jobs/s1").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["state"], "delayed");
}

#[actix_web::test]
async fn test_unknown_job_is_not_found() {
    let (pool, guard) = create_test_env("http_404").await;
    let app = init_app!(app_state(pool, &guard, Mode::Worker), Mode::Worker);

    let req = test::TestRequest::get().uri("/jobs/nope").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_NOT_FOUND");
    assert_eq!(body["code"], 3);

    let req = test::TestRequest::get().uri("/submissions/nope").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_invalid_payloads_are_rejected() {
    let (pool, guard) = create_test_env("http_invalid").await;
    let app = init_app!(app_state(pool, &guard, Mode::Worker), Mode::Worker);

    let mut unknown_language = sum_request("s1", "sum");
    unknown_language["language"] = json!("rust");
    let req = test::TestRequest::post()
        .uri("/jobs")
        .set_json(&unknown_language)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");

    let mut bad_limit = sum_request("s2", "sum");
    bad_limit["problem"]["timeLimitSeconds"] = json!(0);
    let req = test::TestRequest::post()
        .uri("/jobs")
        .set_json(&bad_limit)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    for (field, value) in [("timeLimitSeconds", json!(1e20)), ("memoryLimitMB", json!(u64::MAX))] {
        let mut oversized = sum_request("s3", "sum");
        oversized["problem"][field] = value;
        let req = test::TestRequest::post()
            .uri("/jobs")
            .set_json(&oversized)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400, "{field}");
    }
}

#[actix_web::test]
async fn test_sync_mode_judges_in_place() {
    let (pool, guard) = create_test_env("http_sync").await;
    let state = app_state(pool, &guard, Mode::Sync);
    let store = state.store.clone();
    let app = init_app!(state, Mode::Sync);

    let req = test::TestRequest::post()
        .uri("/judge")
        .set_json(sum_request("s1", "print:14"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body,
        expected: json!({"status": "WA", "point": 0.0, "testCases": [{"status": "WA", "index": 1}]})
    );

    let req = test::TestRequest::get().uri("/submissions/s1").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "WA");
    assert_eq!(body["workerId"], "sync");
    assert!(store.fetch("s1").await.unwrap().is_some());

    // Queue routes only exist in worker mode
    let req = test::TestRequest::post()
        .uri("/jobs")
        .set_json(sum_request("s2", "sum"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_sync_mode_hides_sandbox_failures() {
    let (pool, guard) = create_test_env("http_sync_ie").await;
    let app = init_app!(app_state(pool, &guard, Mode::Sync), Mode::Sync);

    let req = test::TestRequest::post()
        .uri("/judge")
        .set_json(sum_request("s1", "broken"))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "IE");
    assert!(!body["diagnostics"].as_str().unwrap().contains("docker"));
}
