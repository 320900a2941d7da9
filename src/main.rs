use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use judger::config::{CliArgs, Config, Mode};
use judger::database as db;
use judger::engine::Judge;
use judger::queue::{JobQueue, QueuePolicy};
use judger::rate_limit::RateLimiter;
use judger::routes::AppState;
use judger::sandbox::{DockerSandbox, SandboxRuntime};
use judger::store::{ResultStore, SqliteResultStore};
use judger::web_server::build_server;
use judger::worker::{Pipeline, PoolHealth, pruner, spawn_workers, stall_reaper};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        database: database_path,
        queue: queue_config,
        worker: worker_config,
        sandbox: sandbox_config,
    } = cli.to_config().expect("Failed to load configuration");

    let db_path = database_path.unwrap_or_else(db::get_db_path);
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize database");

    let work_root = sandbox_config
        .work_root()
        .expect("Failed to prepare sandbox work directory");
    let host_work_root = sandbox_config.host_work_dir.clone();
    let sandbox = DockerSandbox::connect(sandbox_config).expect("Failed to set up Docker sandbox");
    if let Err(e) = sandbox.ping().await {
        log::warn!("{e:#}, judging will fail until the daemon is reachable");
    }

    let sandbox: Arc<dyn SandboxRuntime> = Arc::new(sandbox);
    let judge = Arc::new(Judge::new(sandbox, work_root, host_work_root));
    let job_queue = Arc::new(JobQueue::new(
        db_pool.clone(),
        QueuePolicy::from(&queue_config),
    ));
    let store: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::new(db_pool));
    let limiter = Arc::new(RateLimiter::new(
        worker_config.rate_limit.max,
        Duration::from_millis(worker_config.rate_limit.duration_ms),
    ));
    let pipeline = Arc::new(Pipeline {
        queue: job_queue.clone(),
        store: store.clone(),
        judge: judge.clone(),
        limiter,
    });
    let health = Arc::new(PoolHealth::default());
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    if cli.mode == Mode::Worker {
        spawn_workers(
            &mut workers,
            worker_config.concurrency,
            &pipeline,
            &health,
            &shutdown_token,
        );
        workers.spawn(stall_reaper(
            job_queue.clone(),
            store.clone(),
            Duration::from_secs(queue_config.stall_check_interval_secs.max(1)),
            shutdown_token.clone(),
        ));
        workers.spawn(pruner(
            job_queue.clone(),
            queue_config.retention.clone(),
            Duration::from_secs(queue_config.prune_interval_secs.max(1)),
            shutdown_token.clone(),
        ));
        log::info!("Started {} workers", worker_config.concurrency);
    } else {
        log::info!(
            "Synchronous mode, judging up to {} requests at once",
            worker_config.concurrency
        );
    }

    let state = AppState {
        mode: cli.mode,
        queue: job_queue,
        store,
        judge,
        health,
        sync_slots: Arc::new(Semaphore::new(worker_config.concurrency)),
    };
    let server = build_server(server_config, state).expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A background task terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Stop accepting requests, letting in-flight ones finish
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker finishes its current job
    while let Some(res) = workers.join_next().await {
        match res {
            Ok(Err(e)) => log::error!("Background task finished with error: {e:#}"),
            Err(e) if e.is_panic() => log::error!("Background task panicked: {:?}", e),
            Err(e) => log::error!("Background task handle failed: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
