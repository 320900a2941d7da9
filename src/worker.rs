use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::engine::{Judge, JudgeProgress, ProgressSink};
use crate::queue::{ClaimedJob, FailOutcome, JobQueue, StallOutcome};
use crate::rate_limit::RateLimiter;
use crate::store::ResultStore;
use crate::submission::JobPayload;
use crate::verdict::{JudgeResult, Status};

/// Collaborators shared by every worker of the pool
pub struct Pipeline {
    pub queue: Arc<JobQueue>,
    pub store: Arc<dyn ResultStore>,
    pub judge: Arc<Judge>,
    pub limiter: Arc<RateLimiter>,
}

/// Number of workers currently running
#[derive(Debug, Default)]
pub struct PoolHealth {
    alive: AtomicUsize,
}

impl PoolHealth {
    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> AliveGuard {
        self.alive.fetch_add(1, Ordering::SeqCst);
        AliveGuard(self.clone())
    }
}

struct AliveGuard(Arc<PoolHealth>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns `count` workers into `set`, each owning at most one job at a time
pub fn spawn_workers(
    set: &mut JoinSet<anyhow::Result<()>>,
    count: usize,
    pipeline: &Arc<Pipeline>,
    health: &Arc<PoolHealth>,
    token: &CancellationToken,
) {
    let instance = Uuid::new_v4().simple().to_string();
    for i in 1..=count {
        let owner = format!("worker-{i}-{}", &instance[..8]);
        set.spawn(worker(
            owner,
            pipeline.clone(),
            health.clone(),
            token.clone(),
        ));
    }
}

pub async fn worker(
    owner: String,
    pipeline: Arc<Pipeline>,
    health: Arc<PoolHealth>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let _alive = health.enter();
    log::info!("Worker {owner} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {owner} received shutdown signal, stopping");
                break;
            }

            claimed = pipeline.queue.pop(&owner) => {
                match claimed {
                    Ok(job) => {
                        log::info!(
                            "Worker {owner} got job {} from queue (attempt {}/{})",
                            job.id,
                            job.attempt,
                            job.max_attempts
                        );
                        process_job(&owner, &pipeline, job).await;
                    }
                    Err(e) => {
                        log::error!("Worker {owner} failed to claim a job: {e}");
                        tokio::time::sleep(pipeline.queue.policy().poll_interval).await;
                    }
                }
            }
        };
    }

    log::info!("Worker {owner} has shut down gracefully");
    Ok(())
}

async fn process_job(owner: &str, pipeline: &Pipeline, job: ClaimedJob) {
    let payload = match decode_payload(&job.payload) {
        Ok(payload) => payload,
        Err(e) => {
            // Retrying cannot fix the payload
            let e = e.context(format!("Job {} has an unusable payload", job.id));
            handle_failure(owner, pipeline, &job, e, false).await;
            return;
        }
    };

    pipeline.limiter.acquire().await;

    if let Err(e) = pipeline
        .store
        .mark_judging(&job.id, owner, job.attempt)
        .await
    {
        let e = e.context(format!("Failed to mark submission {} as judging", job.id));
        handle_failure(owner, pipeline, &job, e, true).await;
        return;
    }

    let heartbeat = Heartbeat::start(
        pipeline.queue.clone(),
        job.id.clone(),
        owner.to_string(),
        pipeline.queue.policy().lease / 3,
    );
    let sink = QueueProgress {
        queue: pipeline.queue.clone(),
        job_id: job.id.clone(),
    };
    let outcome = pipeline
        .judge
        .judge(&payload.submission(), &payload.problem, &sink)
        .await;
    heartbeat.stop().await;

    let result = match outcome {
        Ok(result) if result.status() != Status::InternalError => result,
        Ok(_) => {
            let e = anyhow!("Judging submission {} produced an internal error", job.id);
            handle_failure(owner, pipeline, &job, e, true).await;
            return;
        }
        Err(e) => {
            handle_failure(owner, pipeline, &job, e, true).await;
            return;
        }
    };

    // A job reclaimed while it was judged belongs to its new owner
    match pipeline.queue.extend_lease(&job.id, owner).await {
        Ok(true) => {}
        Ok(false) => {
            log::warn!(
                "Job {} was reclaimed from worker {owner}, discarding its result",
                job.id
            );
            return;
        }
        Err(e) => {
            let e = anyhow::Error::from(e)
                .context(format!("Failed to confirm the lease of job {}", job.id));
            handle_failure(owner, pipeline, &job, e, true).await;
            return;
        }
    }

    if let Err(e) = pipeline.store.save_result(&job.id, &result).await {
        let e = e.context(format!("Failed to save result of submission {}", job.id));
        handle_failure(owner, pipeline, &job, e, true).await;
        return;
    }

    let summary = match serde_json::to_value(&result.verdict) {
        Ok(summary) => summary,
        Err(e) => {
            log::error!("Failed to encode verdict of job {}: {e}", job.id);
            serde_json::Value::Null
        }
    };
    match pipeline.queue.complete(&job.id, owner, &summary).await {
        Ok(true) => log::info!("Job {} finished on worker {owner}", job.id),
        Ok(false) => log::warn!("Job {} lost its lease before completing", job.id),
        Err(e) => log::error!("Failed to complete job {}: {e}", job.id),
    }
}

fn decode_payload(raw: &str) -> anyhow::Result<JobPayload> {
    let payload: JobPayload = serde_json::from_str(raw)?;
    payload.validate()?;
    Ok(payload)
}

/// Hands a failed attempt to the queue's retry policy and keeps the stored
/// submission consistent with what the queue decided
async fn handle_failure(
    owner: &str,
    pipeline: &Pipeline,
    job: &ClaimedJob,
    error: anyhow::Error,
    retryable: bool,
) {
    log::error!(
        "Job {} attempt {}/{} failed: {error:#}",
        job.id,
        job.attempt,
        job.max_attempts
    );

    // Only the outermost message reaches the queue record
    let reason = error.to_string();
    match pipeline.queue.fail(&job.id, owner, &reason, retryable).await {
        Ok(FailOutcome::Retrying { attempt, delay }) => {
            log::warn!(
                "Job {} will be retried in {}ms after attempt {attempt}",
                job.id,
                delay.as_millis()
            );
            if let Err(e) = pipeline.store.mark_pending(&job.id).await {
                log::error!("Failed to mark submission {} as pending: {e:#}", job.id);
            }
        }
        Ok(FailOutcome::Exhausted { attempts }) => {
            log::error!("Job {} failed for good after {attempts} attempts", job.id);
            if let Err(e) = pipeline
                .store
                .save_result(&job.id, &JudgeResult::internal_error())
                .await
            {
                log::error!("Failed to save internal error for submission {}: {e:#}", job.id);
            }
        }
        Ok(FailOutcome::NotOwned) => {
            log::warn!("Job {} was reclaimed before its failure could be recorded", job.id);
        }
        Err(e) => {
            log::error!("Failed to record failure of job {}: {e}", job.id);
        }
    }
}

/// Publishes judge progress on the queue record
struct QueueProgress {
    queue: Arc<JobQueue>,
    job_id: String,
}

#[async_trait]
impl ProgressSink for QueueProgress {
    async fn report(&self, progress: JudgeProgress) {
        let value = match serde_json::to_value(&progress) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to encode progress of job {}: {e}", self.job_id);
                return;
            }
        };
        if let Err(e) = self.queue.update_progress(&self.job_id, &value).await {
            log::warn!("Failed to update progress of job {}: {e}", self.job_id);
        }
    }
}

/// Keeps the lease of an active job alive while it is being judged
struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn start(queue: Arc<JobQueue>, job_id: String, owner: String, every: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let every = every.max(Duration::from_millis(100));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(every) => {
                        match queue.extend_lease(&job_id, &owner).await {
                            Ok(true) => {}
                            Ok(false) => {
                                log::warn!("Lease of job {job_id} was lost by {owner}");
                                break;
                            }
                            Err(e) => log::warn!("Failed to extend lease of job {job_id}: {e}"),
                        }
                    }
                }
            }
        });

        Self { token, handle }
    }

    async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            log::warn!("Heartbeat task failed: {e}");
        }
    }
}

/// Periodically returns abandoned jobs to the queue
pub async fn stall_reaper(
    queue: Arc<JobQueue>,
    store: Arc<dyn ResultStore>,
    every: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let outcomes = match queue.reclaim_stalled().await {
                    Ok(outcomes) => outcomes,
                    Err(e) => {
                        log::error!("Failed to check for stalled jobs: {e}");
                        continue;
                    }
                };
                for outcome in outcomes {
                    let stored = match &outcome {
                        StallOutcome::Requeued(id) => {
                            log::warn!("Job {id} stalled and was returned to the queue");
                            store.mark_pending(id).await
                        }
                        StallOutcome::Failed(id) => {
                            log::error!("Job {id} stalled too many times and was failed");
                            store.save_result(id, &JudgeResult::internal_error()).await
                        }
                    };
                    if let Err(e) = stored {
                        log::error!("Failed to update submission after stall ({outcome:?}): {e:#}");
                    }
                }
            }
        }
    }
    log::info!("Stall reaper stopped");
    Ok(())
}

/// Periodically drops finished jobs beyond the retention window
pub async fn pruner(
    queue: Arc<JobQueue>,
    retention: RetentionConfig,
    every: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.prune(&retention).await {
                    log::error!("Failed to prune finished jobs: {e}");
                }
            }
        }
    }
    log::info!("Pruner stopped");
    Ok(())
}
