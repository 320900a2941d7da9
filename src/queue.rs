use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tokio::sync::Notify;

use crate::config::{QueueConfig, RetentionConfig};
use crate::database::now_millis;
use crate::store::upsert_pending;
use crate::submission::JobPayload;

const STALLED_REASON: &str = "job stalled more than allowable limit";

#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub lease: Duration,
    pub poll_interval: Duration,
}

impl From<&QueueConfig> for QueuePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            lease: Duration::from_secs(config.lease_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
        }
    }
}

impl QueuePolicy {
    /// Delay before the retry that follows failed attempt number `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EnqueueOptions {
    /// Lower values are served first
    pub priority: i64,
    pub delay: Duration,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "waiting" => Self::Waiting,
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "delayed" => Self::Delayed,
            _ => return None,
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub state: JobState,
    pub priority: i64,
    pub progress: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// A job leased to one worker
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub payload: String,
    /// 1-based number of this attempt
    pub attempt: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    /// The lease was lost before the failure was recorded
    NotOwned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallOutcome {
    Requeued(String),
    Failed(String),
}

/// Durable judging queue backed by SQLite.
///
/// Every state transition is a single conditional `UPDATE`, so the database
/// decides which worker owns a job and the workers need no locks of their own.
pub struct JobQueue {
    pool: SqlitePool,
    notify: Notify,
    policy: QueuePolicy,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, policy: QueuePolicy) -> Self {
        Self {
            pool,
            notify: Notify::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Adds a judging job keyed by its submission id and returns that id.
    ///
    /// A submission that already has a job is not queued a second time.
    pub async fn enqueue(
        &self,
        payload: &JobPayload,
        options: EnqueueOptions,
    ) -> anyhow::Result<String> {
        let body = serde_json::to_string(payload)?;
        let id = payload.submission_id.clone();
        if self.push(&id, &body, options).await? {
            log::info!("Job {id} added to queue");
        } else {
            log::info!("Job {id} already exists, not queued again");
        }
        Ok(id)
    }

    /// Queues a submission and marks its record PENDING in one transaction.
    ///
    /// Returns `false` without touching the record when the id is already queued,
    /// so a worker never sees its JUDGING state overwritten by a late duplicate.
    pub async fn submit(&self, payload: &JobPayload, options: EnqueueOptions) -> anyhow::Result<bool> {
        let body = serde_json::to_string(payload)?;
        let id = payload.submission_id.as_str();

        let mut tx = self.pool.begin().await?;
        let inserted = self.insert_job(tx.as_mut(), id, &body, options).await?;
        if inserted {
            upsert_pending(tx.as_mut(), id).await?;
        }
        tx.commit().await?;

        if inserted {
            log::info!("Job {id} added to queue");
            self.notify.notify_one();
        } else {
            log::info!("Job {id} already exists, not queued again");
        }
        Ok(inserted)
    }

    /// Inserts a raw job, returning whether it was new
    pub async fn push(&self, id: &str, payload: &str, options: EnqueueOptions) -> sqlx::Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let inserted = self.insert_job(&mut conn, id, payload, options).await?;
        if inserted {
            self.notify.notify_one();
        }
        Ok(inserted)
    }

    async fn insert_job(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        payload: &str,
        options: EnqueueOptions,
    ) -> sqlx::Result<bool> {
        let now = now_millis();
        let delay_ms = options.delay.as_millis() as i64;
        let state = if delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let result = sqlx::query(
            r"
            INSERT INTO queue_jobs (id, payload, state, priority, max_attempts, run_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(id)
        .bind(payload)
        .bind(state.as_str())
        .bind(options.priority)
        .bind(self.policy.max_attempts as i64)
        .bind(now + delay_ms)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Waits until a job can be claimed by `owner`
    pub async fn pop(&self, owner: &str) -> sqlx::Result<ClaimedJob> {
        loop {
            if let Some(job) = self.try_claim(owner).await? {
                return Ok(job);
            }
            // Delayed jobs become due without any notification
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.policy.poll_interval) => {}
            }
        }
    }

    pub async fn try_claim(&self, owner: &str) -> sqlx::Result<Option<ClaimedJob>> {
        let now = now_millis();
        let lease_until = now + self.policy.lease.as_millis() as i64;

        let row = sqlx::query(
            r"
            UPDATE queue_jobs
            SET state = 'active', attempts = attempts + 1,
                lease_owner = ?, lease_until = ?, updated_at = ?
            WHERE seq = (
                SELECT seq FROM queue_jobs
                WHERE state IN ('waiting', 'delayed') AND run_at <= ?
                ORDER BY priority ASC, run_at ASC, seq ASC
                LIMIT 1
            )
            RETURNING id, payload, attempts, max_attempts
            ",
        )
        .bind(owner)
        .bind(lease_until)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let job = ClaimedJob {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            attempt: row.try_get::<i64, _>("attempts")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        };
        log::debug!("Job {} claimed by {owner} (attempt {})", job.id, job.attempt);
        Ok(Some(job))
    }

    /// Records the result of a finished job. Returns `false` if `owner` no longer holds it.
    pub async fn complete(
        &self,
        id: &str,
        owner: &str,
        result: &serde_json::Value,
    ) -> sqlx::Result<bool> {
        let now = now_millis();
        let updated = sqlx::query(
            r"
            UPDATE queue_jobs
            SET state = 'completed', result = ?, lease_owner = NULL, lease_until = NULL,
                finished_at = ?, updated_at = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ?
            ",
        )
        .bind(result.to_string())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    /// Records a failed attempt.
    ///
    /// Retryable failures with attempts left are delayed by exponential backoff,
    /// everything else becomes terminally failed.
    pub async fn fail(
        &self,
        id: &str,
        owner: &str,
        reason: &str,
        retryable: bool,
    ) -> sqlx::Result<FailOutcome> {
        let now = now_millis();
        let base_ms = self.policy.backoff_base.as_millis() as i64;

        let row = sqlx::query(
            r"
            UPDATE queue_jobs
            SET state = CASE WHEN ? AND attempts < max_attempts THEN 'delayed' ELSE 'failed' END,
                run_at = CASE WHEN ? AND attempts < max_attempts
                    THEN ? + ? * (1 << (attempts - 1)) ELSE run_at END,
                finished_at = CASE WHEN ? AND attempts < max_attempts THEN NULL ELSE ? END,
                failed_reason = ?, lease_owner = NULL, lease_until = NULL, updated_at = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ?
            RETURNING state, attempts, run_at
            ",
        )
        .bind(retryable)
        .bind(retryable)
        .bind(now)
        .bind(base_ms)
        .bind(retryable)
        .bind(now)
        .bind(reason)
        .bind(now)
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(FailOutcome::NotOwned);
        };

        let state: String = row.try_get("state")?;
        let attempts = row.try_get::<i64, _>("attempts")? as u32;
        if state == JobState::Delayed.as_str() {
            let run_at: i64 = row.try_get("run_at")?;
            Ok(FailOutcome::Retrying {
                attempt: attempts,
                delay: Duration::from_millis((run_at - now).max(0) as u64),
            })
        } else {
            Ok(FailOutcome::Exhausted { attempts })
        }
    }

    pub async fn update_progress(&self, id: &str, progress: &serde_json::Value) -> sqlx::Result<()> {
        sqlx::query(
            r"
            UPDATE queue_jobs SET progress = ?, updated_at = ?
            WHERE id = ? AND state = 'active'
            ",
        )
        .bind(progress.to_string())
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Renews the lease of an active job, returns `false` if it was lost
    pub async fn extend_lease(&self, id: &str, owner: &str) -> sqlx::Result<bool> {
        let now = now_millis();
        let updated = sqlx::query(
            r"
            UPDATE queue_jobs SET lease_until = ?, updated_at = ?
            WHERE id = ? AND state = 'active' AND lease_owner = ?
            ",
        )
        .bind(now + self.policy.lease.as_millis() as i64)
        .bind(now)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    /// Takes back active jobs whose lease expired.
    ///
    /// Jobs with attempts left go back to waiting, the rest fail for good.
    pub async fn reclaim_stalled(&self) -> sqlx::Result<Vec<StallOutcome>> {
        let now = now_millis();

        let failed: Vec<String> = sqlx::query(
            r"
            UPDATE queue_jobs
            SET state = 'failed', failed_reason = ?, lease_owner = NULL, lease_until = NULL,
                finished_at = ?, updated_at = ?
            WHERE state = 'active' AND lease_until < ? AND attempts >= max_attempts
            RETURNING id
            ",
        )
        .bind(STALLED_REASON)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<sqlx::Result<_>>()?;

        let requeued: Vec<String> = sqlx::query(
            r"
            UPDATE queue_jobs
            SET state = 'waiting', run_at = ?, lease_owner = NULL, lease_until = NULL, updated_at = ?
            WHERE state = 'active' AND lease_until < ?
            RETURNING id
            ",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<sqlx::Result<_>>()?;

        for _ in &requeued {
            self.notify.notify_one();
        }

        Ok(requeued
            .into_iter()
            .map(StallOutcome::Requeued)
            .chain(failed.into_iter().map(StallOutcome::Failed))
            .collect())
    }

    pub async fn status(&self, id: &str) -> sqlx::Result<Option<JobStatus>> {
        let row = sqlx::query(
            r"
            SELECT id, state, priority, progress, result, failed_reason, attempts, max_attempts,
                   run_at, created_at, finished_at
            FROM queue_jobs
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| job_status_from_row(&row, now_millis()))
            .transpose()
    }

    pub async fn stats(&self) -> sqlx::Result<QueueStats> {
        let rows = sqlx::query(
            r"
            SELECT CASE
                       WHEN state = 'delayed' AND run_at <= ? THEN 'waiting'
                       ELSE state
                   END AS effective_state,
                   COUNT(*) AS count
            FROM queue_jobs
            GROUP BY effective_state
            ",
        )
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let state: String = row.try_get("effective_state")?;
            let count = row.try_get::<i64, _>("count")? as u64;
            match JobState::parse(&state) {
                Some(JobState::Waiting) => stats.waiting += count,
                Some(JobState::Active) => stats.active += count,
                Some(JobState::Completed) => stats.completed += count,
                Some(JobState::Failed) => stats.failed += count,
                Some(JobState::Delayed) => stats.delayed += count,
                None => log::warn!("Unknown job state {state:?} in queue"),
            }
        }
        Ok(stats)
    }

    /// Drops finished jobs beyond the retention window, returns how many were removed
    pub async fn prune(&self, retention: &RetentionConfig) -> sqlx::Result<u64> {
        let now = now_millis();
        let mut removed = 0;

        for (state, count, age_secs) in [
            (
                JobState::Completed,
                retention.completed_count,
                retention.completed_age_secs,
            ),
            (
                JobState::Failed,
                retention.failed_count,
                retention.failed_age_secs,
            ),
        ] {
            if let Some(age_secs) = age_secs {
                let cutoff = now - (age_secs as i64) * 1000;
                removed += sqlx::query("DELETE FROM queue_jobs WHERE state = ? AND finished_at < ?")
                    .bind(state.as_str())
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
            }

            if let Some(count) = count {
                removed += sqlx::query(
                    r"
                    DELETE FROM queue_jobs
                    WHERE state = ? AND seq NOT IN (
                        SELECT seq FROM queue_jobs
                        WHERE state = ?
                        ORDER BY finished_at DESC, seq DESC
                        LIMIT ?
                    )
                    ",
                )
                .bind(state.as_str())
                .bind(state.as_str())
                .bind(count as i64)
                .execute(&self.pool)
                .await?
                .rows_affected();
            }
        }

        if removed > 0 {
            log::info!("Pruned {removed} finished jobs from queue");
        }
        Ok(removed)
    }
}

fn job_status_from_row(row: &SqliteRow, now: i64) -> sqlx::Result<JobStatus> {
    let raw_state: String = row.try_get("state")?;
    let run_at: i64 = row.try_get("run_at")?;
    let state = match JobState::parse(&raw_state) {
        Some(JobState::Delayed) if run_at <= now => JobState::Waiting,
        Some(state) => state,
        None => {
            return Err(sqlx::Error::Decode(
                format!("unknown job state {raw_state:?}").into(),
            ));
        }
    };

    let json = |column: &str| -> sqlx::Result<Option<serde_json::Value>> {
        let text: Option<String> = row.try_get(column)?;
        Ok(text.and_then(|t| serde_json::from_str(&t).ok()))
    };

    Ok(JobStatus {
        id: row.try_get("id")?,
        state,
        priority: row.try_get("priority")?,
        progress: json("progress")?,
        result: json("result")?,
        failed_reason: row.try_get("failed_reason")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}
