use async_trait::async_trait;
use serde::{Serialize, Serializer};
use sqlx::{SqliteConnection, SqlitePool};

use crate::create_timestamp;
use crate::verdict::{JudgeResult, Status, TestCaseResult};

/// Lifecycle of a submission as seen by the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Judging,
    Judged(Status),
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Judging => "JUDGING",
            Self::Judged(status) => status.as_str(),
        }
    }

    fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "PENDING" => Self::Pending,
            "JUDGING" => Self::Judging,
            other => Self::Judged(other.parse()?),
        })
    }
}

impl Serialize for SubmissionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub id: String,
    pub status: SubmissionStatus,
    pub time: f64,
    pub memory: f64,
    pub point: f64,
    pub diagnostics: String,
    pub worker_id: Option<String>,
    pub retry_count: u32,
    pub test_cases: Vec<TestCaseResult>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

/// Where judging writes submission state.
///
/// The pipeline only ever calls these four operations, the schema behind them
/// belongs to the implementation.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn mark_pending(&self, submission_id: &str) -> anyhow::Result<()>;

    async fn mark_judging(
        &self,
        submission_id: &str,
        worker_id: &str,
        attempt: u32,
    ) -> anyhow::Result<()>;

    async fn save_result(&self, submission_id: &str, result: &JudgeResult) -> anyhow::Result<()>;

    async fn fetch(&self, submission_id: &str) -> anyhow::Result<Option<SubmissionRecord>>;
}

pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: String,
    status: String,
    time: f64,
    memory: f64,
    point: f64,
    diagnostics: String,
    worker_id: Option<String>,
    retry_count: i64,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct CaseRow {
    case_index: i64,
    status: String,
    time: f64,
    memory: f64,
}

/// Resets a submission to PENDING, creating its record when missing
pub(crate) async fn upsert_pending(conn: &mut SqliteConnection, submission_id: &str) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO submissions (id, status, updated_at)
        VALUES (?, 'PENDING', ?)
        ON CONFLICT(id) DO UPDATE
        SET status = 'PENDING', worker_id = NULL, updated_at = excluded.updated_at
        ",
    )
    .bind(submission_id)
    .bind(create_timestamp())
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn mark_pending(&self, submission_id: &str) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_pending(&mut conn, submission_id).await?;
        Ok(())
    }

    async fn mark_judging(
        &self,
        submission_id: &str,
        worker_id: &str,
        attempt: u32,
    ) -> anyhow::Result<()> {
        let now = create_timestamp();
        sqlx::query(
            r"
            INSERT INTO submissions (id, status, worker_id, retry_count, started_at, updated_at)
            VALUES (?, 'JUDGING', ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE
            SET status = 'JUDGING', worker_id = excluded.worker_id,
                retry_count = excluded.retry_count, started_at = excluded.started_at,
                updated_at = excluded.updated_at
            ",
        )
        .bind(submission_id)
        .bind(worker_id)
        .bind(attempt.saturating_sub(1) as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_result(&self, submission_id: &str, result: &JudgeResult) -> anyhow::Result<()> {
        let now = create_timestamp();
        let verdict = &result.verdict;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO submissions (id, status, time, memory, point, diagnostics, completed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE
            SET status = excluded.status, time = excluded.time, memory = excluded.memory,
                point = excluded.point, diagnostics = excluded.diagnostics,
                completed_at = excluded.completed_at, updated_at = excluded.updated_at
            ",
        )
        .bind(submission_id)
        .bind(verdict.status.as_str())
        .bind(verdict.time)
        .bind(verdict.memory)
        .bind(verdict.point)
        .bind(&result.diagnostics)
        .bind(&now)
        .bind(&now)
        .execute(tx.as_mut())
        .await?;

        // A rejudge replaces every case of the previous run
        sqlx::query("DELETE FROM submission_case WHERE submission_id = ?")
            .bind(submission_id)
            .execute(tx.as_mut())
            .await?;

        for case in &result.test_cases {
            sqlx::query(
                r"
                INSERT INTO submission_case (submission_id, case_index, status, time, memory)
                VALUES (?, ?, ?, ?, ?)
                ",
            )
            .bind(submission_id)
            .bind(case.index as i64)
            .bind(case.status.as_str())
            .bind(case.time)
            .bind(case.memory)
            .execute(tx.as_mut())
            .await?;
        }

        tx.commit().await?;
        log::debug!(
            "Saved {} result with {} cases for submission {submission_id}",
            verdict.status,
            result.test_cases.len()
        );
        Ok(())
    }

    async fn fetch(&self, submission_id: &str) -> anyhow::Result<Option<SubmissionRecord>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r"
            SELECT id, status, time, memory, point, diagnostics, worker_id, retry_count,
                   started_at, completed_at, updated_at
            FROM submissions
            WHERE id = ?
            ",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let cases = sqlx::query_as::<_, CaseRow>(
            r"
            SELECT case_index, status, time, memory
            FROM submission_case
            WHERE submission_id = ?
            ORDER BY case_index
            ",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;

        let test_cases = cases
            .into_iter()
            .map(|case| {
                Ok(TestCaseResult {
                    index: case.case_index as u32,
                    status: case.status.parse()?,
                    time: case.time,
                    memory: case.memory,
                })
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(Some(SubmissionRecord {
            status: SubmissionStatus::parse(&row.status)?,
            id: row.id,
            time: row.time,
            memory: row.memory,
            point: row.point,
            diagnostics: row.diagnostics,
            worker_id: row.worker_id,
            retry_count: row.retry_count as u32,
            test_cases,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        }))
    }
}
