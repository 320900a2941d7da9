#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;

use judger::checker::CheckerKind;
use judger::context::JudgeContext;
use judger::database as db;
use judger::engine::Judge;
use judger::language::Language;
use judger::queue::{JobQueue, JobState, JobStatus, QueuePolicy};
use judger::sandbox::{CompileOutcome, Execution, Limits, SandboxRuntime, write_source};
use judger::submission::{JobPayload, Problem, TestCase};
use judger::verdict::Status;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_path(tag: &str, suffix: &str) -> PathBuf {
    let test_id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "judger_it_{tag}_{}_{test_id}{suffix}",
        std::process::id()
    ))
}

// Removes the test database and work root on drop
pub struct TestEnvGuard {
    pub db_path: PathBuf,
    pub work_root: PathBuf,
}

impl Drop for TestEnvGuard {
    fn drop(&mut self) {
        db::remove_db(&self.db_path);
        let _ = std::fs::remove_dir_all(&self.work_root);
    }
}

pub async fn create_test_env(tag: &str) -> (SqlitePool, TestEnvGuard) {
    let db_path = unique_path(tag, ".db");
    let work_root = unique_path(tag, "_runs");
    db::remove_db(&db_path);
    std::fs::create_dir_all(&work_root).unwrap();

    let pool = db::init_db(&db_path).await.unwrap();
    (pool, TestEnvGuard { db_path, work_root })
}

pub fn fast_policy() -> QueuePolicy {
    QueuePolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        lease: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
    }
}

pub fn sum_problem() -> Problem {
    Problem {
        id: "sum".to_string(),
        test_cases: vec![TestCase {
            stdin: "5\n1 2 3 4 5".to_string(),
            expected_stdout: "15\n".to_string(),
        }],
        time_limit_seconds: 2.0,
        memory_limit_mb: 256,
        max_point: 100.0,
        checker: CheckerKind::Standard,
    }
}

pub fn payload(id: &str, source: &str, problem: Problem) -> JobPayload {
    JobPayload {
        submission_id: id.to_string(),
        source_code: source.to_string(),
        language: Language::Cpp17,
        problem,
    }
}

/// Sandbox whose behavior is picked by the submitted source code:
///
/// - `compile-error`: the build fails
/// - `sum`: prints the sum of the numbers on the second input line
/// - `print:<text>`: prints `<text>` and a newline
/// - `loop`: never finishes
/// - `crash`: exits with code 139
/// - `oom`: is killed at the memory cap
/// - `broken`: the sandbox itself fails on every execution
/// - `flaky:<n>`: the sandbox fails on the first `n` executions, then behaves like `sum`
/// - `slow`: like `sum`, after 100ms
/// - `sleep:<ms>`: like `sum`, after `<ms>` milliseconds
/// - `garbled:<n>`: the sandbox output cannot be parsed on the first `n` executions,
///   then behaves like `sum`
#[derive(Default)]
pub struct FakeSandbox {
    executions: AtomicUsize,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub work_dirs: Mutex<Vec<PathBuf>>,
    pub order: Mutex<Vec<String>>,
}

impl FakeSandbox {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

fn sum_line(stdin: &str) -> String {
    let total: i64 = stdin
        .lines()
        .nth(1)
        .unwrap_or_default()
        .split_whitespace()
        .map(|n| n.parse::<i64>().unwrap())
        .sum();
    format!("{total}\n")
}

fn finished(status: Status, stdout: String, time: f64, exit_code: i64) -> Execution {
    Execution {
        status,
        stdout,
        stderr: String::new(),
        time,
        memory: 2.5,
        exit_code,
    }
}

#[async_trait]
impl SandboxRuntime for FakeSandbox {
    async fn compile(
        &self,
        language: Language,
        source: &str,
        ctx: &JudgeContext,
    ) -> anyhow::Result<CompileOutcome> {
        write_source(ctx, language, source)?;
        self.work_dirs.lock().push(ctx.work_dir().to_path_buf());
        if source == "compile-error" {
            return Ok(CompileOutcome {
                success: false,
                output: "main.cpp:1:1: error: expected unqualified-id".to_string(),
            });
        }
        Ok(CompileOutcome::skipped())
    }

    async fn execute(
        &self,
        language: Language,
        ctx: &JudgeContext,
        stdin: &str,
        limits: &Limits,
    ) -> anyhow::Result<Execution> {
        let call = self.executions.fetch_add(1, Ordering::SeqCst);
        let source = std::fs::read_to_string(ctx.work_dir().join(language.source_file()))?;

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.order.lock().push(format!("start {}", ctx.submission_id()));
        let result = run_fake(&source, stdin, limits, call).await;
        self.order.lock().push(format!("end {}", ctx.submission_id()));
        self.running.fetch_sub(1, Ordering::SeqCst);

        result
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn run_fake(source: &str, stdin: &str, limits: &Limits, call: usize) -> anyhow::Result<Execution> {
    if let Some(text) = source.strip_prefix("print:") {
        return Ok(finished(Status::Accepted, format!("{text}\n"), 0.01, 0));
    }
    if let Some(failures) = source.strip_prefix("flaky:") {
        if call < failures.parse::<usize>()? {
            anyhow::bail!("docker daemon connection reset");
        }
        return Ok(finished(Status::Accepted, sum_line(stdin), 0.02, 0));
    }
    if let Some(failures) = source.strip_prefix("garbled:") {
        if call < failures.parse::<usize>()? {
            return Ok(finished(Status::InternalError, String::new(), 0.0, -1));
        }
        return Ok(finished(Status::Accepted, sum_line(stdin), 0.02, 0));
    }
    if let Some(ms) = source.strip_prefix("sleep:") {
        tokio::time::sleep(Duration::from_millis(ms.parse()?)).await;
        return Ok(finished(Status::Accepted, sum_line(stdin), 0.02, 0));
    }

    Ok(match source {
        "sum" => finished(Status::Accepted, sum_line(stdin), 0.02, 0),
        "slow" => {
            tokio::time::sleep(Duration::from_millis(100)).await;
            finished(Status::Accepted, sum_line(stdin), 0.1, 0)
        }
        "loop" => finished(Status::TimeLimitExceeded, String::new(), limits.time_limit_secs, 124),
        "crash" => Execution {
            stderr: "Segmentation fault".to_string(),
            ..finished(Status::RuntimeError, String::new(), 0.01, 139)
        },
        "oom" => Execution {
            memory: limits.memory_limit_mb as f64,
            ..finished(Status::MemoryLimitExceeded, String::new(), 0.3, 137)
        },
        "broken" => anyhow::bail!("docker daemon connection reset"),
        other => anyhow::bail!("fake sandbox does not know program {other:?}"),
    })
}

pub fn judge_with(sandbox: Arc<FakeSandbox>, work_root: &Path) -> Judge {
    Judge::new(sandbox, work_root.to_path_buf(), None)
}

pub async fn wait_for_state(queue: &JobQueue, id: &str, state: JobState) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(status) = queue.status(id).await.unwrap()
                && status.state == state
            {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} never reached {state:?}"))
}
