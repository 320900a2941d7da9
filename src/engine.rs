use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::context::JudgeContext;
use crate::sandbox::{Limits, SandboxRuntime};
use crate::submission::{Problem, Submission};
use crate::verdict::{JudgeResult, Status, TestCaseResult, aggregate};

const STDERR_SNIPPET_CHARS: usize = 200;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum JudgeProgress {
    Compiling,
    #[serde(rename_all = "camelCase")]
    Running {
        testcase: u32,
        total: u32,
        max_time: f64,
        max_memory: f64,
    },
    Finished,
}

/// Receives progress of a judge run
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: JudgeProgress);
}

/// Sink for callers that do not track progress
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _progress: JudgeProgress) {}
}

/// Drives one submission through compilation and every test case
pub struct Judge {
    sandbox: Arc<dyn SandboxRuntime>,
    work_root: PathBuf,
    host_work_root: Option<PathBuf>,
}

impl Judge {
    pub fn new(
        sandbox: Arc<dyn SandboxRuntime>,
        work_root: PathBuf,
        host_work_root: Option<PathBuf>,
    ) -> Self {
        Self {
            sandbox,
            work_root,
            host_work_root,
        }
    }

    pub fn sandbox(&self) -> &Arc<dyn SandboxRuntime> {
        &self.sandbox
    }

    /// Judges `submission` against `problem`.
    ///
    /// Program misbehavior always ends in a result. `Err` means the sandbox
    /// itself failed and the run says nothing about the submission.
    pub async fn judge(
        &self,
        submission: &Submission,
        problem: &Problem,
        progress: &dyn ProgressSink,
    ) -> Result<JudgeResult> {
        problem
            .validate()
            .with_context(|| format!("Problem {} cannot be judged", problem.id))?;

        let ctx = JudgeContext::create(
            &submission.id,
            &self.work_root,
            self.host_work_root.as_deref(),
        )?;
        log::info!(
            "Judging submission {} ({}) on problem {}, run {}",
            submission.id,
            submission.language,
            problem.id,
            ctx.run_id()
        );

        progress.report(JudgeProgress::Compiling).await;
        let compiled = self
            .sandbox
            .compile(submission.language, &submission.source_code, &ctx)
            .await
            .with_context(|| format!("Sandbox failed compiling submission {}", submission.id))?;

        if !compiled.success {
            log::info!("Submission {} failed to compile", submission.id);
            progress.report(JudgeProgress::Finished).await;
            return Ok(JudgeResult::compilation_error(compiled.output));
        }

        let limits = Limits {
            time_limit_secs: problem.time_limit_seconds,
            memory_limit_mb: problem.memory_limit_mb,
        };
        let checker = problem.checker.checker();
        let total = problem.test_cases.len() as u32;

        let mut results = Vec::with_capacity(problem.test_cases.len());
        let mut diagnostics = Vec::new();
        let (mut max_time, mut max_memory) = (0.0_f64, 0.0_f64);

        for (i, case) in problem.test_cases.iter().enumerate() {
            let index = i as u32 + 1;
            progress
                .report(JudgeProgress::Running {
                    testcase: index,
                    total,
                    max_time,
                    max_memory,
                })
                .await;

            let execution = self
                .sandbox
                .execute(submission.language, &ctx, &case.stdin, &limits)
                .await
                .with_context(|| {
                    format!(
                        "Sandbox failed on test {index} of submission {}",
                        submission.id
                    )
                })?;

            let status = match execution.status {
                Status::Accepted if !checker.check(&execution.stdout, &case.expected_stdout) => {
                    Status::WrongAnswer
                }
                status => status,
            };

            if status == Status::RuntimeError {
                diagnostics.push(runtime_error_summary(index, execution.exit_code, &execution.stderr));
            }
            log::debug!(
                "Submission {} test {index}/{total}: {status} in {:.3}s, {:.2}MB",
                submission.id,
                execution.time,
                execution.memory
            );

            max_time = max_time.max(execution.time);
            max_memory = max_memory.max(execution.memory);
            results.push(TestCaseResult {
                index,
                status,
                time: execution.time,
                memory: execution.memory,
            });
        }

        let verdict = aggregate(&results, problem.max_point);
        progress.report(JudgeProgress::Finished).await;
        log::info!(
            "Submission {} judged {} with {} points",
            submission.id,
            verdict.status,
            verdict.point
        );

        Ok(JudgeResult {
            verdict,
            test_cases: results,
            diagnostics: diagnostics.join("\n"),
        })
    }
}

fn runtime_error_summary(index: u32, exit_code: i64, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return format!("Test {index}: exited with code {exit_code}");
    }
    let snippet: String = stderr.chars().take(STDERR_SNIPPET_CHARS).collect();
    let ellipsis = if stderr.chars().count() > STDERR_SNIPPET_CHARS {
        "..."
    } else {
        ""
    };
    format!("Test {index}: exited with code {exit_code}: {snippet}{ellipsis}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_summary() {
        assert_eq!(runtime_error_summary(2, 1, "  "), "Test 2: exited with code 1");
        assert_eq!(
            runtime_error_summary(1, 134, "Aborted\n"),
            "Test 1: exited with code 134: Aborted"
        );
        let long = "x".repeat(500);
        assert!(runtime_error_summary(1, 1, &long).ends_with("..."));
    }

    #[test]
    fn test_progress_wire_format() {
        let json = serde_json::to_value(JudgeProgress::Running {
            testcase: 2,
            total: 5,
            max_time: 0.5,
            max_memory: 3.0,
        })
        .unwrap();
        assert_eq!(json["stage"], "running");
        assert_eq!(json["testcase"], 2);
        assert_eq!(json["maxTime"], 0.5);
        assert_eq!(
            serde_json::to_value(JudgeProgress::Compiling).unwrap()["stage"],
            "compiling"
        );
    }
}
