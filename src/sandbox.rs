mod docker;
mod markers;
mod memory;
mod outcome;

pub use docker::DockerSandbox;
pub use markers::{MarkedOutput, Markers};
pub use memory::MemorySampler;
pub use outcome::{RunSignals, build_execution, classify};

use std::fs;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::context::JudgeContext;
use crate::language::Language;
use crate::verdict::Status;

pub const INPUT_FILE: &str = "input.txt";
pub const STDERR_FILE: &str = "stderr.txt";

/// Result of the build step
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutcome {
    pub success: bool,
    /// Compiler diagnostics, shown to the submitter on failure
    pub output: String,
}

impl CompileOutcome {
    /// Outcome for languages without a build step
    pub fn skipped() -> Self {
        Self {
            success: true,
            output: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub time_limit_secs: f64,
    pub memory_limit_mb: u64,
}

impl Limits {
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// One program invocation, classified at the process level.
///
/// `status` is never `WA`, comparing output is the checker's job.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
    /// seconds, measured inside the sandbox
    pub time: f64,
    /// peak megabytes
    pub memory: f64,
    pub exit_code: i64,
}

/// Isolated runtime that builds and runs untrusted programs.
///
/// `Err` is reserved for infrastructure failures. Anything the submitted program
/// does, including crashing or exceeding limits, is reported through the outcome.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn compile(
        &self,
        language: Language,
        source: &str,
        ctx: &JudgeContext,
    ) -> Result<CompileOutcome>;

    async fn execute(
        &self,
        language: Language,
        ctx: &JudgeContext,
        stdin: &str,
        limits: &Limits,
    ) -> Result<Execution>;

    /// Checks that the runtime is reachable
    async fn ping(&self) -> Result<()>;
}

/// Writes the submission's source where the sandbox expects it
pub fn write_source(ctx: &JudgeContext, language: Language, source: &str) -> Result<()> {
    let path = ctx.work_dir().join(language.source_file());
    fs::write(&path, source).with_context(|| format!("Failed to write {}", path.display()))
}

/// Appends `chunk` while keeping `buf` within `limit` bytes
pub(crate) fn append_capped(buf: &mut String, chunk: &[u8], limit: usize) {
    if buf.len() >= limit {
        return;
    }
    let text = String::from_utf8_lossy(chunk);
    let room = limit - buf.len();
    if text.len() <= room {
        buf.push_str(&text);
    } else {
        let mut end = room;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        buf.push_str(&text[..end]);
    }
}
