use super::{Execution, Limits, MarkedOutput};
use crate::verdict::Status;

const TIMEOUT_EXIT_CODE: i64 = 124;
const KILLED_EXIT_CODE: i64 = 137;
/// Peak readings this close to the cap count as hitting it
const MEMORY_CAP_RATIO: f64 = 0.95;

/// What the host observed about an instance, independent of its output
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSignals {
    /// The host-side safety timeout fired and killed the instance
    pub timed_out: bool,
    pub oom_killed: bool,
    pub peak_memory_bytes: u64,
    /// Wall time around the instance, seconds
    pub host_elapsed: f64,
}

/// Process-level status of one run.
///
/// `elapsed` is the in-sandbox time, `None` when the framing was lost.
pub fn classify(
    exit_code: i64,
    elapsed: Option<f64>,
    signals: &RunSignals,
    limits: &Limits,
) -> Status {
    let over_time = elapsed.is_some_and(|t| t >= limits.time_limit_secs);
    if signals.timed_out || exit_code == TIMEOUT_EXIT_CODE || over_time {
        return Status::TimeLimitExceeded;
    }

    let at_cap = signals.peak_memory_bytes as f64
        >= limits.memory_limit_bytes() as f64 * MEMORY_CAP_RATIO;
    if signals.oom_killed || (exit_code == KILLED_EXIT_CODE && at_cap) {
        return Status::MemoryLimitExceeded;
    }

    if exit_code != 0 {
        return Status::RuntimeError;
    }
    Status::Accepted
}

pub fn build_execution(
    parsed: MarkedOutput,
    signals: &RunSignals,
    limits: &Limits,
    stderr: String,
) -> Execution {
    let memory = signals.peak_memory_bytes as f64 / (1024.0 * 1024.0);

    let (stdout, elapsed, exit_code) = match parsed {
        MarkedOutput::Complete {
            stdout,
            elapsed,
            exit_code,
        } => (stdout, Some(elapsed), exit_code),
        MarkedOutput::Missing { raw } => (raw, None, -1),
        MarkedOutput::Malformed(reason) => {
            log::warn!("Unreadable sandbox output: {reason}");
            return Execution {
                status: Status::InternalError,
                stdout: String::new(),
                stderr,
                time: 0.0,
                memory,
                exit_code: -1,
            };
        }
    };

    let status = classify(exit_code, elapsed, signals, limits);
    let time = match (status, elapsed) {
        (Status::TimeLimitExceeded, _) => limits.time_limit_secs,
        (_, Some(elapsed)) => elapsed,
        (_, None) => signals.host_elapsed.min(limits.time_limit_secs),
    };

    Execution {
        status,
        stdout,
        stderr,
        time,
        memory,
        exit_code,
    }
}
