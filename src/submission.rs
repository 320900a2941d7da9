use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::checker::CheckerKind;
use crate::language::Language;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub stdin: String,
    pub expected_stdout: String,
}

/// Read-only description of what a submission is judged against
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: f64,
    #[serde(rename = "memoryLimitMB", default = "default_memory_limit")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_max_point")]
    pub max_point: f64,
    #[serde(default)]
    pub checker: CheckerKind,
}

/// Largest accepted per-test time limit, in seconds
pub const MAX_TIME_LIMIT_SECS: f64 = 60.0;
/// Largest accepted memory limit, in megabytes
pub const MAX_MEMORY_LIMIT_MB: u64 = 65536;

fn default_time_limit() -> f64 {
    1.0
}

fn default_memory_limit() -> u64 {
    256
}

fn default_max_point() -> f64 {
    100.0
}

impl Problem {
    pub fn validate(&self) -> Result<()> {
        if !self.time_limit_seconds.is_finite() || self.time_limit_seconds <= 0.0 {
            bail!("time limit must be a positive number of seconds");
        }
        if self.time_limit_seconds > MAX_TIME_LIMIT_SECS {
            bail!("time limit must not exceed {MAX_TIME_LIMIT_SECS}s");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory limit must be positive");
        }
        if self.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
            bail!("memory limit must not exceed {MAX_MEMORY_LIMIT_MB}MB");
        }
        if !self.max_point.is_finite() || self.max_point < 0.0 {
            bail!("max point must be a non-negative number");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub source_code: String,
    pub language: Language,
}

/// Body of a queued judging job
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub submission_id: String,
    pub source_code: String,
    pub language: Language,
    pub problem: Problem,
}

impl JobPayload {
    pub fn submission(&self) -> Submission {
        Submission {
            id: self.submission_id.clone(),
            source_code: self.source_code.clone(),
            language: self.language,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.submission_id.trim().is_empty() {
            bail!("submission id must not be empty");
        }
        self.problem.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let payload: JobPayload = serde_json::from_str(
            r#"{
                "submissionId": "s1",
                "sourceCode": "print(15)",
                "language": "python3",
                "problem": {
                    "id": "sum",
                    "testCases": [{"stdin": "5\n1 2 3 4 5", "expectedStdout": "15\n"}],
                    "timeLimitSeconds": 2,
                    "memoryLimitMB": 128,
                    "maxPoint": 100
                }
            }"#,
        )
        .unwrap();

        assert_eq!(payload.language, Language::Python3);
        assert_eq!(payload.problem.time_limit_seconds, 2.0);
        assert_eq!(payload.problem.memory_limit_mb, 128);
        assert_eq!(payload.problem.checker, CheckerKind::Standard);
        assert_eq!(payload.problem.test_cases[0].expected_stdout, "15\n");
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_problem_defaults_and_validation() {
        let mut problem: Problem =
            serde_json::from_str(r#"{"id": "p", "testCases": []}"#).unwrap();
        assert_eq!(problem.time_limit_seconds, 1.0);
        assert_eq!(problem.memory_limit_mb, 256);
        assert_eq!(problem.max_point, 100.0);
        assert!(problem.validate().is_ok());

        problem.time_limit_seconds = 0.0;
        assert!(problem.validate().is_err());
    }

    #[test]
    fn test_oversized_limits_are_rejected() {
        let mut problem: Problem =
            serde_json::from_str(r#"{"id": "p", "testCases": []}"#).unwrap();

        problem.time_limit_seconds = 1e20;
        assert!(problem.validate().is_err());
        problem.time_limit_seconds = MAX_TIME_LIMIT_SECS;
        assert!(problem.validate().is_ok());

        problem.memory_limit_mb = u64::MAX;
        assert!(problem.validate().is_err());
        problem.memory_limit_mb = MAX_MEMORY_LIMIT_MB + 1;
        assert!(problem.validate().is_err());
        problem.memory_limit_mb = MAX_MEMORY_LIMIT_MB;
        assert!(problem.validate().is_ok());
    }
}
