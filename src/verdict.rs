use serde::{Deserialize, Serialize};

/// Outcome of a single test case or of a whole submission
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "RTE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompilationError,
    #[serde(rename = "IE")]
    InternalError,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::TimeLimitExceeded => "TLE",
            Self::MemoryLimitExceeded => "MLE",
            Self::RuntimeError => "RTE",
            Self::CompilationError => "CE",
            Self::InternalError => "IE",
        }
    }

    /// Rank used when folding test case results into one verdict, higher wins.
    ///
    /// Compilation errors never reach aggregation since no test case runs after one.
    fn precedence(&self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::WrongAnswer => 1,
            Self::RuntimeError => 2,
            Self::MemoryLimitExceeded => 3,
            Self::TimeLimitExceeded => 4,
            Self::CompilationError => 5,
            Self::InternalError => 6,
        }
    }

    /// Whether the status is attributable to the submitted program
    pub fn is_user_fault(&self) -> bool {
        !matches!(self, Self::Accepted | Self::InternalError)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AC" => Self::Accepted,
            "WA" => Self::WrongAnswer,
            "TLE" => Self::TimeLimitExceeded,
            "MLE" => Self::MemoryLimitExceeded,
            "RTE" => Self::RuntimeError,
            "CE" => Self::CompilationError,
            "IE" => Self::InternalError,
            other => anyhow::bail!("unknown status {other:?}"),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TestCaseResult {
    /// 1-based position of the test case in the problem
    pub index: u32,
    pub status: Status,
    /// seconds
    pub time: f64,
    /// megabytes
    pub memory: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: Status,
    pub time: f64,
    pub memory: f64,
    pub point: f64,
}

impl Verdict {
    pub fn compilation_error() -> Self {
        Self {
            status: Status::CompilationError,
            time: 0.0,
            memory: 0.0,
            point: 0.0,
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: Status::InternalError,
            time: 0.0,
            memory: 0.0,
            point: 0.0,
        }
    }
}

/// Folds per-test results into the final verdict.
///
/// The winning status is the one with the highest precedence present, and the
/// reported time and memory are the maxima over the results of that status only.
/// An empty result set has nothing to judge and yields `IE`.
pub fn aggregate(results: &[TestCaseResult], max_point: f64) -> Verdict {
    let Some(status) = results
        .iter()
        .map(|r| r.status)
        .max_by_key(|s| s.precedence())
    else {
        return Verdict::internal_error();
    };

    let (time, memory) = results
        .iter()
        .filter(|r| r.status == status)
        .fold((0.0_f64, 0.0_f64), |(t, m), r| (t.max(r.time), m.max(r.memory)));

    let accepted = results
        .iter()
        .filter(|r| r.status == Status::Accepted)
        .count();
    let point = if accepted == results.len() {
        max_point
    } else {
        max_point * accepted as f64 / results.len() as f64
    };

    Verdict {
        status,
        time: round_to(time, 3),
        memory: round_to(memory, 2),
        point: round_to(point, 2),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Everything the persistence adapter records for one judged submission
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResult {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub test_cases: Vec<TestCaseResult>,
    pub diagnostics: String,
}

impl JudgeResult {
    pub fn compilation_error(compiler_output: String) -> Self {
        Self {
            verdict: Verdict::compilation_error(),
            test_cases: Vec::new(),
            diagnostics: compiler_output,
        }
    }

    /// A result carrying no internal detail, safe to show to the submitter
    pub fn internal_error() -> Self {
        Self {
            verdict: Verdict::internal_error(),
            test_cases: Vec::new(),
            diagnostics: "Internal error: the judge could not evaluate this submission".to_string(),
        }
    }

    pub fn status(&self) -> Status {
        self.verdict.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(index: u32, status: Status, time: f64, memory: f64) -> TestCaseResult {
        TestCaseResult {
            index,
            status,
            time,
            memory,
        }
    }

    #[test]
    fn test_all_accepted_gets_full_point() {
        let results = vec![
            case(1, Status::Accepted, 0.1, 3.0),
            case(2, Status::Accepted, 0.4, 2.0),
            case(3, Status::Accepted, 0.2, 5.5),
        ];
        let verdict = aggregate(&results, 100.0);
        assert_eq!(verdict.status, Status::Accepted);
        assert_eq!(verdict.point, 100.0);
        assert_eq!(verdict.time, 0.4);
        assert_eq!(verdict.memory, 5.5);
    }

    #[test]
    fn test_empty_results_is_internal_error_with_zero_point() {
        let verdict = aggregate(&[], 100.0);
        assert_eq!(verdict.status, Status::InternalError);
        assert_eq!(verdict.point, 0.0);
    }

    #[test]
    fn test_time_limit_dominates_everything_below_it() {
        let others = [
            Status::Accepted,
            Status::WrongAnswer,
            Status::RuntimeError,
            Status::MemoryLimitExceeded,
        ];
        for other in others {
            let results = vec![
                case(1, other, 0.5, 10.0),
                case(2, Status::TimeLimitExceeded, 2.0, 1.0),
                case(3, other, 0.3, 20.0),
            ];
            assert_eq!(aggregate(&results, 100.0).status, Status::TimeLimitExceeded);
        }
    }

    #[test]
    fn test_precedence_chain() {
        let chain = [
            Status::TimeLimitExceeded,
            Status::MemoryLimitExceeded,
            Status::RuntimeError,
            Status::WrongAnswer,
            Status::Accepted,
        ];
        for (i, expected) in chain.iter().enumerate() {
            let results: Vec<_> = chain[i..]
                .iter()
                .enumerate()
                .map(|(j, s)| case(j as u32 + 1, *s, 0.1, 1.0))
                .collect();
            assert_eq!(aggregate(&results, 10.0).status, *expected);
        }
    }

    #[test]
    fn test_internal_error_outranks_user_statuses() {
        let results = vec![
            case(1, Status::TimeLimitExceeded, 1.0, 1.0),
            case(2, Status::InternalError, 0.0, 0.0),
        ];
        assert_eq!(aggregate(&results, 100.0).status, Status::InternalError);
    }

    #[test]
    fn test_time_and_memory_come_from_winning_class() {
        let results = vec![
            case(1, Status::Accepted, 1.9, 200.0),
            case(2, Status::WrongAnswer, 0.25, 8.0),
            case(3, Status::WrongAnswer, 0.5, 4.0),
        ];
        let verdict = aggregate(&results, 100.0);
        assert_eq!(verdict.status, Status::WrongAnswer);
        assert_eq!(verdict.time, 0.5);
        assert_eq!(verdict.memory, 8.0);
    }

    #[test]
    fn test_partial_point_rounds_to_two_decimals() {
        let results = vec![
            case(1, Status::Accepted, 0.1, 1.0),
            case(2, Status::WrongAnswer, 0.1, 1.0),
            case(3, Status::WrongAnswer, 0.1, 1.0),
        ];
        assert_eq!(aggregate(&results, 100.0).point, 33.33);
        assert_eq!(aggregate(&results[1..], 100.0).point, 0.0);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&Status::TimeLimitExceeded).unwrap(),
            "\"TLE\""
        );
        let status: Status = serde_json::from_str("\"RTE\"").unwrap();
        assert_eq!(status, Status::RuntimeError);
        assert_eq!("MLE".parse::<Status>().unwrap(), Status::MemoryLimitExceeded);
        assert!("OK".parse::<Status>().is_err());
    }

    #[test]
    fn test_judge_result_serializes_flat() {
        let result = JudgeResult::compilation_error("main.cpp:1: error".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "CE");
        assert_eq!(json["point"], 0.0);
        assert_eq!(json["testCases"].as_array().unwrap().len(), 0);
        assert_eq!(json["diagnostics"], "main.cpp:1: error");
    }
}
