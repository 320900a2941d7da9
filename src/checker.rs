use serde::{Deserialize, Serialize};

/// Decides whether a program's output is an acceptable answer
pub trait Checker: Send + Sync {
    fn check(&self, actual: &str, expected: &str) -> bool;
}

/// Accepted comparison policy.
///
/// Trailing whitespace on each line and fully blank lines are ignored, then the
/// remaining lines must match one for one. Token content is compared exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineChecker;

impl Checker for LineChecker {
    fn check(&self, actual: &str, expected: &str) -> bool {
        compare(actual, expected)
    }
}

/// Character-for-character comparison
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictChecker;

impl Checker for StrictChecker {
    #[inline]
    fn check(&self, actual: &str, expected: &str) -> bool {
        actual == expected
    }
}

/// Checker selection carried by a problem
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckerKind {
    #[default]
    Standard,
    Strict,
}

impl CheckerKind {
    pub fn checker(&self) -> &'static dyn Checker {
        match self {
            Self::Standard => &LineChecker,
            Self::Strict => &StrictChecker,
        }
    }
}

pub fn normalize(output: &str) -> String {
    normalized_lines(output).collect::<Vec<_>>().join("\n")
}

pub fn compare(actual: &str, expected: &str) -> bool {
    normalized_lines(actual).eq(normalized_lines(expected))
}

fn normalized_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
}
