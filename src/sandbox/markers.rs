use uuid::Uuid;

use crate::language::SANDBOX_MOUNT;

use super::{INPUT_FILE, STDERR_FILE};

/// Delimiters framing one execution's output.
///
/// Each execution gets its own nonce, so a program cannot print a marker that
/// the parser would accept.
#[derive(Debug, Clone)]
pub struct Markers {
    start: String,
    end: String,
    exit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkedOutput {
    Complete {
        stdout: String,
        /// seconds between the two in-sandbox timestamps
        elapsed: f64,
        exit_code: i64,
    },
    /// The framing never finished, typically because the instance was killed
    Missing { raw: String },
    /// The framing is present but unreadable
    Malformed(String),
}

impl Markers {
    pub fn new() -> Self {
        Self::with_nonce(&Uuid::new_v4().simple().to_string())
    }

    pub fn with_nonce(nonce: &str) -> Self {
        Self {
            start: format!("__JUDGER_START_{nonce}__"),
            end: format!("__JUDGER_END_{nonce}__"),
            exit: format!("__JUDGER_EXIT_{nonce}__"),
        }
    }

    /// Shell script timing `run_command` from inside the instance.
    ///
    /// The program gets `time_limit_secs` before `timeout` terminates it, and one
    /// more second before it is killed outright.
    pub fn wrap(&self, run_command: &str, time_limit_secs: f64) -> String {
        format!(
            "echo {start}; date +%s%N; \
             timeout -k 1 {time_limit_secs:.3}s {run_command} \
             < {SANDBOX_MOUNT}/{INPUT_FILE} 2> {SANDBOX_MOUNT}/{STDERR_FILE}; \
             code=$?; printf '\\n'; echo {end}; date +%s%N; echo {exit}; echo $code",
            start = self.start,
            end = self.end,
            exit = self.exit,
        )
    }

    pub fn parse(&self, output: &str) -> MarkedOutput {
        let start_line = format!("{}\n", self.start);
        let Some(pos) = output.find(&start_line) else {
            return MarkedOutput::Missing {
                raw: output.to_string(),
            };
        };
        let after_start = &output[pos + start_line.len()..];

        let Some((start_ns, body)) = after_start.split_once('\n') else {
            return MarkedOutput::Missing {
                raw: String::new(),
            };
        };

        // The wrapper adds one newline before the end marker
        let end_line = format!("\n{}\n", self.end);
        let Some(end_pos) = body.rfind(&end_line) else {
            return MarkedOutput::Missing {
                raw: body.to_string(),
            };
        };
        let stdout = &body[..end_pos];
        let mut trailer = body[end_pos + end_line.len()..].lines();

        let end_ns = trailer.next();
        let exit_marker = trailer.next();
        let code = trailer.next();

        if exit_marker != Some(self.exit.as_str()) {
            return MarkedOutput::Malformed("exit marker not found".to_string());
        }

        let (Some(start_ns), Some(end_ns)) = (parse_nanos(start_ns), end_ns.and_then(parse_nanos))
        else {
            return MarkedOutput::Malformed("unreadable timestamp".to_string());
        };
        if end_ns < start_ns {
            return MarkedOutput::Malformed("end timestamp precedes start".to_string());
        }

        let Some(exit_code) = code.and_then(|c| c.trim().parse::<i64>().ok()) else {
            return MarkedOutput::Malformed("unreadable exit code".to_string());
        };

        MarkedOutput::Complete {
            stdout: stdout.to_string(),
            elapsed: (end_ns - start_ns) as f64 / 1e9,
            exit_code,
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_nanos(line: &str) -> Option<u128> {
    line.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(markers: &Markers, stdout: &str, start: u64, end: u64, code: i32) -> String {
        format!(
            "{}\n{start}\n{stdout}\n{}\n{end}\n{}\n{code}\n",
            markers.start, markers.end, markers.exit
        )
    }

    #[test]
    fn test_complete_output() {
        let markers = Markers::with_nonce("abc");
        let out = framed(&markers, "15\n", 1_000_000_000, 1_250_000_000, 0);
        assert_eq!(
            markers.parse(&out),
            MarkedOutput::Complete {
                stdout: "15\n".to_string(),
                elapsed: 0.25,
                exit_code: 0,
            }
        );
    }

    #[test]
    fn test_stdout_without_trailing_newline_is_kept_exact() {
        let markers = Markers::with_nonce("abc");
        let out = framed(&markers, "14", 10, 20, 3);
        let MarkedOutput::Complete {
            stdout, exit_code, ..
        } = markers.parse(&out)
        else {
            panic!("expected complete output");
        };
        assert_eq!(stdout, "14");
        assert_eq!(exit_code, 3);
    }

    #[test]
    fn test_forged_markers_from_another_nonce_are_program_output() {
        let markers = Markers::with_nonce("real");
        let forged = Markers::with_nonce("fake");
        let program = format!("{}\n0\n{}\n0\n", forged.end, forged.exit);
        let out = framed(&markers, &program, 5, 9, 0);
        let MarkedOutput::Complete { stdout, .. } = markers.parse(&out) else {
            panic!("expected complete output");
        };
        assert_eq!(stdout, program);
    }

    #[test]
    fn test_missing_markers() {
        let markers = Markers::with_nonce("abc");
        assert_eq!(
            markers.parse("garbage"),
            MarkedOutput::Missing {
                raw: "garbage".to_string()
            }
        );

        let killed = format!("{}\n100\npartial output", markers.start);
        assert_eq!(
            markers.parse(&killed),
            MarkedOutput::Missing {
                raw: "partial output".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_trailer() {
        let markers = Markers::with_nonce("abc");
        let out = format!("{}\nnot-a-number\nx\n{}\n5\n{}\n0\n", markers.start, markers.end, markers.exit);
        assert!(matches!(markers.parse(&out), MarkedOutput::Malformed(_)));

        let out = format!("{}\n1\nx\n{}\n5\n{}\n", markers.start, markers.end, markers.exit);
        assert!(matches!(markers.parse(&out), MarkedOutput::Malformed(_)));

        let out = framed(&markers, "x", 9, 5, 0);
        assert!(matches!(markers.parse(&out), MarkedOutput::Malformed(_)));
    }

    #[test]
    fn test_wrapper_uses_limit_and_redirects() {
        let markers = Markers::with_nonce("n");
        let script = markers.wrap("/sandbox/main", 2.0);
        assert!(script.starts_with("echo __JUDGER_START_n__; date +%s%N;"));
        assert!(script.contains("timeout -k 1 2.000s /sandbox/main < /sandbox/input.txt 2> /sandbox/stderr.txt"));
        assert!(script.ends_with("echo __JUDGER_EXIT_n__; echo $code"));
    }
}
