//! External tool execution
//!
//! Tools like `tmutil` or `schtasks` are run to completion with their
//! combined output captured. Each invocation and its output is reported
//! at trace level.

use std::process::Command;

use crate::error::{Error, Result};
use crate::info::{InfoCallback, MessageLevel};

/// Run `program` and return its trimmed combined stdout/stderr
pub fn run_and_capture(info: &InfoCallback, program: &str, args: &[&str]) -> Result<String> {
    info(
        MessageLevel::Trace,
        &format!("Running: '{}' '{}'", program, args.join("' '")),
    );

    let output = Command::new(program).args(args).output()?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim().to_string();

    if !combined.is_empty() {
        info(MessageLevel::Trace, &combined);
    }

    if !output.status.success() {
        return Err(Error::Process {
            program: program.to_string(),
            output: if combined.is_empty() {
                output.status.to_string()
            } else {
                combined
            },
        });
    }

    Ok(combined)
}

/// Run `program`, discarding its output on success
pub fn run(info: &InfoCallback, program: &str, args: &[&str]) -> Result<()> {
    run_and_capture(info, program, args).map(|_| ())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_captures_output_and_traces_invocation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let info: InfoCallback = Arc::new(move |_, m: &str| sink.lock().push(m.to_string()));

        let out = run_and_capture(&info, "sh", &["-c", "echo hello; echo oops >&2"]).unwrap();

        assert_eq!(out, "hello\noops");
        let seen = seen.lock();
        assert_eq!(seen[0], "Running: 'sh' '-c' 'echo hello; echo oops >&2'");
        assert_eq!(seen[1], "hello\noops");
    }

    #[test]
    fn test_failure_carries_output() {
        let info = crate::info::silent_callback();
        let err = run(&info, "sh", &["-c", "echo broken; exit 3"]).unwrap_err();
        match err {
            Error::Process { program, output } => {
                assert_eq!(program, "sh");
                assert_eq!(output, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
