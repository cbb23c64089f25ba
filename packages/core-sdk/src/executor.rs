use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::telemetry;

/**
 * \brief Runs a snippet and returns what a user should see.
 * \details Failures are reported inside the returned text rather than as
 * `Err`, because the output is shown verbatim in the transcript.
 */
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str, timeout: Duration) -> String;
}

/**
 * \brief Runs Python snippets in a child interpreter process. No sandboxing.
 */
#[derive(Debug, Clone)]
pub struct PythonRunner {
    interpreter: String,
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

#[async_trait]
impl CodeRunner for PythonRunner {
    async fn run(&self, code: &str, timeout: Duration) -> String {
        telemetry::log_event("exec", &format!("run code_len={}", code.len()));
        let child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => {
                telemetry::log_error("exec", &format!("spawn {} failed: {}", self.interpreter, e));
                return format!("Error executing code:\n{}", e);
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => {
                telemetry::log_error("exec", "timed out");
                format!(
                    "Error: Code execution timed out after {} seconds",
                    timeout.as_secs()
                )
            }
            Ok(Err(e)) => format!("Error executing code:\n{}", e),
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                if output.status.success() {
                    stdout
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    format!("Error executing code:\n{}{}", stdout, stderr)
                }
            }
        }
    }
}
