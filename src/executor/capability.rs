use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Result of executing one opaque work item.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    /// `Ok(result)` or `Err(error detail)`. The payload is never parsed by
    /// the core.
    pub outcome: Result<String, String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub elapsed_ms: u64,
}

/// The external capability boundary.
///
/// The core invokes `execute` once per claimed entry and never interprets
/// the description. `prepare` loads whatever shared context the capability
/// needs; the executor calls it once per batch and charges its token cost
/// to the first entry processed.
pub trait Capability {
    fn prepare(&mut self) -> Result<u64>;
    fn execute(&mut self, description: &str) -> ExecutionOutput;
}

/// Shape the worker command reports on stdout. Anything unparseable is
/// treated as a raw result.
#[derive(Debug, Deserialize)]
struct WorkerResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    tokens_in: u64,
    #[serde(default)]
    tokens_out: u64,
}

/// Production capability: one subprocess invocation per entry, description
/// on stdin, JSON response on stdout, hard-killed past the timeout.
pub struct CommandCapability {
    program: std::path::PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCapability {
    pub fn new(program: &str, args: Vec<String>, timeout: Duration) -> Result<Self> {
        let program = which::which(program)
            .with_context(|| format!("Capability command '{program}' not found in PATH"))?;
        Ok(Self {
            program,
            args,
            timeout,
        })
    }

    fn run(&self, description: &str) -> Result<(String, Duration)> {
        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        child
            .stdin
            .take()
            .context("Worker stdin unavailable")?
            .write_all(description.as_bytes())
            .context("Failed to write description to worker")?;

        match child
            .wait_timeout(self.timeout)
            .context("Failed waiting for worker")?
        {
            Some(status) => {
                let mut stdout = String::new();
                if let Some(mut out) = child.stdout.take() {
                    use std::io::Read;
                    out.read_to_string(&mut stdout).ok();
                }
                if !status.success() {
                    anyhow::bail!("Worker exited with {status}: {}", stdout.trim());
                }
                Ok((stdout, started.elapsed()))
            }
            None => {
                child.kill().ok();
                child.wait().ok();
                anyhow::bail!("Worker timed out after {:?}", self.timeout)
            }
        }
    }
}

impl Capability for CommandCapability {
    fn prepare(&mut self) -> Result<u64> {
        // The worker loads its own context per invocation; no shared setup
        // cost to account for.
        Ok(0)
    }

    fn execute(&mut self, description: &str) -> ExecutionOutput {
        match self.run(description) {
            Ok((stdout, elapsed)) => {
                let elapsed_ms = elapsed.as_millis() as u64;
                match serde_json::from_str::<WorkerResponse>(&stdout) {
                    Ok(response) => {
                        let outcome = match response.error {
                            Some(error) if !error.is_empty() => Err(error),
                            _ => Ok(response.result.unwrap_or_default()),
                        };
                        ExecutionOutput {
                            outcome,
                            tokens_in: response.tokens_in,
                            tokens_out: response.tokens_out,
                            elapsed_ms,
                        }
                    }
                    Err(_) => ExecutionOutput {
                        outcome: Ok(stdout.trim().to_string()),
                        tokens_in: 0,
                        tokens_out: 0,
                        elapsed_ms,
                    },
                }
            }
            Err(e) => ExecutionOutput {
                outcome: Err(format!("{e:#}")),
                tokens_in: 0,
                tokens_out: 0,
                elapsed_ms: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_program_is_rejected() {
        let err = CommandCapability::new(
            "relay-test-no-such-binary",
            vec![],
            Duration::from_secs(1),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_raw_output_becomes_result() {
        let mut capability =
            CommandCapability::new("cat", vec![], Duration::from_secs(5)).unwrap();
        let output = capability.execute("plain text, not json");
        assert_eq!(output.outcome.unwrap(), "plain text, not json");
    }

    #[test]
    fn test_json_response_is_parsed() {
        let mut capability =
            CommandCapability::new("cat", vec![], Duration::from_secs(5)).unwrap();
        let output =
            capability.execute(r#"{"result":"done","tokens_in":120,"tokens_out":30}"#);
        assert_eq!(output.outcome.unwrap(), "done");
        assert_eq!(output.tokens_in, 120);
        assert_eq!(output.tokens_out, 30);
    }

    #[test]
    fn test_error_response_fails_the_item() {
        let mut capability =
            CommandCapability::new("cat", vec![], Duration::from_secs(5)).unwrap();
        let output = capability.execute(r#"{"error":"cannot comply"}"#);
        assert_eq!(output.outcome.unwrap_err(), "cannot comply");
    }

    #[test]
    fn test_timeout_kills_worker() {
        let mut capability =
            CommandCapability::new("sleep", vec!["30".to_string()], Duration::from_millis(100))
                .unwrap();
        let output = capability.execute("ignored");
        assert!(output.outcome.unwrap_err().contains("timed out"));
    }
}
