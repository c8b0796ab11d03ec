//! Claude CLI agent runner.
//!
//! Spawns the agent with `stream-json` output and relays each stdout line as
//! a [`RawEvent`]. Stderr is drained on its own task so it can never block
//! the stdout pipe.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::traits::AgentRunner;
use crate::error::ReviewError;
use crate::models::RawEvent;

/// Capacity of the raw event channel.
pub const RAW_EVENT_CHANNEL_CAPACITY: usize = 100;

/// Stderr lines kept for the exit error message.
const STDERR_TAIL_LINES: usize = 20;

/// Agent process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Binary name or path.
    pub binary: String,

    /// Arguments placed before `-- <prompt>`.
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            args: [
                "-p",
                "--dangerously-skip-permissions",
                "--output-format",
                "stream-json",
                "--verbose",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Runs the Claude CLI (or any binary speaking the same JSONL protocol).
#[derive(Debug, Clone, Default)]
pub struct ClaudeCli {
    config: AgentConfig,
}

impl ClaudeCli {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

#[async_trait]
impl AgentRunner for ClaudeCli {
    fn name(&self) -> &str {
        &self.config.binary
    }

    fn is_available(&self) -> bool {
        which::which(&self.config.binary).is_ok()
    }

    async fn stream_run(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>, ReviewError> {
        if !self.is_available() {
            return Err(ReviewError::agent_unavailable(&self.config.binary));
        }

        let binary = self.config.binary.clone();
        let mut child = Command::new(&binary)
            .args(&self.config.args)
            .arg("--")
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReviewError::agent(format!("Failed to start {}: {}", binary, e)))?;

        log::info!("[agent] Spawned {} (pid {})", binary, child.id().unwrap_or(0));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReviewError::agent("Failed to capture agent stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReviewError::agent("Failed to capture agent stderr"))?;

        let stderr_task = drain_stderr(stderr);
        let (tx, rx) = mpsc::channel(RAW_EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut cancelled = false;

            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    line = lines.next_line() => line,
                };

                let event = match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => RawEvent::from_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(RawEvent::error("read_error", e.to_string())).await;
                        break;
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            log::debug!("[agent] Event consumer dropped, stopping {}", binary);
                            cancelled = true;
                            break;
                        }
                    }
                }
            }

            if cancelled {
                log::info!("[agent] Terminating {}", binary);
                if let Err(e) = child.start_kill() {
                    log::warn!("[agent] Failed to kill {}: {}", binary, e);
                }
            }

            // Join the stderr drain before reaping the child.
            let stderr_tail = stderr_task.await.unwrap_or_default();

            match child.wait().await {
                Ok(status) if !status.success() && !cancelled => {
                    log::warn!("[agent] {} exited with {}", binary, status);
                    let message = if stderr_tail.is_empty() {
                        format!("{} exited with {}", binary, status)
                    } else {
                        format!("{} exited with {}: {}", binary, status, stderr_tail)
                    };
                    let _ = tx.send(RawEvent::error("exit_status", message)).await;
                }
                Ok(status) => log::debug!("[agent] {} exited with {}", binary, status),
                Err(e) => log::warn!("[agent] Failed to wait for {}: {}", binary, e),
            }
        });

        Ok(rx)
    }
}

/// Log stderr lines and return the last few joined by newlines.
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[agent] stderr: {}", line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        Vec::from(tail).join("\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.binary, "claude");
        assert!(config.args.contains(&"stream-json".to_string()));
        assert_eq!(config.args[0], "-p");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let runner = ClaudeCli::new(AgentConfig {
            binary: "definitely-not-a-real-agent-binary".to_string(),
            args: Vec::new(),
        });
        assert!(!runner.is_available());

        let err = runner
            .stream_run("hi", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::AgentUnavailable { .. }));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ClaudeCli {
        // `sh -c script -- prompt`: the trailing args land in $0 and $1.
        ClaudeCli::new(AgentConfig {
            binary: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_parses_jsonl() {
        let runner = shell(
            r#"echo '{"type":"system","subtype":"init"}'
echo ''
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Checking"}]}}'
echo 'not json'
echo "{\"type\":\"result\",\"result\":\"$1\"}""#,
        );

        let mut rx = runner.stream_run("done", CancellationToken::new()).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RawEvent::System { .. }));
        assert_eq!(events[1].text().as_deref(), Some("Checking"));
        assert!(events[2].is_error());
        assert_eq!(events[3].text().as_deref(), Some("done"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let runner = shell("echo 'model overloaded' >&2; exit 3");
        let mut rx = runner.stream_run("x", CancellationToken::new()).await.unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            RawEvent::Error { error } => {
                assert_eq!(error.kind, "exit_status");
                assert!(error.message.contains("model overloaded"));
            }
            other => panic!("expected exit error, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let runner = shell("echo '{\"type\":\"system\"}'; exec sleep 30");
        let cancel = CancellationToken::new();
        let mut rx = runner.stream_run("x", cancel.clone()).await.unwrap();

        assert!(matches!(rx.recv().await, Some(RawEvent::System { .. })));
        cancel.cancel();

        let closed = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }
}
