//! Built-in stage executors.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::item::WorkItem;
use super::stage::StageExecutor;
use crate::{Error, Result};

/// Executor selection for a configured stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Always succeeds.
    #[default]
    Noop,
    /// Run a shell command.
    Command(CommandConfig),
}

/// Shell command stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Command line passed to the platform shell.
    pub command: String,
    /// Working directory for the command.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Stage that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

#[async_trait]
impl StageExecutor for NoopExecutor {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn execute(&self, item: &WorkItem) -> Result<()> {
        debug!(identity = %item.identity, "noop stage");
        Ok(())
    }
}

/// Runs a shell command per item.
///
/// The item identity and attempt are exported as `WATCHFLOW_ITEM_ID` and
/// `WATCHFLOW_ATTEMPT`; the payload is written to the command's stdin.
/// A non-zero exit status is a stage failure. The child is killed when the
/// future is dropped, so the runner's timeout terminates it.
pub struct CommandExecutor {
    config: CommandConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, item: &WorkItem) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.args(["/C", &self.config.command]);
            c
        };

        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.args(["-c", &self.config.command]);
            c
        };

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        cmd.env("WATCHFLOW_ITEM_ID", item.identity.as_str())
            .env("WATCHFLOW_ATTEMPT", item.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl StageExecutor for CommandExecutor {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn execute(&self, item: &WorkItem) -> Result<()> {
        debug!(identity = %item.identity, "Executing command: {}", self.config.command);

        let mut child = self
            .build_command(item)
            .spawn()
            .map_err(|e| Error::stage_failure("command", format!("failed to spawn: {}", e)))?;

        let stdout_handle = child.stdout.take().map(|stdout| {
            let identity = item.identity.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(identity = %identity, "stdout: {}", line);
                }
            })
        });

        let stderr_handle = child.stderr.take().map(|stderr| {
            let identity = item.identity.clone();
            tokio::spawn(async move {
                let mut last = None;
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(identity = %identity, "stderr: {}", line);
                    last = Some(line);
                }
                last
            })
        });

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&item.payload).await {
                debug!(identity = %item.identity, "stdin closed early: {}", e);
            }
            drop(stdin);
        }

        let status = child.wait().await?;

        if let Some(handle) = stdout_handle {
            let _ = handle.await;
        }
        let last_stderr = match stderr_handle {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            warn!(identity = %item.identity, "Command exited with status: {}", status);
            let message = match last_stderr {
                Some(line) => format!("exit code {}: {}", code, line),
                None => format!("exit code {}", code),
            };
            return Err(Error::stage_failure("command", message));
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn executor(command: &str) -> CommandExecutor {
        CommandExecutor::new(CommandConfig {
            command: command.to_string(),
            working_dir: None,
            env: Vec::new(),
        })
    }

    #[test]
    fn test_executor_config_serde() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"type":"command","command":"true"}"#).unwrap();
        match config {
            ExecutorConfig::Command(c) => assert_eq!(c.command, "true"),
            other => panic!("unexpected {:?}", other),
        }

        let config: ExecutorConfig = serde_json::from_str(r#"{"type":"noop"}"#).unwrap();
        assert!(matches!(config, ExecutorConfig::Noop));
    }

    #[tokio::test]
    async fn test_command_success() {
        let item = WorkItem::new("a", b"payload".to_vec());
        executor("true").execute(&item).await.unwrap();
    }

    #[tokio::test]
    async fn test_command_nonzero_exit_fails() {
        let item = WorkItem::new("a", Vec::new());
        let err = executor("echo boom >&2; exit 3").execute(&item).await.unwrap_err();
        match err {
            Error::StageFailure { message, .. } => {
                assert!(message.contains("exit code 3"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_sees_identity_and_payload() {
        let item = WorkItem::new("msg-42", b"hello".to_vec());
        let script = r#"test "$WATCHFLOW_ITEM_ID" = msg-42 \
            && test "$WATCHFLOW_ATTEMPT" = 1 \
            && test "$(cat)" = hello"#;
        executor(script).execute(&item).await.unwrap();
    }
}
