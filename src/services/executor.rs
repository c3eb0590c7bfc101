//! Runs one command over an open [`Session`].
//!
//! The command string goes to the remote user's default shell untouched: no
//! quoting, escaping or sandboxing happens here, so whoever builds the string
//! owns any injection risk.

use crate::models::{CourierError, CourierResult};
use crate::services::connection::Session;
use russh::ChannelMsg;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything the remote command produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `-1` when the command was killed by a signal.
    pub exit_code: i32,
    pub exit_signal: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

pub struct CommandExecutor {
    execution_timeout: Option<Duration>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(Some(DEFAULT_EXECUTION_TIMEOUT))
    }
}

impl CommandExecutor {
    /// `None` lets commands run for as long as they like.
    pub fn new(execution_timeout: Option<Duration>) -> Self {
        Self { execution_timeout }
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    /// Run `command` and wait until it exits and both streams are drained.
    ///
    /// A non-zero exit code is a normal result. Errors mean the transport
    /// failed or the execution timeout ran out.
    pub async fn execute(&self, session: &mut Session, command: &str) -> CourierResult<CommandOutput> {
        log::info!(
            "[executor] Running on {}@{}: {}",
            session.username(),
            session.host(),
            truncate(command, 80)
        );

        let mut channel = session.open_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| CourierError::Transport {
                message: format!("Failed to start command: {}", e),
            })?;

        let collect = async {
            let mut output = CommandOutput::default();
            let mut exit_status: Option<u32> = None;

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                    ChannelMsg::ExtendedData { data, ext } => {
                        // ext 1 is stderr, nothing else is defined
                        if ext == 1 {
                            output.stderr.extend_from_slice(&data);
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                    ChannelMsg::ExitSignal { signal_name, .. } => {
                        output.exit_signal = Some(format!("{:?}", signal_name));
                    }
                    ChannelMsg::Failure => {
                        return Err(CourierError::Transport {
                            message: "Remote host refused to run the command".to_string(),
                        });
                    }
                    _ => {}
                }
            }

            output.exit_code = match (exit_status, &output.exit_signal) {
                (Some(code), _) => code as i32,
                (None, Some(_)) => -1,
                (None, None) => {
                    return Err(CourierError::Transport {
                        message: "Channel closed before the command reported an exit status"
                            .to_string(),
                    })
                }
            };
            Ok(output)
        };

        let result = match self.execution_timeout {
            Some(limit) => match timeout(limit, collect).await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!(
                        "[executor] Command on {} exceeded {}s, abandoning channel",
                        session.host(),
                        limit.as_secs()
                    );
                    Err(CourierError::ExecutionTimeout {
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => collect.await,
        };

        if let Ok(output) = &result {
            log::info!(
                "[executor] Command on {} exited with {} ({} bytes stdout, {} bytes stderr)",
                session.host(),
                output.exit_code,
                output.stdout.len(),
                output.stderr.len()
            );
        }
        result
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_exit_code_zero() {
        let ok = CommandOutput {
            stdout: b"hello\n".to_vec(),
            ..Default::default()
        };
        assert!(ok.success());
        assert_eq!(ok.stdout_lossy(), "hello\n");

        let failed = CommandOutput {
            exit_code: 3,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("ls", 80), "ls");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_default_timeout_is_finite() {
        assert_eq!(
            CommandExecutor::default().execution_timeout(),
            Some(DEFAULT_EXECUTION_TIMEOUT)
        );
        assert_eq!(CommandExecutor::new(None).execution_timeout(), None);
    }
}
