use crate::models::CourierResult;
use crate::services::connection::{ConnectionManager, Session};
use crate::services::executor::{CommandExecutor, CommandOutput};
use crate::services::key_store::KeyStore;
use crate::services::transfer::{FileTransfer, UploadSummary};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub username: String,
    pub key_name: String,
    pub connect_timeout: Option<Duration>,
}

impl RemoteTarget {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            key_name: key_name.into(),
            connect_timeout: None,
        }
    }
}

/// Open a session, do one thing with it, close it.
///
/// The session is closed whether the operation succeeded or not; nothing is
/// reused between calls.
pub struct RemoteEngine {
    connections: ConnectionManager,
    executor: CommandExecutor,
}

impl RemoteEngine {
    pub fn new(connections: ConnectionManager, executor: CommandExecutor) -> Self {
        Self {
            connections,
            executor,
        }
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        self.connections.key_store()
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Run `command` on the target. `execution_timeout` overrides the
    /// configured limit for this call only; `Some(None)` disables it.
    pub async fn run_command(
        &self,
        target: &RemoteTarget,
        command: &str,
        execution_timeout: Option<Option<Duration>>,
    ) -> CourierResult<CommandOutput> {
        let executor = match execution_timeout {
            Some(limit) => CommandExecutor::new(limit),
            None => CommandExecutor::new(self.executor.execution_timeout()),
        };

        let mut session = self.open(target).await?;
        let result = executor.execute(&mut session, command).await;
        session.close().await;
        result
    }

    pub async fn upload_file(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> CourierResult<UploadSummary> {
        let mut session = self.open(target).await?;
        let result = FileTransfer::upload(&mut session, local_path, remote_path).await;
        session.close().await;
        result
    }

    async fn open(&self, target: &RemoteTarget) -> CourierResult<Session> {
        self.connections
            .open(
                &target.host,
                &target.username,
                &target.key_name,
                target.connect_timeout,
            )
            .await
    }
}
