use crate::models::CourierError;
use crate::services::{CommandOutput, RemoteEngine, RemoteTarget, UploadSummary};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub host: String,
    pub username: String,
    pub key_name: String,
    pub command: String,
    pub connect_timeout_secs: Option<u64>,
    /// Overrides the configured execution timeout; 0 disables it.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub host: String,
    pub username: String,
    pub key_name: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub connect_timeout_secs: Option<u64>,
}

/// The operation could not be carried out at all.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub success: bool,
    pub error: CourierError,
}

impl From<CourierError> for Failure {
    fn from(error: CourierError) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

/// The command ran; `success` reflects its exit code only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
}

impl From<CommandOutput> for CommandReport {
    fn from(output: CommandOutput) -> Self {
        Self {
            success: output.success(),
            output: output.stdout_lossy(),
            error: output.stderr_lossy(),
            exit_code: output.exit_code,
            exit_signal: output.exit_signal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Completed(CommandReport),
    Failed(Failure),
}

impl ExecuteResponse {
    pub fn success(&self) -> bool {
        matches!(self, ExecuteResponse::Completed(report) if report.success)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub success: bool,
    pub message: String,
    pub bytes: u64,
}

impl From<UploadSummary> for UploadReport {
    fn from(summary: UploadSummary) -> Self {
        Self {
            success: true,
            message: format!(
                "Uploaded {} to {}",
                summary.local_path, summary.remote_path
            ),
            bytes: summary.bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Completed(UploadReport),
    Failed(Failure),
}

impl UploadResponse {
    pub fn success(&self) -> bool {
        matches!(self, UploadResponse::Completed(_))
    }
}

fn target(host: &str, username: &str, key_name: &str, connect_timeout_secs: Option<u64>) -> RemoteTarget {
    let mut target = RemoteTarget::new(host, username, key_name);
    target.connect_timeout = connect_timeout_secs.map(Duration::from_secs);
    target
}

/// 在遠端主機執行指令
pub async fn execute_ssh_command(engine: &RemoteEngine, request: ExecuteRequest) -> ExecuteResponse {
    let target = target(
        &request.host,
        &request.username,
        &request.key_name,
        request.connect_timeout_secs,
    );
    let execution_timeout = request.timeout_secs.map(|secs| match secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    });

    match engine
        .run_command(&target, &request.command, execution_timeout)
        .await
    {
        Ok(output) => {
            log::info!(
                "[remote] Command on {} finished: exit_code={}",
                request.host,
                output.exit_code
            );
            ExecuteResponse::Completed(output.into())
        }
        Err(e) => {
            log::warn!("[remote] Command on {} failed: {}", request.host, e);
            ExecuteResponse::Failed(e.into())
        }
    }
}

/// 上傳檔案到遠端主機
pub async fn upload_file(engine: &RemoteEngine, request: UploadRequest) -> UploadResponse {
    let target = target(
        &request.host,
        &request.username,
        &request.key_name,
        request.connect_timeout_secs,
    );

    match engine
        .upload_file(&target, &request.local_path, &request.remote_path)
        .await
    {
        Ok(summary) => UploadResponse::Completed(summary.into()),
        Err(e) => {
            log::warn!("[remote] Upload to {} failed: {}", request.host, e);
            UploadResponse::Failed(e.into())
        }
    }
}
