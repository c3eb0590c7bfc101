//! File upload over the SCP sink protocol (`scp -t`) on a session channel.
//!
//! The destination is overwritten unconditionally. There is no resume and no
//! checksum: an interrupted copy leaves a partial file at `remote_path`.
//! Callers needing atomicity upload to a temporary name and rename remotely.

use crate::models::{CourierError, CourierResult};
use crate::services::connection::Session;
use crate::utils::path_validator::shell_quote;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub local_path: String,
    pub remote_path: String,
    pub bytes: u64,
}

/// Reads SCP status bytes off the channel, keeping whatever arrives on
/// stderr for error messages.
struct ScpChannel {
    channel: Channel<Msg>,
    pending: VecDeque<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl ScpChannel {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
            stderr: Vec::new(),
            exit_status: None,
        }
    }

    async fn next_byte(&mut self) -> Option<u8> {
        loop {
            if let Some(byte) = self.pending.pop_front() {
                return Some(byte);
            }
            match self.channel.wait().await? {
                ChannelMsg::Data { data } => self.pending.extend(data.iter().copied()),
                ChannelMsg::ExtendedData { data, .. } => self.stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
                ChannelMsg::Failure => return None,
                _ => {}
            }
        }
    }

    /// 0 = ok, 1 = warning + message, 2 = fatal + message
    async fn read_ack(&mut self, step: &str) -> CourierResult<()> {
        match self.next_byte().await {
            Some(0) => Ok(()),
            Some(code @ (1 | 2)) => {
                let mut message = Vec::new();
                while let Some(byte) = self.next_byte().await {
                    if byte == b'\n' {
                        break;
                    }
                    message.push(byte);
                }
                Err(CourierError::transfer(format!(
                    "Remote scp rejected {} ({}): {}",
                    step,
                    if code == 1 { "warning" } else { "fatal" },
                    String::from_utf8_lossy(&message).trim()
                )))
            }
            Some(other) => Err(CourierError::transfer(format!(
                "Unexpected scp response byte {:#04x} after {}",
                other, step
            ))),
            None => Err(CourierError::transfer(format!(
                "Remote scp closed the channel during {}{}",
                step,
                self.stderr_suffix()
            ))),
        }
    }

    async fn send(&mut self, bytes: &[u8], step: &str) -> CourierResult<()> {
        self.channel
            .data(bytes)
            .await
            .map_err(|e| CourierError::transfer(format!("Channel write failed during {}: {}", step, e)))
    }

    /// Signal EOF and drain until the remote side closes.
    async fn finish(mut self) -> CourierResult<()> {
        self.channel
            .eof()
            .await
            .map_err(|e| CourierError::transfer(format!("Failed to send EOF: {}", e)))?;

        while self.next_byte().await.is_some() {}

        match self.exit_status {
            Some(0) | None => Ok(()),
            Some(code) => Err(CourierError::transfer(format!(
                "Remote scp exited with status {}{}",
                code,
                self.stderr_suffix()
            ))),
        }
    }

    fn stderr_suffix(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            String::new()
        } else {
            format!(": {}", stderr)
        }
    }
}

pub struct FileTransfer;

impl FileTransfer {
    /// Copy the full contents of `local_path` to `remote_path`.
    pub async fn upload(
        session: &mut Session,
        local_path: &Path,
        remote_path: &str,
    ) -> CourierResult<UploadSummary> {
        if remote_path.trim().is_empty() {
            return Err(CourierError::transfer("Remote path cannot be empty"));
        }

        let metadata = fs::metadata(local_path).await.map_err(|e| {
            CourierError::transfer(format!("Cannot read {}: {}", local_path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(CourierError::transfer(format!(
                "{} is not a regular file",
                local_path.display()
            )));
        }
        let size = metadata.len();
        let mode = file_mode(&metadata);

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CourierError::transfer(format!("{} has no usable file name", local_path.display()))
            })?;
        if file_name.contains('\n') {
            return Err(CourierError::transfer("File name contains a newline"));
        }

        let mut file = fs::File::open(local_path).await.map_err(|e| {
            CourierError::transfer(format!("Cannot open {}: {}", local_path.display(), e))
        })?;

        log::info!(
            "[transfer] Uploading {} ({} bytes) to {}@{}:{}",
            local_path.display(),
            size,
            session.username(),
            session.host(),
            remote_path
        );

        let channel = session.open_channel().await.map_err(|e| {
            CourierError::transfer(format!("Failed to open scp channel: {}", e))
        })?;
        let mut scp = ScpChannel::new(channel);
        scp.channel
            .exec(true, format!("scp -t {}", shell_quote(remote_path)))
            .await
            .map_err(|e| CourierError::transfer(format!("Failed to start remote scp: {}", e)))?;

        scp.read_ack("session start").await?;

        let header = format!("C{:04o} {} {}\n", mode, size, file_name);
        scp.send(header.as_bytes(), "file header").await?;
        scp.read_ack("file header").await?;

        let mut sent: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while sent < size {
            let want = std::cmp::min(CHUNK_SIZE as u64, size - sent) as usize;
            let n = file.read(&mut buf[..want]).await.map_err(|e| {
                CourierError::transfer(format!("Read of {} failed: {}", local_path.display(), e))
            })?;
            if n == 0 {
                return Err(CourierError::transfer(format!(
                    "{} shrank during upload ({} of {} bytes sent)",
                    local_path.display(),
                    sent,
                    size
                )));
            }
            scp.send(&buf[..n], "file contents").await?;
            sent += n as u64;
        }

        scp.send(&[0u8], "end of file").await?;
        scp.read_ack("file contents").await?;
        scp.finish().await?;

        log::info!(
            "[transfer] Uploaded {} bytes to {}:{}",
            sent,
            session.host(),
            remote_path
        );

        Ok(UploadSummary {
            local_path: local_path.display().to_string(),
            remote_path: remote_path.to_string(),
            bytes: sent,
        })
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
