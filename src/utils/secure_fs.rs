//! File helpers that keep key material at owner-only permissions.

use crate::models::CourierResult;
use crate::utils::path_validator::TEMP_FILE_PREFIX;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const PRIVATE_KEY_MODE: u32 = 0o600;
pub const PUBLIC_KEY_MODE: u32 = 0o644;
pub const KEYS_DIR_MODE: u32 = 0o700;

/// Create `dir` with mode 0700 if it does not exist yet.
pub async fn ensure_private_dir(dir: &Path) -> CourierResult<()> {
    if fs::metadata(dir).await.is_ok() {
        return Ok(());
    }

    fs::create_dir_all(dir).await?;
    #[cfg(unix)]
    {
        let perms = std::fs::Permissions::from_mode(KEYS_DIR_MODE);
        fs::set_permissions(dir, perms).await?;
    }
    log::info!("[secure_fs] Created keys directory {}", dir.display());
    Ok(())
}

/// Write `contents` to a temporary file next to `target` with `mode` applied.
///
/// The returned path still has to be moved into place with [`commit`]; the
/// file never exists at `target` with partial content or loose permissions.
pub async fn write_staged(target: &Path, contents: &[u8], mode: u32) -> CourierResult<PathBuf> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let staged = dir.join(format!("{}{:016x}", TEMP_FILE_PREFIX, rand::random::<u64>()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);

    let result = async {
        let mut file = options.open(&staged).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        // umask may have narrowed the creation mode, set it explicitly
        #[cfg(unix)]
        fs::set_permissions(&staged, std::fs::Permissions::from_mode(mode)).await?;
        #[cfg(not(unix))]
        let _ = mode;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&staged).await;
        return Err(e.into());
    }
    Ok(staged)
}

/// Atomically move a staged file onto its final name.
pub async fn commit(staged: &Path, target: &Path) -> CourierResult<()> {
    if let Err(e) = fs::rename(staged, target).await {
        let _ = fs::remove_file(staged).await;
        return Err(e.into());
    }
    Ok(())
}

/// Remove a staged file that will not be committed.
pub async fn discard(staged: &Path) {
    if let Err(e) = fs::remove_file(staged).await {
        log::warn!(
            "[secure_fs] Failed to remove staged file {}: {}",
            staged.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    async fn file_mode(path: &Path) -> CourierResult<Option<u32>> {
        let metadata = fs::metadata(path).await?;
        Ok(Some(metadata.permissions().mode() & 0o777))
    }

    #[tokio::test]
    async fn test_ensure_private_dir_creates_owner_only() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("keys");

        ensure_private_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
        #[cfg(unix)]
        assert_eq!(file_mode(&dir).await.unwrap(), Some(KEYS_DIR_MODE));
    }

    #[tokio::test]
    async fn test_staged_write_lands_with_mode() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("deploy");

        let staged = write_staged(&target, b"secret", PRIVATE_KEY_MODE)
            .await
            .unwrap();
        assert!(!target.exists());
        commit(&staged, &target).await.unwrap();

        assert!(!staged.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"secret");
        #[cfg(unix)]
        assert_eq!(file_mode(&target).await.unwrap(), Some(PRIVATE_KEY_MODE));
    }

    #[tokio::test]
    async fn test_discard_removes_staged_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("deploy.pub");

        let staged = write_staged(&target, b"ssh-rsa AAAA", PUBLIC_KEY_MODE)
            .await
            .unwrap();
        discard(&staged).await;

        assert!(!staged.exists());
        assert!(!target.exists());
    }
}
