//! Host identity verification against a known_hosts file owned by this crate.
//!
//! The policy is explicit configuration. The default, trust-on-first-use,
//! accepts and records whatever key a host presents the first time we see
//! it and rejects the host if that key later changes. That trades protection
//! against a first-contact man-in-the-middle for zero setup; deployments that
//! cannot accept the trade should pre-populate the file and use
//! [`HostKeyPolicy::KnownHosts`].
//!
//! A new key is recorded only after authentication against the host
//! succeeds, so a failed login leaves the file untouched.

use crate::models::{CourierError, CourierResult};
use crate::utils::secure_fs::PRIVATE_KEY_MODE;
use serde::{Deserialize, Serialize};
use ssh_key::{HashAlg, PublicKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// How server host keys are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept and remember unknown hosts, reject changed keys.
    #[default]
    TrustOnFirstUse,
    /// Accept only keys already recorded in the known_hosts file.
    KnownHosts,
    /// Accept every key and record nothing.
    AcceptAny,
}

impl std::fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKeyPolicy::TrustOnFirstUse => write!(f, "trust-on-first-use"),
            HostKeyPolicy::KnownHosts => write!(f, "known-hosts"),
            HostKeyPolicy::AcceptAny => write!(f, "accept-any"),
        }
    }
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trust-on-first-use" | "tofu" => Ok(HostKeyPolicy::TrustOnFirstUse),
            "known-hosts" | "strict" => Ok(HostKeyPolicy::KnownHosts),
            "accept-any" => Ok(HostKeyPolicy::AcceptAny),
            other => Err(CourierError::Config {
                message: format!(
                    "Unknown host key policy: {} (use trust-on-first-use, known-hosts or accept-any)",
                    other
                ),
            }),
        }
    }
}

/// Known hosts check result
#[derive(Debug, Clone, PartialEq)]
pub enum KnownHostStatus {
    /// Host is recorded and the key matches
    Matched,
    /// Host is not recorded (first connection)
    Unknown,
    /// Host is recorded with a different key
    Changed,
}

/// What the policy says to do with a presented key.
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyDecision {
    Accept,
    AcceptAndRemember,
    Reject(String),
}

impl HostKeyPolicy {
    pub fn decide(&self, status: &KnownHostStatus) -> HostKeyDecision {
        match (self, status) {
            (HostKeyPolicy::AcceptAny, _) => HostKeyDecision::Accept,
            (_, KnownHostStatus::Matched) => HostKeyDecision::Accept,
            (HostKeyPolicy::TrustOnFirstUse, KnownHostStatus::Unknown) => {
                HostKeyDecision::AcceptAndRemember
            }
            (HostKeyPolicy::KnownHosts, KnownHostStatus::Unknown) => {
                HostKeyDecision::Reject("host is not in known_hosts".to_string())
            }
            (_, KnownHostStatus::Changed) => HostKeyDecision::Reject(
                "host key differs from the recorded one (possible man-in-the-middle)".to_string(),
            ),
        }
    }
}

/// Parsed known_hosts content: host pattern -> recorded keys.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: HashMap<String, Vec<PublicKey>>,
}

impl KnownHosts {
    /// Load from `path`; a missing file is an empty set.
    pub async fn load(path: &Path) -> CourierResult<Self> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[known_hosts] {} does not exist yet", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut entries: HashMap<String, Vec<PublicKey>> = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            // markers (@cert-authority, @revoked) are not supported
            if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let hostnames = match fields.next() {
                Some(h) => h,
                None => continue,
            };
            // hashed hostnames cannot be matched without the salt scheme
            if hostnames.starts_with("|1|") {
                continue;
            }
            let (key_type, key_base64) = match (fields.next(), fields.next()) {
                (Some(t), Some(k)) => (t, k),
                _ => {
                    log::debug!("[known_hosts] Skipping malformed line {}", index + 1);
                    continue;
                }
            };
            let key = match PublicKey::from_openssh(&format!("{} {}", key_type, key_base64)) {
                Ok(key) => key,
                Err(e) => {
                    log::debug!("[known_hosts] Skipping line {}: {}", index + 1, e);
                    continue;
                }
            };

            for hostname in hostnames.split(',') {
                entries
                    .entry(hostname.trim().to_lowercase())
                    .or_default()
                    .push(key.clone());
            }
        }

        Self { entries }
    }

    /// `host` on port 22, `[host]:port` otherwise.
    pub fn entry_name(host: &str, port: u16) -> String {
        if port == 22 {
            host.to_lowercase()
        } else {
            format!("[{}]:{}", host.to_lowercase(), port)
        }
    }

    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> KnownHostStatus {
        match self.entries.get(&Self::entry_name(host, port)) {
            None => KnownHostStatus::Unknown,
            Some(known) if known.iter().any(|k| k.key_data() == key.key_data()) => {
                KnownHostStatus::Matched
            }
            Some(_) => KnownHostStatus::Changed,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applies a [`HostKeyPolicy`] and records newly trusted hosts.
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy, path: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file content, for a handler to check against.
    pub async fn snapshot(&self) -> CourierResult<KnownHosts> {
        if self.policy == HostKeyPolicy::AcceptAny {
            return Ok(KnownHosts::default());
        }
        KnownHosts::load(&self.path).await
    }

    /// Append `key` for `host:port` unless an identical entry is already there.
    pub async fn remember(&self, host: &str, port: u16, key: &PublicKey) -> CourierResult<()> {
        let _guard = self.write_lock.lock().await;

        let current = KnownHosts::load(&self.path).await?;
        if current.check(host, port, key) == KnownHostStatus::Matched {
            return Ok(());
        }

        let mut key = key.clone();
        key.set_comment("");
        let key_line = key
            .to_openssh()
            .map_err(|e| CourierError::validation(e.to_string()))?;
        let entry = format!("{} {}\n", KnownHosts::entry_name(host, port), key_line);

        if let Some(parent) = self.path.parent() {
            crate::utils::secure_fs::ensure_private_dir(parent).await?;
        }

        let mut options = fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(PRIVATE_KEY_MODE);
        let mut file = options.open(&self.path).await?;
        file.write_all(entry.as_bytes()).await?;
        file.sync_all().await?;

        log::info!(
            "[known_hosts] Trusted new host key for {}:{} ({})",
            host,
            port,
            key.fingerprint(HashAlg::Sha256)
        );
        Ok(())
    }
}
