//! Layered configuration: compiled defaults, then a TOML file, then
//! `SSH_COURIER_*` environment variables (`__` separates sections, e.g.
//! `SSH_COURIER_CONNECTION__PORT=2222`).

use crate::models::{CourierError, CourierResult};
use crate::services::connection::{ConnectionManager, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SSH_PORT};
use crate::services::executor::{CommandExecutor, DEFAULT_EXECUTION_TIMEOUT};
use crate::services::key_store::{KeyStore, DEFAULT_RSA_BITS, MAX_RSA_BITS, MIN_RSA_BITS};
use crate::services::known_hosts::{HostKeyPolicy, HostKeyVerifier};
use crate::services::remote::RemoteEngine;
use crate::utils::path_validator::KNOWN_HOSTS_FILE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "ssh-courier.toml";
pub const ENV_PREFIX: &str = "SSH_COURIER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Key directory, `~/.ssh_mcp` when unset
    pub dir: Option<PathBuf>,
    pub rsa_bits: usize,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: None,
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
    pub host_key_policy: HostKeyPolicy,
    /// `<keys dir>/known_hosts` when unset
    pub known_hosts_path: Option<PathBuf>,
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            port: DEFAULT_SSH_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 0 disables the limit
    pub timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_EXECUTION_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub keys: KeysConfig,
    pub connection: ConnectionConfig,
    pub execution: ExecutionConfig,
}

impl CourierConfig {
    /// Load from `path`, or from `ssh-courier.toml` in the working directory
    /// when it exists, with environment overrides on top.
    pub fn load(path: Option<&Path>) -> CourierResult<Self> {
        let figment = match path {
            Some(p) => {
                if !p.is_file() {
                    return Err(CourierError::Config {
                        message: format!("Config file not found: {}", p.display()),
                    });
                }
                Self::figment().merge(Toml::file(p))
            }
            None => Self::figment().merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(CourierConfig::default()))
    }

    pub fn from_figment(figment: Figment) -> CourierResult<Self> {
        let config: CourierConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CourierResult<()> {
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&self.keys.rsa_bits) {
            return Err(CourierError::Config {
                message: format!(
                    "keys.rsa_bits must be between {} and {}, got {}",
                    MIN_RSA_BITS, MAX_RSA_BITS, self.keys.rsa_bits
                ),
            });
        }
        if self.connection.connect_timeout_secs == 0 {
            return Err(CourierError::Config {
                message: "connection.connect_timeout_secs must be greater than 0".to_string(),
            });
        }
        if self.connection.port == 0 {
            return Err(CourierError::Config {
                message: "connection.port must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn keys_dir(&self) -> CourierResult<PathBuf> {
        match &self.keys.dir {
            Some(dir) => Ok(dir.clone()),
            None => KeyStore::default_keys_dir(),
        }
    }

    pub fn known_hosts_path(&self) -> CourierResult<PathBuf> {
        match &self.connection.known_hosts_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.keys_dir()?.join(KNOWN_HOSTS_FILE)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        match self.execution.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn key_store(&self) -> CourierResult<Arc<KeyStore>> {
        Ok(Arc::new(KeyStore::with_rsa_bits(
            self.keys_dir()?,
            self.keys.rsa_bits,
        )))
    }

    /// Wire up a [`RemoteEngine`] around an existing store.
    pub fn remote_engine(&self, key_store: Arc<KeyStore>) -> CourierResult<RemoteEngine> {
        let verifier = Arc::new(HostKeyVerifier::new(
            self.connection.host_key_policy,
            self.known_hosts_path()?,
        ));
        let connections = ConnectionManager::new(key_store, verifier)
            .with_connect_timeout(self.connect_timeout())
            .with_default_port(self.connection.port);
        Ok(RemoteEngine::new(
            connections,
            CommandExecutor::new(self.execution_timeout()),
        ))
    }
}
