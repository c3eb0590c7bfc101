use crate::models::{CourierError, CourierResult, KeyRecord};
use crate::services::key_store::{parse_private_key, KeyStore};
use crate::services::known_hosts::{
    HostKeyDecision, HostKeyPolicy, HostKeyVerifier, KnownHostStatus, KnownHosts,
};
use crate::utils::path_validator::parse_host_port;
use async_trait::async_trait;
use base64::Engine;
use russh::keys::key::PublicKey;
use russh::{client, Channel, Disconnect};
use russh_keys::PublicKeyBase64;
use ssh_key::{HashAlg, LineEnding};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SSH_PORT: u16 = 22;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Host key check state shared between the handler and `open`
#[derive(Debug, Clone, Default)]
struct SharedHostKeyState {
    status: Option<KnownHostStatus>,
    decision: Option<HostKeyDecision>,
    server_key: Option<ssh_key::PublicKey>,
}

/// SSH client handler
pub struct ClientHandler {
    hostname: String,
    port: u16,
    policy: HostKeyPolicy,
    /// Snapshot of the known_hosts file taken before connecting
    known_hosts: KnownHosts,
    shared_state: Arc<Mutex<SharedHostKeyState>>,
}

impl ClientHandler {
    fn new(
        hostname: &str,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts: KnownHosts,
        shared_state: Arc<Mutex<SharedHostKeyState>>,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            policy,
            known_hosts,
            shared_state,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let mut state = self.shared_state.lock().await;

        let server_key = match to_ssh_key(server_public_key) {
            Ok(key) => key,
            Err(e) => {
                log::warn!(
                    "[connection] Could not parse host key from {}:{}: {}",
                    self.hostname,
                    self.port,
                    e
                );
                state.decision = Some(HostKeyDecision::Reject(format!(
                    "unparseable host key: {}",
                    e
                )));
                return Ok(false);
            }
        };

        let status = self.known_hosts.check(&self.hostname, self.port, &server_key);
        let decision = self.policy.decide(&status);

        log::info!(
            "[connection] Host key for {}:{} is {:?} ({}), policy {} -> {:?}",
            self.hostname,
            self.port,
            status,
            server_key.fingerprint(HashAlg::Sha256),
            self.policy,
            decision
        );

        let accept = !matches!(decision, HostKeyDecision::Reject(_));
        state.status = Some(status);
        state.decision = Some(decision);
        state.server_key = Some(server_key);

        Ok(accept)
    }
}

/// russh hands us its own key type; re-read the wire blob with ssh-key so
/// known_hosts comparison and fingerprints use one representation.
fn to_ssh_key(key: &PublicKey) -> CourierResult<ssh_key::PublicKey> {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(key.public_key_base64())
        .map_err(|e| CourierError::validation(e.to_string()))?;
    Ok(ssh_key::PublicKey::from_bytes(&blob)?)
}

/// One authenticated SSH connection, good for exactly one operation.
///
/// Close it with [`Session::close`]. Dropping it without closing still
/// drops the transport handle, which ends the connection task.
pub struct Session {
    handle: client::Handle<ClientHandler>,
    host: String,
    port: u16,
    username: String,
}

impl Session {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) async fn open_channel(&mut self) -> CourierResult<Channel<client::Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| CourierError::Transport {
                message: format!("Failed to open channel: {}", e),
            })
    }

    /// Disconnect. Errors are logged, the transport is gone either way.
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            log::debug!(
                "[connection] Disconnect from {}:{} reported: {}",
                self.host,
                self.port,
                e
            );
        }
        log::debug!(
            "[connection] Closed session {}@{}:{}",
            self.username,
            self.host,
            self.port
        );
    }
}

/// Opens authenticated sessions with keys from the [`KeyStore`].
pub struct ConnectionManager {
    key_store: Arc<KeyStore>,
    verifier: Arc<HostKeyVerifier>,
    connect_timeout: Duration,
    default_port: u16,
}

impl ConnectionManager {
    pub fn new(key_store: Arc<KeyStore>, verifier: Arc<HostKeyVerifier>) -> Self {
        Self {
            key_store,
            verifier,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            default_port: DEFAULT_SSH_PORT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Connect to `host` (`host`, `host:port` or `[v6]:port`) as `username`
    /// with the stored key `key_name`.
    ///
    /// The key is resolved before any network traffic. TCP connect, the SSH
    /// handshake and authentication together are bounded by `connect_timeout`
    /// (the manager default when `None`).
    pub async fn open(
        &self,
        host: &str,
        username: &str,
        key_name: &str,
        connect_timeout: Option<Duration>,
    ) -> CourierResult<Session> {
        if username.trim().is_empty() {
            return Err(CourierError::validation("Username cannot be empty"));
        }
        let (hostname, port) = parse_host_port(host, self.default_port)?;

        let record = self.key_store.get(key_name).await?;
        let key_pair = load_key_pair(&record)?;

        let known_hosts = self.verifier.snapshot().await?;
        let shared_state = Arc::new(Mutex::new(SharedHostKeyState::default()));
        let handler = ClientHandler::new(
            &hostname,
            port,
            self.verifier.policy(),
            known_hosts,
            shared_state.clone(),
        );

        // SSH client configuration
        let config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        };

        let limit = connect_timeout.unwrap_or(self.connect_timeout);
        log::info!(
            "[connection] Connecting to {}@{}:{} with key {} (timeout {}s)",
            username,
            hostname,
            port,
            key_name,
            limit.as_secs()
        );

        let attempt = async {
            let addr = (hostname.as_str(), port);
            let mut handle = match client::connect(Arc::new(config), addr, handler).await {
                Ok(handle) => handle,
                Err(e) => {
                    let state = shared_state.lock().await.clone();
                    return Err(map_connect_error(&hostname, port, limit, e, &state));
                }
            };

            let authenticated = handle
                .authenticate_publickey(username, Arc::new(key_pair))
                .await
                .map_err(|e| CourierError::Transport {
                    message: format!("Authentication exchange failed: {}", e),
                })?;

            if !authenticated {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(CourierError::Authentication {
                    host: hostname.clone(),
                    username: username.to_string(),
                    reason: format!("server rejected key {}", record.fingerprint),
                });
            }

            // 驗證成功後才記錄新主機，失敗的登入不會固定主機金鑰
            let state = shared_state.lock().await.clone();
            if let (Some(HostKeyDecision::AcceptAndRemember), Some(key)) =
                (&state.decision, &state.server_key)
            {
                if let Err(e) = self.verifier.remember(&hostname, port, key).await {
                    log::warn!(
                        "[connection] Could not record host key for {}: {}",
                        hostname,
                        e
                    );
                }
            }

            Ok(handle)
        };

        let handle = match timeout(limit, attempt).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                log::warn!("[connection] Connection to {}:{} failed: {}", hostname, port, e);
                return Err(e);
            }
            Err(_) => {
                log::warn!(
                    "[connection] Connection to {}:{} timed out after {}s",
                    hostname,
                    port,
                    limit.as_secs()
                );
                return Err(CourierError::ConnectionTimeout {
                    host: hostname,
                    seconds: limit.as_secs(),
                });
            }
        };

        log::info!("[connection] Authenticated as {}@{}:{}", username, hostname, port);

        Ok(Session {
            handle,
            host: hostname,
            port,
            username: username.to_string(),
        })
    }
}

/// Re-encode the stored key as OpenSSH so russh can read any accepted format.
fn load_key_pair(record: &KeyRecord) -> CourierResult<russh_keys::key::KeyPair> {
    let private_key = parse_private_key(record.private_key.expose_secret())?;
    let openssh = private_key
        .to_openssh(LineEnding::LF)
        .map_err(|e| CourierError::validation(e.to_string()))?;

    russh_keys::decode_secret_key(&openssh, None).map_err(|e| {
        CourierError::validation(format!("Key {} cannot be used for SSH: {}", record.name, e))
    })
}

fn map_connect_error(
    host: &str,
    port: u16,
    limit: Duration,
    error: russh::Error,
    state: &SharedHostKeyState,
) -> CourierError {
    if let Some(HostKeyDecision::Reject(reason)) = &state.decision {
        return CourierError::HostKeyRejected {
            host: format!("{}:{}", host, port),
            reason: reason.clone(),
        };
    }

    match error {
        russh::Error::IO(e) => CourierError::HostUnreachable {
            host: format!("{}:{}", host, port),
            message: e.to_string(),
        },
        russh::Error::ConnectionTimeout => CourierError::ConnectionTimeout {
            host: host.to_string(),
            seconds: limit.as_secs(),
        },
        russh::Error::Disconnect => CourierError::HostUnreachable {
            host: format!("{}:{}", host, port),
            message: "connection closed during handshake".to_string(),
        },
        other => CourierError::Transport {
            message: format!("SSH handshake with {}:{} failed: {}", host, port, other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_host_key_wins_over_transport_error() {
        let state = SharedHostKeyState {
            status: Some(KnownHostStatus::Changed),
            decision: Some(HostKeyDecision::Reject("changed".to_string())),
            server_key: None,
        };
        let err = map_connect_error(
            "web1",
            22,
            DEFAULT_CONNECT_TIMEOUT,
            russh::Error::UnknownKey,
            &state,
        );
        assert_eq!(err.error_type(), "HostKeyRejected");
    }

    #[test]
    fn test_io_error_is_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = map_connect_error(
            "web1",
            22,
            DEFAULT_CONNECT_TIMEOUT,
            russh::Error::IO(io),
            &SharedHostKeyState::default(),
        );
        assert_eq!(err.error_type(), "HostUnreachable");
    }
}
