//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use rand::rngs::OsRng;
use russh::keys::key::{KeyPair, PublicKey};
use russh::keys::PublicKeyBase64;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use ssh_courier::services::GenerateKeyOptions;
use ssh_courier::{CourierConfig, HostKeyPolicy, KeyStore, RemoteEngine};
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A throwaway keys directory with a store and engine pointed at it
pub struct TestKeysDir {
    pub temp_dir: TempDir,
    pub keys_dir: PathBuf,
}

impl TestKeysDir {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let keys_dir = temp_dir.path().join("keys");
        Self { temp_dir, keys_dir }
    }

    pub fn path(&self) -> &Path {
        &self.keys_dir
    }

    pub fn config(&self) -> CourierConfig {
        let mut config = CourierConfig::default();
        config.keys.dir = Some(self.keys_dir.clone());
        config.connection.host_key_policy = HostKeyPolicy::TrustOnFirstUse;
        config
    }

    pub fn store(&self) -> Arc<KeyStore> {
        self.config().key_store().expect("Failed to build key store")
    }

    pub fn engine(&self, connect_timeout: Duration) -> (Arc<KeyStore>, RemoteEngine) {
        let mut config = self.config();
        config.connection.connect_timeout_secs = connect_timeout.as_secs().max(1);
        let store = config.key_store().expect("Failed to build key store");
        let engine = config
            .remote_engine(store.clone())
            .expect("Failed to build engine");
        (store, engine)
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.keys_dir)
            .expect("Failed to read keys dir")
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }
}

/// Fast key generation for tests that do not care about RSA
pub fn ed25519_options() -> GenerateKeyOptions {
    GenerateKeyOptions {
        key_type: Some("ed25519".to_string()),
        ..Default::default()
    }
}

/// (OpenSSH private PEM, public key line) for a fresh Ed25519 pair
pub fn ed25519_pair(comment: &str) -> (String, String) {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).expect("keygen");
    key.set_comment(comment);
    let private = key.to_openssh(LineEnding::LF).expect("encode").to_string();
    let public = key.public_key().to_openssh().expect("encode public");
    (private, public)
}

/// Real SSH server for end-to-end tests, taken from
/// `SSH_COURIER_TEST_HOST`, `SSH_COURIER_TEST_USER` and `SSH_COURIER_TEST_KEY`
/// (path to an unencrypted OpenSSH private key authorized on that host).
pub struct LiveHost {
    pub host: String,
    pub user: String,
    pub private_key: String,
    pub public_key: String,
}

impl LiveHost {
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SSH_COURIER_TEST_HOST").ok()?;
        let user = std::env::var("SSH_COURIER_TEST_USER").ok()?;
        let key_path = std::env::var("SSH_COURIER_TEST_KEY").ok()?;

        let private_key = std::fs::read_to_string(key_path).expect("Failed to read test key");
        let public_key = PrivateKey::from_openssh(&private_key)
            .expect("Test key must be an unencrypted OpenSSH key")
            .public_key()
            .to_openssh()
            .expect("encode public");

        Some(Self {
            host,
            user,
            private_key,
            public_key,
        })
    }
}

/// The only user the in-process server lets in
pub const TEST_USER: &str = "deploy";

/// Commands the in-process server understands
pub const CMD_ECHO_HELLO: &str = "echo hello";
pub const CMD_EXIT_THREE: &str = "echo oops >&2; exit 3";
pub const CMD_HANG: &str = "sleep 60";

type Uploads = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// In-process SSH server on 127.0.0.1 that runs a handful of canned
/// commands and accepts `scp -t` uploads into memory.
pub struct TestSshServer {
    pub addr: SocketAddr,
    config: Arc<Mutex<Arc<server::Config>>>,
    uploads: Uploads,
    refuse_channels: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TestSshServer {
    /// Start a server that accepts `authorized_key` (an OpenSSH public key
    /// line) for [`TEST_USER`].
    pub async fn start(authorized_key: &str) -> Self {
        let authorized = authorized_key
            .split_whitespace()
            .nth(1)
            .expect("OpenSSH public key line")
            .to_string();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().unwrap();

        let config = Arc::new(Mutex::new(server_config(KeyPair::generate_ed25519())));
        let uploads: Uploads = Arc::new(Mutex::new(HashMap::new()));
        let refuse_channels = Arc::new(AtomicBool::new(false));

        let task = {
            let config = config.clone();
            let uploads = uploads.clone();
            let refuse_channels = refuse_channels.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let config = config.lock().unwrap().clone();
                    let handler = ServerSession {
                        authorized: authorized.clone(),
                        uploads: uploads.clone(),
                        refuse_channels: refuse_channels.clone(),
                        sinks: HashMap::new(),
                    };
                    tokio::spawn(async move {
                        if let Ok(running) = server::run_stream(config, stream, handler).await {
                            let _ = running.await;
                        }
                    });
                }
            })
        };

        Self {
            addr,
            config,
            uploads,
            refuse_channels,
            task,
        }
    }

    /// `127.0.0.1:<port>`
    pub fn target(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Present a different host key to every later connection
    pub fn rotate_host_key(&self) {
        *self.config.lock().unwrap() = server_config(KeyPair::generate_ed25519());
    }

    /// Refuse every later session channel open
    pub fn refuse_channels(&self) {
        self.refuse_channels.store(true, Ordering::SeqCst);
    }

    /// Bytes received by `scp -t <path>`, once the upload completed
    pub fn uploaded(&self, path: &str) -> Option<Vec<u8>> {
        self.uploads.lock().unwrap().get(path).cloned()
    }
}

impl Drop for TestSshServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn server_config(host_key: KeyPair) -> Arc<server::Config> {
    Arc::new(server::Config {
        methods: MethodSet::PUBLICKEY,
        auth_rejection_time: Duration::from_millis(10),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        keys: vec![host_key],
        ..Default::default()
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SinkState {
    Header,
    Body,
    Trailer,
    Done,
}

/// Server half of a single-file `scp -t`
struct ScpSink {
    path: String,
    state: SinkState,
    header: Vec<u8>,
    content: Vec<u8>,
    remaining: u64,
}

impl ScpSink {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            state: SinkState::Header,
            header: Vec::new(),
            content: Vec::new(),
            remaining: 0,
        }
    }

    /// Consume client bytes; returns how many acks to send and the file
    /// contents once the terminating NUL arrived.
    fn feed(&mut self, mut data: &[u8]) -> (usize, Option<Vec<u8>>) {
        let mut acks = 0;
        let mut finished = None;

        while !data.is_empty() {
            match self.state {
                SinkState::Header => {
                    let byte = data[0];
                    data = &data[1..];
                    if byte != b'\n' {
                        self.header.push(byte);
                        continue;
                    }
                    // C<mode> <size> <name>
                    let header = String::from_utf8_lossy(&self.header).to_string();
                    self.remaining = header
                        .split_whitespace()
                        .nth(1)
                        .and_then(|size| size.parse().ok())
                        .unwrap_or(0);
                    self.state = if self.remaining == 0 {
                        SinkState::Trailer
                    } else {
                        SinkState::Body
                    };
                    acks += 1;
                }
                SinkState::Body => {
                    let take = std::cmp::min(self.remaining as usize, data.len());
                    self.content.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = SinkState::Trailer;
                    }
                }
                SinkState::Trailer => {
                    data = &data[1..];
                    self.state = SinkState::Done;
                    acks += 1;
                    finished = Some(std::mem::take(&mut self.content));
                }
                SinkState::Done => break,
            }
        }

        (acks, finished)
    }
}

struct ServerSession {
    authorized: String,
    uploads: Uploads,
    refuse_channels: Arc<AtomicBool>,
    sinks: HashMap<ChannelId, ScpSink>,
}

fn finish_command(session: &mut Session, channel: ChannelId, exit_status: u32) {
    session.exit_status_request(channel, exit_status);
    session.eof(channel);
    session.close(channel);
}

#[async_trait]
impl server::Handler for ServerSession {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if user == TEST_USER && public_key.public_key_base64() == self.authorized {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(!self.refuse_channels.load(Ordering::SeqCst))
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        session.channel_success(channel);

        if let Some(path) = command.strip_prefix("scp -t ") {
            self.sinks
                .insert(channel, ScpSink::new(path.trim_matches('\'')));
            session.data(channel, CryptoVec::from_slice(&[0]));
            return Ok(());
        }

        match command.as_str() {
            CMD_ECHO_HELLO => {
                session.data(channel, CryptoVec::from_slice(b"hello\n"));
                finish_command(session, channel, 0);
            }
            CMD_EXIT_THREE => {
                session.extended_data(channel, 1, CryptoVec::from_slice(b"oops\n"));
                finish_command(session, channel, 3);
            }
            CMD_HANG => {}
            _ => {
                session.extended_data(channel, 1, CryptoVec::from_slice(b"command not found\n"));
                finish_command(session, channel, 127);
            }
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(sink) = self.sinks.get_mut(&channel) {
            let (acks, finished) = sink.feed(data);
            if let Some(content) = finished {
                self.uploads
                    .lock()
                    .unwrap()
                    .insert(sink.path.clone(), content);
            }
            for _ in 0..acks {
                session.data(channel, CryptoVec::from_slice(&[0]));
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.sinks.remove(&channel).is_some() {
            finish_command(session, channel, 0);
        }
        Ok(())
    }
}
