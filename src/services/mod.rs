pub mod connection;
pub mod executor;
pub mod key_store;
pub mod known_hosts;
pub mod remote;
pub mod transfer;

pub use connection::{ConnectionManager, Session};
pub use executor::{CommandExecutor, CommandOutput};
pub use key_store::{AddKeyOptions, GenerateKeyOptions, KeyStore};
pub use known_hosts::{HostKeyPolicy, HostKeyVerifier, KnownHostStatus, KnownHosts};
pub use remote::{RemoteEngine, RemoteTarget};
pub use transfer::{FileTransfer, UploadSummary};
