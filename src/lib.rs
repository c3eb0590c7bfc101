//! Named SSH key storage plus one-shot remote command execution and file
//! upload over sessions authenticated with those keys.

pub mod commands;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::CourierConfig;
pub use models::{CourierError, CourierResult, KeyListing, KeyRecord, KeyType};
pub use services::{
    CommandExecutor, CommandOutput, ConnectionManager, FileTransfer, HostKeyPolicy,
    HostKeyVerifier, KeyStore, RemoteEngine, RemoteTarget, Session, UploadSummary,
};
