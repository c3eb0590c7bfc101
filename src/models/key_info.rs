use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
    Rsa,
    Ecdsa,
    Unknown,
}

impl From<&str> for KeyType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ed25519" | "ssh-ed25519" => KeyType::Ed25519,
            "rsa" | "ssh-rsa" | "rsa-sha2-256" | "rsa-sha2-512" => KeyType::Rsa,
            "ecdsa" | "ecdsa-sha2-nistp256" | "ecdsa-sha2-nistp384" | "ecdsa-sha2-nistp521" => {
                KeyType::Ecdsa
            }
            _ => KeyType::Unknown,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Ed25519 => write!(f, "ed25519"),
            KeyType::Rsa => write!(f, "rsa"),
            KeyType::Ecdsa => write!(f, "ecdsa"),
            KeyType::Unknown => write!(f, "unknown"),
        }
    }
}

/// PEM-armoured private key text.
///
/// Wiped on drop and redacted in `Debug`. Deliberately not `Serialize`, so it
/// cannot end up in a listing or a result object by accident.
#[derive(Clone)]
pub struct PrivateKeyPem(Zeroizing<String>);

impl PrivateKeyPem {
    pub fn new(pem: String) -> Self {
        Self(Zeroizing::new(pem))
    }

    /// Raw PEM text. Only the connection layer and the key store should need this.
    pub fn expose_secret(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKeyPem([REDACTED])")
    }
}

/// A named key pair as held by the key store.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub name: String,
    pub private_key: PrivateKeyPem,
    /// OpenSSH public key line (`<algorithm> <base64> [comment]`).
    pub public_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub key_type: KeyType,
    pub fingerprint: String,
}

impl KeyRecord {
    /// Redacted view for listings.
    pub fn listing(&self) -> KeyListing {
        KeyListing {
            public_key: self.public_key.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            key_type: self.key_type.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Outward-facing view of a stored key. Never carries private material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyListing {
    pub public_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub key_type: KeyType,
    pub fingerprint: String,
}
