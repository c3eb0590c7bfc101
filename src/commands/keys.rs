use crate::models::{CourierResult, KeyListing, KeyRecord, KeyType};
use crate::services::{AddKeyOptions, GenerateKeyOptions, KeyStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateKeyRequest {
    pub name: String,
    #[serde(flatten)]
    pub options: GenerateKeyOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddKeyRequest {
    pub name: String,
    pub private_key: String,
    pub public_key: String,
    #[serde(flatten)]
    pub options: AddKeyOptions,
}

/// 新建或匯入後回傳的資訊（不含私鑰）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCreated {
    pub name: String,
    pub public_key: String,
    pub fingerprint: String,
    pub key_type: KeyType,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<KeyRecord> for KeyCreated {
    fn from(record: KeyRecord) -> Self {
        Self {
            name: record.name,
            public_key: record.public_key,
            fingerprint: record.fingerprint,
            key_type: record.key_type,
            description: record.description,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyList {
    pub keys: BTreeMap<String, KeyListing>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteKeyResponse {
    pub success: bool,
    pub message: String,
}

/// 生成新的 SSH 密鑰對
pub async fn generate_ssh_key(
    store: &KeyStore,
    request: GenerateKeyRequest,
) -> CourierResult<KeyCreated> {
    log::info!(
        "[keys] Generating {} key: {}",
        request.options.key_type.as_deref().unwrap_or("rsa"),
        request.name
    );
    let record = store.generate(&request.name, request.options).await?;
    log::info!("[keys] Key generated successfully");
    Ok(record.into())
}

/// 匯入既有的密鑰對
pub async fn add_ssh_key(store: &KeyStore, request: AddKeyRequest) -> CourierResult<KeyCreated> {
    log::info!("[keys] Importing key: {}", request.name);
    let record = store
        .add(
            &request.name,
            &request.private_key,
            &request.public_key,
            request.options,
        )
        .await?;
    log::info!("[keys] Key imported successfully");
    Ok(record.into())
}

/// 列出所有 SSH 密鑰
pub async fn list_ssh_keys(store: &KeyStore) -> CourierResult<KeyList> {
    log::info!("[keys] Listing SSH keys");
    let keys = store.list().await?;
    log::info!("[keys] Found {} keys", keys.len());
    Ok(KeyList {
        count: keys.len(),
        keys,
    })
}

/// 讀取公鑰內容
pub async fn read_public_key(store: &KeyStore, key_name: &str) -> CourierResult<String> {
    log::info!("[keys] Reading public key: {}", key_name);
    store.public_key(key_name).await
}

/// 刪除 SSH 密鑰對
pub async fn delete_ssh_key(store: &KeyStore, key_name: &str) -> CourierResult<DeleteKeyResponse> {
    log::info!("[keys] Deleting key: {}", key_name);
    store.delete(key_name).await?;
    log::info!("[keys] Key deleted successfully");
    Ok(DeleteKeyResponse {
        success: true,
        message: format!("Key {} deleted", key_name),
    })
}
