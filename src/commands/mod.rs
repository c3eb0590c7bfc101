pub mod keys;
pub mod remote;

pub use keys::{
    add_ssh_key, delete_ssh_key, generate_ssh_key, list_ssh_keys, read_public_key, AddKeyRequest,
    DeleteKeyResponse, GenerateKeyRequest, KeyCreated, KeyList,
};
pub use remote::{
    execute_ssh_command, upload_file, CommandReport, ExecuteRequest, ExecuteResponse, Failure,
    UploadReport, UploadRequest, UploadResponse,
};
