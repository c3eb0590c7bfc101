use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CourierError {
    // 密鑰錯誤
    #[error("Key not found: {name}")]
    NotFound { name: String },

    #[error("Invalid key material: {message}")]
    Validation { message: String },

    #[error("Key already exists: {name}")]
    Conflict { name: String },

    // 連線錯誤
    #[error("Authentication failed for {username}@{host}: {reason}")]
    Authentication {
        host: String,
        username: String,
        reason: String,
    },

    #[error("Connection to {host} timed out after {seconds}s")]
    ConnectionTimeout { host: String, seconds: u64 },

    #[error("Host unreachable: {host}: {message}")]
    HostUnreachable { host: String, message: String },

    #[error("Host key rejected for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    // 執行錯誤
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Command did not finish within {seconds}s")]
    ExecutionTimeout { seconds: u64 },

    #[error("Transfer failed: {message}")]
    Transfer { message: String },

    // 系統錯誤
    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<std::io::Error> for CourierError {
    fn from(e: std::io::Error) -> Self {
        CourierError::Io {
            message: e.to_string(),
        }
    }
}

impl From<ssh_key::Error> for CourierError {
    fn from(e: ssh_key::Error) -> Self {
        CourierError::Validation {
            message: e.to_string(),
        }
    }
}

impl From<russh::Error> for CourierError {
    fn from(e: russh::Error) -> Self {
        CourierError::Transport {
            message: e.to_string(),
        }
    }
}

impl From<figment::Error> for CourierError {
    fn from(e: figment::Error) -> Self {
        CourierError::Config {
            message: e.to_string(),
        }
    }
}

pub type CourierResult<T> = Result<T, CourierError>;

// 序列化為 {type, message}，供 dispatch 層使用
impl serde::Serialize for CourierError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("CourierError", 2)?;
        state.serialize_field("type", &self.error_type())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl CourierError {
    pub fn error_type(&self) -> &'static str {
        match self {
            CourierError::NotFound { .. } => "NotFound",
            CourierError::Validation { .. } => "Validation",
            CourierError::Conflict { .. } => "Conflict",
            CourierError::Authentication { .. } => "Authentication",
            CourierError::ConnectionTimeout { .. } => "ConnectionTimeout",
            CourierError::HostUnreachable { .. } => "HostUnreachable",
            CourierError::HostKeyRejected { .. } => "HostKeyRejected",
            CourierError::Transport { .. } => "Transport",
            CourierError::ExecutionTimeout { .. } => "ExecutionTimeout",
            CourierError::Transfer { .. } => "Transfer",
            CourierError::Io { .. } => "Io",
            CourierError::Config { .. } => "Config",
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        CourierError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn transfer(message: impl Into<String>) -> Self {
        CourierError::Transfer {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_as_type_and_message() {
        let err = CourierError::NotFound {
            name: "deploy".to_string(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "NotFound");
        assert_eq!(value["message"], "Key not found: deploy");
    }

    #[test]
    fn test_io_error_maps_to_io_kind() {
        let err: CourierError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.error_type(), "Io");
    }
}
