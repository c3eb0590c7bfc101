use crate::models::{CourierError, CourierResult};

/// File name reserved for the host keys this crate remembers.
pub const KNOWN_HOSTS_FILE: &str = "known_hosts";

/// Prefix of in-flight temporary files inside the keys directory.
pub const TEMP_FILE_PREFIX: &str = ".tmp-";

/// 驗證密鑰名稱，防止路徑遍歷
pub fn validate_key_name(key_name: &str) -> CourierResult<()> {
    if key_name.is_empty() {
        return Err(CourierError::validation("Key name cannot be empty"));
    }

    if key_name.contains('/') || key_name.contains('\\') {
        return Err(CourierError::validation(format!(
            "Key name must not contain path separators: {}",
            key_name
        )));
    }

    if key_name == "." || key_name == ".." {
        return Err(CourierError::validation(format!(
            "Key name is not a valid file name: {}",
            key_name
        )));
    }

    if key_name.contains('\0') {
        return Err(CourierError::validation("Key name contains null bytes"));
    }

    if key_name.len() > 255 {
        return Err(CourierError::validation(
            "Key name too long (max 255 characters)",
        ));
    }

    // `.pub` belongs to the public half, the rest are files we own
    if key_name.ends_with(".pub")
        || key_name == KNOWN_HOSTS_FILE
        || key_name.starts_with(TEMP_FILE_PREFIX)
    {
        return Err(CourierError::validation(format!(
            "Key name is reserved: {}",
            key_name
        )));
    }

    Ok(())
}

/// 驗證主機名，防止命令注入
pub fn validate_hostname(hostname: &str) -> CourierResult<()> {
    if hostname.is_empty() {
        return Err(CourierError::validation("Hostname cannot be empty"));
    }

    if hostname.len() > 255 {
        return Err(CourierError::validation("Hostname too long"));
    }

    // 只允許安全字符：字母、數字、點、連字符、下劃線、冒號（IPv6）
    let is_valid = hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ':');

    if !is_valid {
        return Err(CourierError::validation(format!(
            "Hostname contains invalid characters: {}",
            hostname
        )));
    }

    Ok(())
}

/// Split `host`, `host:port`, `[v6]` or `[v6]:port` into host and port.
pub fn parse_host_port(target: &str, default_port: u16) -> CourierResult<(String, u16)> {
    let target = target.trim();

    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| CourierError::validation(format!("Unclosed bracket in host: {}", target)))?;
        let host = &rest[..end];
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(p) => Some(p),
            None if rest[end + 1..].is_empty() => None,
            None => {
                return Err(CourierError::validation(format!(
                    "Unexpected characters after host: {}",
                    target
                )))
            }
        };
        (host, port)
    } else if target.matches(':').count() == 1 {
        let (host, port) = target.split_once(':').unwrap_or((target, ""));
        (host, Some(port))
    } else {
        // bare hostname, or an unbracketed IPv6 address
        (target, None)
    };

    validate_hostname(host)?;

    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| CourierError::validation(format!("Invalid port: {}", p)))?,
        None => default_port,
    };

    Ok((host.to_string(), port))
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
