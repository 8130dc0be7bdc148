//! Utility functions for fabrickv

use crate::protocol::Status;

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else if s.ends_with(|c: char| c.is_ascii_digit()) {
        (s, "s")
    } else {
        let last = s.char_indices().last().map_or(0, |(index, _)| index);
        s.split_at(last)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(num * 60),
        "h" => std::time::Duration::from_secs(num * 3600),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::warn!("shutdown signal received (SIGINT)"),
        _ = terminate => tracing::warn!("shutdown signal received (SIGTERM)"),
    }
}

/// Validate a key against the store's key length limit.
pub fn validate_key(key: &str, max_key_length: usize) -> std::result::Result<(), Status> {
    if key.is_empty() {
        return Err(Status::KeyEmpty);
    }

    if key.len() > max_key_length {
        return Err(Status::KeyTooBig);
    }

    Ok(())
}

/// Glob match used by `keys`/`nrkeys`.
///
/// `*` matches any run of characters, `?` matches exactly one, and `\`
/// escapes the next character. A pattern without metacharacters matches only
/// the identical key.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0usize, 0usize);
    // Last `*` seen in the pattern and the key position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, k));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                k += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == key[k] => {
                p += 2;
                k += 1;
                continue;
            }
            Some(&c) if c != '\\' && c == key[k] => {
                p += 1;
                k += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, tried)) => {
                p = star + 1;
                k = tried + 1;
                backtrack = Some((star, tried + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
