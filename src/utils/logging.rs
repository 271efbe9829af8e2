//! Logging helpers layered on top of `tracing`.

/// Log levels for the indexer
#[derive(Clone, Copy, Debug)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

fn silenced() -> bool {
    std::env::var("WEBHOOK_INDEXER_SILENT").is_ok()
}

/// Logs a message
pub fn log(level: LogLevel, message: &str) {
    if silenced() {
        return;
    }

    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
    }
}

/// Replaces the value of an `api-key=` query parameter with `[REDACTED]`.
#[must_use]
pub fn redact_api_key(url: &str) -> String {
    let Some(pos) = url.find("api-key=") else {
        return url.to_string();
    };
    let before = &url[..pos + 8];
    let after = &url[pos + 8..];
    let end_pos = after.find('&').unwrap_or(after.len());
    format!("{}[REDACTED]{}", before, &after[end_pos..])
}

/// Logs service startup information
pub fn log_startup(listen_addr: &str, callback_url: &str, capacity: usize) {
    if silenced() {
        return;
    }

    tracing::info!(
        listen_addr = listen_addr,
        callback_url = redact_api_key(callback_url),
        subscription_capacity = capacity,
        "Webhook Indexer Startup"
    );
}

/// Logs a section header
pub fn log_section(title: &str) {
    tracing::info!("=== {} ===", title);
}

/// Logs the outcome of one dispatched event
pub fn log_dispatch(indexer_id: &str, slot: u64, applied: usize, skipped: usize, duration_ms: u64) {
    tracing::debug!(
        indexer_id = indexer_id,
        slot = slot,
        applied = applied,
        skipped = skipped,
        duration_ms = duration_ms,
        "Dispatched event"
    );
}

/// Logs an error with context
pub fn log_error(context: &str, error: &str) {
    tracing::error!(context = context, error = error, "Indexer Error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_api_key_middle() {
        let url = "https://api.helius.xyz/v0/webhooks?api-key=secret&foo=bar";
        assert_eq!(
            redact_api_key(url),
            "https://api.helius.xyz/v0/webhooks?api-key=[REDACTED]&foo=bar"
        );
    }

    #[test]
    fn test_redact_api_key_absent() {
        assert_eq!(redact_api_key("http://localhost:8080"), "http://localhost:8080");
    }
}
