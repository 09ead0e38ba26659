//! `log(level, message)`: forwards into `tracing` at the matching level.
//! Synchronous; an unrecognised level falls back to `info`.

pub fn log(level: &str, message: &str) {
    match level.to_ascii_lowercase().as_str() {
        "trace" => tracing::trace!(target: "script", "{message}"),
        "debug" => tracing::debug!(target: "script", "{message}"),
        "warn" | "warning" => tracing::warn!(target: "script", "{message}"),
        "error" => tracing::error!(target: "script", "{message}"),
        _ => tracing::info!(target: "script", "{message}"),
    }
}
