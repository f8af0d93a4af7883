// Logging setup for binaries and tests
//
// Library code logs through the `log` facade with bracketed component
// prefixes. `init_logging` installs a tracing-subscriber fmt subscriber,
// which also bridges `log` records.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Parse a `RUST_LOG`-style level name; unknown values give `None`
pub fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Level from `RUST_LOG`, `INFO` when unset or not a plain level
pub fn level_from_env() -> Level {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(Level::INFO)
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init_logging(level: Level) -> bool {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return false;
    }
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        log::debug!("[Logging] Subscriber installed at {}", level);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("fretcoach=trace"), None);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging(Level::DEBUG);
        assert!(!init_logging(Level::DEBUG));
    }
}
