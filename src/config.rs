use std::env;

use anyhow::{anyhow, Result};

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Idle minutes before a session expires.
    pub session_ttl_minutes: u64,
    /// How long the last response stays eligible for initial-dial replay.
    pub replay_ttl_seconds: u64,
    /// Sweep period for the cleanup task.
    pub cleanup_interval_seconds: u64,
    /// Service code of this deployment (e.g. `*384#`), used as a fallback
    /// when the gateway omits it from the request.
    pub shortcode: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 5,
            replay_ttl_seconds: 60,
            cleanup_interval_seconds: 30,
            shortcode: None,
        }
    }
}

impl AppConfig {
    /// Read configuration from the environment:
    ///
    /// * `SIREN_SESSION_TTL_MINUTES` (default 5)
    /// * `SIREN_REPLAY_TTL_SECONDS` (default 60)
    /// * `SIREN_CLEANUP_INTERVAL_SECONDS` (default 30)
    /// * `SIREN_SHORTCODE` (optional)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            session_ttl_minutes: parse_optional_u64("SIREN_SESSION_TTL_MINUTES")?
                .unwrap_or(defaults.session_ttl_minutes),
            replay_ttl_seconds: parse_optional_u64("SIREN_REPLAY_TTL_SECONDS")?
                .unwrap_or(defaults.replay_ttl_seconds),
            cleanup_interval_seconds: parse_optional_u64("SIREN_CLEANUP_INTERVAL_SECONDS")?
                .unwrap_or(defaults.cleanup_interval_seconds),
            shortcode: env::var("SIREN_SHORTCODE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes as i64)
    }

    pub fn replay_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.replay_ttl_seconds as i64)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_seconds)
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "SIREN_SESSION_TTL_MINUTES",
        "SIREN_REPLAY_TTL_SECONDS",
        "SIREN_CLEANUP_INTERVAL_SECONDS",
        "SIREN_SHORTCODE",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.session_ttl_minutes, 5);
        assert_eq!(cfg.replay_ttl_seconds, 60);
        assert_eq!(cfg.cleanup_interval_seconds, 30);
        assert!(cfg.shortcode.is_none());
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("SIREN_SESSION_TTL_MINUTES", "10");
        std::env::set_var("SIREN_REPLAY_TTL_SECONDS", "120");
        std::env::set_var("SIREN_CLEANUP_INTERVAL_SECONDS", "60");
        std::env::set_var("SIREN_SHORTCODE", " *384# ");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.session_ttl_minutes, 10);
        assert_eq!(cfg.replay_ttl_seconds, 120);
        assert_eq!(cfg.cleanup_interval_seconds, 60);
        assert_eq!(cfg.shortcode.as_deref(), Some("*384#"));
        assert_eq!(cfg.session_ttl(), chrono::Duration::minutes(10));
        assert_eq!(cfg.replay_ttl(), chrono::Duration::seconds(120));
        assert_eq!(cfg.cleanup_interval(), std::time::Duration::from_secs(60));

        clear_env();
    }

    #[test]
    fn rejects_non_numeric_ttl() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("SIREN_SESSION_TTL_MINUTES", "soon");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }
}
