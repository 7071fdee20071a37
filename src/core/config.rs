//! Runtime configuration loaded from environment variables.
//!
//! The core consumes only numeric tunables plus a couple of safety knobs —
//! it deliberately does not own a `.env` loader; whatever process embeds this
//! crate is responsible for getting these into the environment.

use std::env;

pub const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
pub const ENV_COOKIE_REFRESH_INTERVAL: &str = "COOKIE_REFRESH_INTERVAL";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_ALLOW_INVALID_CERTS: &str = "ALLOW_INVALID_CERTS";

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Per-HTTP-call timeout, in seconds. Default 30.
    pub request_timeout_secs: u64,
    /// Transport-error retry budget per call. Default 3.
    pub max_retries: u32,
    /// Session TTL before a bootstrap refresh is forced. Default 3600.
    pub cookie_refresh_interval_secs: u64,
    /// `tracing` default filter directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// Whether to accept invalid/self-signed TLS certificates from mirrors.
    /// Default `false` — see DESIGN.md for the Open Question resolution.
    pub allow_invalid_certs: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_retries: 3,
            cookie_refresh_interval_secs: 3600,
            log_level: "INFO".to_string(),
            allow_invalid_certs: false,
        }
    }
}

impl ExtractorConfig {
    /// Build a config from the process environment, falling back to the
    /// documented default for any variable that is unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_timeout_secs: parse_env_or(ENV_REQUEST_TIMEOUT, defaults.request_timeout_secs),
            max_retries: parse_env_or(ENV_MAX_RETRIES, defaults.max_retries),
            cookie_refresh_interval_secs: parse_env_or(
                ENV_COOKIE_REFRESH_INTERVAL,
                defaults.cookie_refresh_interval_secs,
            ),
            log_level: env::var(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            allow_invalid_certs: parse_env_bool_or(
                ENV_ALLOW_INVALID_CERTS,
                defaults.allow_invalid_certs,
            ),
        }
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_env_bool_or(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env var mutation races across tests in the same process; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for k in [
            ENV_REQUEST_TIMEOUT,
            ENV_MAX_RETRIES,
            ENV_COOKIE_REFRESH_INTERVAL,
            ENV_LOG_LEVEL,
            ENV_ALLOW_INVALID_CERTS,
        ] {
            env::remove_var(k);
        }
        let cfg = ExtractorConfig::from_env();
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.cookie_refresh_interval_secs, 3600);
        assert_eq!(cfg.log_level, "INFO");
        assert!(!cfg.allow_invalid_certs);
    }

    #[test]
    fn overrides_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_REQUEST_TIMEOUT, "45");
        env::set_var(ENV_MAX_RETRIES, "5");
        env::set_var(ENV_ALLOW_INVALID_CERTS, "true");
        let cfg = ExtractorConfig::from_env();
        assert_eq!(cfg.request_timeout_secs, 45);
        assert_eq!(cfg.max_retries, 5);
        assert!(cfg.allow_invalid_certs);
        env::remove_var(ENV_REQUEST_TIMEOUT);
        env::remove_var(ENV_MAX_RETRIES);
        env::remove_var(ENV_ALLOW_INVALID_CERTS);
    }

    #[test]
    fn unparsable_value_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_MAX_RETRIES, "not-a-number");
        let cfg = ExtractorConfig::from_env();
        assert_eq!(cfg.max_retries, 3);
        env::remove_var(ENV_MAX_RETRIES);
    }
}
