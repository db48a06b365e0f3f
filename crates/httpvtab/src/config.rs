//! Crate-wide fetch tunables, read once from the environment at module
//! registration time. Per-table `DEFAULT` clauses override the row-level
//! `url`/`body` values; these env vars tune the transport underneath every
//! table the module serves.

use std::env;
use std::time::Duration;

use httpvtab_core::FetchConfig;

const ENV_CONNECT_TIMEOUT_MS: &str = "HTTPVTAB_CONNECT_TIMEOUT_MS";
const ENV_READ_TIMEOUT_MS: &str = "HTTPVTAB_READ_TIMEOUT_MS";
const ENV_MAX_HEADER_BYTES: &str = "HTTPVTAB_MAX_HEADER_BYTES";
const ENV_USER_AGENT: &str = "HTTPVTAB_USER_AGENT";

/// Build a [`FetchConfig`] from `httpvtab_core::FetchConfig::default()`,
/// overridden by whichever of `HTTPVTAB_CONNECT_TIMEOUT_MS`,
/// `HTTPVTAB_READ_TIMEOUT_MS`, `HTTPVTAB_MAX_HEADER_BYTES`, and
/// `HTTPVTAB_USER_AGENT` are set. Malformed values are ignored in favor of
/// the default rather than failing module registration.
pub fn fetch_config_from_env() -> FetchConfig {
    let mut config = FetchConfig::default();

    if let Some(ms) = read_u64(ENV_CONNECT_TIMEOUT_MS) {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = read_u64(ENV_READ_TIMEOUT_MS) {
        config.read_timeout = Duration::from_millis(ms);
    }
    if let Some(bytes) = read_u64(ENV_MAX_HEADER_BYTES) {
        config.max_header_bytes = bytes as usize;
    }
    if let Ok(ua) = env::var(ENV_USER_AGENT) {
        if !ua.is_empty() {
            config.user_agent = ua;
        }
    }

    config
}

fn read_u64(var: &str) -> Option<u64> {
    env::var(var).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process-wide environment variables; serialize them so
    // parallel test threads don't stomp on each other's reads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_used_when_env_is_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(ENV_CONNECT_TIMEOUT_MS);
        env::remove_var(ENV_READ_TIMEOUT_MS);
        env::remove_var(ENV_MAX_HEADER_BYTES);
        env::remove_var(ENV_USER_AGENT);

        let config = fetch_config_from_env();
        let default = FetchConfig::default();
        assert_eq!(config.connect_timeout, default.connect_timeout);
        assert_eq!(config.max_header_bytes, default.max_header_bytes);
    }

    #[test]
    fn env_vars_override_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_CONNECT_TIMEOUT_MS, "1500");
        env::set_var(ENV_MAX_HEADER_BYTES, "4096");
        env::set_var(ENV_USER_AGENT, "custom-agent/1");

        let config = fetch_config_from_env();
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_header_bytes, 4096);
        assert_eq!(config.user_agent, "custom-agent/1");

        env::remove_var(ENV_CONNECT_TIMEOUT_MS);
        env::remove_var(ENV_MAX_HEADER_BYTES);
        env::remove_var(ENV_USER_AGENT);
    }

    #[test]
    fn malformed_value_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_CONNECT_TIMEOUT_MS, "not-a-number");
        let config = fetch_config_from_env();
        assert_eq!(config.connect_timeout, FetchConfig::default().connect_timeout);
        env::remove_var(ENV_CONNECT_TIMEOUT_MS);
    }
}
