use std::env;
use std::time::Duration;

use crate::backoff::Backoff;

const DEFAULT_IDLE_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u64 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 10;

/// Engine tunables. Defaults suit interactive use; `from_env` lets a host
/// process override them without a config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a transfer may go without observed progress before the idle
    /// watchdog fires.
    pub idle_interval: Duration,
    /// Total tries per transfer, counting the first one. At least 1.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(DEFAULT_IDLE_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS as u32,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            backoff_jitter: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            idle_interval: Duration::from_secs(read_u64_env("SYNCGATE_IDLE_SECS", DEFAULT_IDLE_SECS)),
            max_attempts: read_u64_env("SYNCGATE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)
                .clamp(1, u64::from(u32::MAX)) as u32,
            backoff_base: Duration::from_millis(read_u64_env(
                "SYNCGATE_BACKOFF_BASE_MS",
                DEFAULT_BACKOFF_BASE_MS,
            )),
            backoff_max: Duration::from_secs(read_u64_env(
                "SYNCGATE_BACKOFF_MAX_SECS",
                DEFAULT_BACKOFF_MAX_SECS,
            )),
            backoff_jitter: read_bool_env("SYNCGATE_BACKOFF_JITTER", true),
        }
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_max, self.backoff_jitter)
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_interval, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert!(config.backoff_base < config.backoff_max);
        assert!(config.backoff_jitter);
    }

    #[test]
    fn backoff_uses_configured_curve() {
        let config = EngineConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(400),
            backoff_jitter: false,
            ..EngineConfig::default()
        };
        assert_eq!(config.backoff().delay(3), Duration::from_millis(400));
    }
}
