use std::env;

/// Engine-wide operator settings, environment-driven with sensible defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Allowed clock skew between a webhook timestamp and server time.
    pub webhook_tolerance_secs: i64,
    /// How long a (rule, signature, timestamp) triple is remembered.
    pub replay_window_secs: i64,
    /// Hard cap for the in-process replay fallback cache.
    pub replay_fallback_capacity: usize,
    /// Page size for scheduled sweep scans.
    pub sweep_page_size: usize,
    /// Suppress refiring the same (subject, rule) pair within this many
    /// hours across sweep runs. 0 disables suppression.
    pub sweep_dedupe_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_tolerance_secs: 300,
            replay_window_secs: 600,
            replay_fallback_capacity: 10_000,
            sweep_page_size: 100,
            sweep_dedupe_hours: 24,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            webhook_tolerance_secs: env_parse(
                "WEBHOOK_TOLERANCE_SECS",
                defaults.webhook_tolerance_secs,
            ),
            replay_window_secs: env_parse("REPLAY_WINDOW_SECS", defaults.replay_window_secs),
            replay_fallback_capacity: env_parse(
                "REPLAY_FALLBACK_CAPACITY",
                defaults.replay_fallback_capacity,
            ),
            sweep_page_size: env_parse("SWEEP_PAGE_SIZE", defaults.sweep_page_size),
            sweep_dedupe_hours: env_parse("SWEEP_DEDUPE_HOURS", defaults.sweep_dedupe_hours),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_operator_safe() {
        let config = EngineConfig::default();
        assert_eq!(config.webhook_tolerance_secs, 300);
        assert_eq!(config.replay_fallback_capacity, 10_000);
        assert_eq!(config.sweep_page_size, 100);
    }
}
