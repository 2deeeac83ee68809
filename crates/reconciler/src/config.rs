//! Configuration for the reconciler.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Timing of the provisioning waiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Hard wall-clock bound on the whole wait.
    #[serde(with = "duration_secs", default = "default_provision_timeout")]
    pub timeout: Duration,
    /// Wait before the first refresh.
    #[serde(with = "duration_secs", default = "default_delay")]
    pub delay: Duration,
    /// Wait between subsequent refreshes.
    #[serde(with = "duration_secs", default = "default_min_timeout")]
    pub min_timeout: Duration,
    /// Consecutive refreshes without a recognized status tolerated before failing.
    #[serde(default = "default_not_found_checks")]
    pub not_found_checks: u32,
    /// Consecutive target observations required for success.
    #[serde(default = "default_continuous_target_occurrence")]
    pub continuous_target_occurrence: u32,
}

const fn default_provision_timeout() -> Duration {
    Duration::from_secs(600)
}

const fn default_delay() -> Duration {
    Duration::from_secs(5)
}

const fn default_min_timeout() -> Duration {
    Duration::from_secs(3)
}

const fn default_not_found_checks() -> u32 {
    20
}

const fn default_continuous_target_occurrence() -> u32 {
    1
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: default_provision_timeout(),
            delay: default_delay(),
            min_timeout: default_min_timeout(),
            not_found_checks: default_not_found_checks(),
            continuous_target_occurrence: default_continuous_target_occurrence(),
        }
    }
}

impl PollSettings {
    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the minimum wait between refreshes.
    #[must_use]
    pub const fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Set the number of tolerated not-found refreshes.
    #[must_use]
    pub const fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Set the number of consecutive target observations required.
    #[must_use]
    pub const fn continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences;
        self
    }
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Retry budget around the provisioning trigger.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Waiter timing for the provisioning operation.
    #[serde(default)]
    pub provisioning: PollSettings,
}

impl ReconcilerConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Load configuration from a file (TOML, or JSON by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))?
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Overlay `TETHER_*` variables resolved through `lookup`.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str| {
            lookup(key).and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(key, value = %raw, error = %e, "Ignoring unparsable override");
                    None
                }
            })
        };

        if let Some(v) = parse_u64("TETHER_PROVISION_TIMEOUT_SECS") {
            self.provisioning.timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_u64("TETHER_POLL_DELAY_SECS") {
            self.provisioning.delay = Duration::from_secs(v);
        }
        if let Some(v) = parse_u64("TETHER_POLL_MIN_TIMEOUT_SECS") {
            self.provisioning.min_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_u64("TETHER_NOT_FOUND_CHECKS") {
            self.provisioning.not_found_checks = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = parse_u64("TETHER_RETRY_TIMEOUT_SECS") {
            self.retry.timeout = Duration::from_secs(v);
        }

        self
    }

    /// Reject configurations the waiter cannot honor.
    pub fn validate(&self) -> Result<()> {
        let poll = &self.provisioning;
        if poll.timeout.is_zero() {
            return Err(Error::invalid_config("provisioning timeout must be positive"));
        }
        if poll.min_timeout.is_zero() {
            return Err(Error::invalid_config("min_timeout must be positive"));
        }
        if poll.min_timeout > poll.timeout {
            return Err(Error::invalid_config(
                "min_timeout must not exceed the provisioning timeout",
            ));
        }
        if poll.continuous_target_occurrence == 0 {
            return Err(Error::invalid_config(
                "continuous_target_occurrence must be at least 1",
            ));
        }
        if self.retry.timeout.is_zero() {
            return Err(Error::invalid_config("retry timeout must be positive"));
        }
        Ok(())
    }
}

/// About thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(946_080_000);

/// The instant `span` after `from`. Spans too large to represent land far in
/// the future instead of overflowing.
pub(crate) fn deadline_after(from: Instant, span: Duration) -> Instant {
    from.checked_add(span)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Serialization helper for Duration as seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for Duration as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.provisioning.timeout, Duration::from_secs(600));
        assert_eq!(config.provisioning.delay, Duration::from_secs(5));
        assert_eq!(config.provisioning.min_timeout, Duration::from_secs(3));
        assert_eq!(config.provisioning.not_found_checks, 20);
        assert_eq!(config.retry.timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TETHER_PROVISION_TIMEOUT_SECS", "900"),
            ("TETHER_NOT_FOUND_CHECKS", "5"),
            ("TETHER_POLL_DELAY_SECS", "soon"),
        ]
        .into_iter()
        .collect();

        let config = ReconcilerConfig::default()
            .with_env_overrides(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.provisioning.timeout, Duration::from_secs(900));
        assert_eq!(config.provisioning.not_found_checks, 5);
        assert_eq!(config.provisioning.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_from_toml_file() -> Result<()> {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        writeln!(
            file,
            "[provisioning]\ntimeout = 1800\nmin_timeout = 10\n\n[retry]\ntimeout = 30000\n"
        )
        .map_err(|e| Error::invalid_config(e.to_string()))?;

        let config = ReconcilerConfig::from_file(file.path())?;
        assert_eq!(config.provisioning.timeout, Duration::from_secs(1800));
        assert_eq!(config.provisioning.min_timeout, Duration::from_secs(10));
        assert_eq!(config.provisioning.delay, Duration::from_secs(5));
        assert_eq!(config.retry.timeout, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_min_timeout_above_timeout() {
        let mut config = ReconcilerConfig::default();
        config.provisioning = config
            .provisioning
            .timeout(Duration::from_secs(2))
            .min_timeout(Duration::from_secs(3));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_min_timeout() {
        let mut config = ReconcilerConfig::default();
        config.provisioning = config.provisioning.min_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));

        config.provisioning = config
            .provisioning
            .min_timeout(Duration::from_secs(1))
            .delay(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unbounded_timeouts_from_env_validate() {
        let config = ReconcilerConfig::default().with_env_overrides(|key| match key {
            "TETHER_PROVISION_TIMEOUT_SECS" | "TETHER_RETRY_TIMEOUT_SECS" => {
                Some(u64::MAX.to_string())
            }
            _ => None,
        });

        assert_eq!(config.provisioning.timeout, Duration::from_secs(u64::MAX));
        assert_eq!(config.retry.timeout, Duration::from_secs(u64::MAX));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(3)),
            now.checked_add(Duration::from_secs(3)).unwrap_or(now)
        );

        let far = deadline_after(now, Duration::MAX);
        assert!(far > now);
        assert!(far.duration_since(now) >= FAR_FUTURE);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = ReconcilerConfig::from_file(Path::new("/nonexistent/tether.toml"));
        assert!(matches!(result, Err(Error::ConfigRead { .. })));
    }
}
