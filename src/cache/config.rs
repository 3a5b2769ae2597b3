//! Refresh configuration.
//!
//! Controls change coalescing and regeneration behaviour via `pagerefresh.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

pub(crate) const DEFAULT_CONCURRENCY: usize = 3;
pub(crate) const MAX_CONCURRENCY: usize = 100;
const DEFAULT_STORAGE_LIMIT: usize = 1000;

/// Refresh configuration from `pagerefresh.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Maximum in-flight remote regenerations.
    pub concurrency: usize,
    /// Coalesce all changes of a unit of work into one queued job.
    pub batch_mode: bool,
    /// Run regeneration through the job queue instead of inline.
    pub queue: bool,
    /// Wait this many seconds before a regeneration run starts.
    pub delay_seconds: Option<u64>,
    /// Maximum pages held by the in-memory cache storage.
    pub storage_limit: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_mode: false,
            queue: false,
            delay_seconds: None,
            storage_limit: DEFAULT_STORAGE_LIMIT,
        }
    }
}

impl From<&crate::config::RefreshSettings> for RefreshConfig {
    fn from(settings: &crate::config::RefreshSettings) -> Self {
        Self {
            concurrency: settings.concurrency.get(),
            batch_mode: settings.batch_mode,
            queue: settings.queue,
            delay_seconds: settings.delay.map(|delay| delay.as_secs()),
            storage_limit: settings.storage_limit.get(),
        }
    }
}

impl RefreshConfig {
    /// Concurrency clamped into `1..=100`.
    pub fn concurrency(&self) -> usize {
        clamp_concurrency(self.concurrency)
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }

    /// Storage limit as NonZeroUsize, clamping to 1 if zero.
    pub fn storage_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.storage_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

pub(crate) fn clamp_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = RefreshConfig::default();
        assert_eq!(config.concurrency, 3);
        assert!(!config.batch_mode);
        assert!(!config.queue);
        assert!(config.delay().is_none());
        assert_eq!(config.storage_limit, 1000);
    }

    #[test]
    fn concurrency_is_clamped() {
        let low = RefreshConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(low.concurrency(), 1);

        let high = RefreshConfig {
            concurrency: 500,
            ..Default::default()
        };
        assert_eq!(high.concurrency(), 100);
    }

    #[test]
    fn zero_delay_means_none() {
        let config = RefreshConfig {
            delay_seconds: Some(0),
            ..Default::default()
        };
        assert!(config.delay().is_none());

        let config = RefreshConfig {
            delay_seconds: Some(5),
            ..Default::default()
        };
        assert_eq!(config.delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn storage_limit_clamps_to_min() {
        let config = RefreshConfig {
            storage_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.storage_limit_non_zero().get(), 1);
    }
}
