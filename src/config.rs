use crate::client::{DeleteMode, SubmitMode};
use crate::delta::DeltaConfig;
use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Bounded exponential backoff for read-after-write lookups and deletion
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: Duration::from_secs(10),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: usize) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(250))
    }
}

/// Connection settings for the remote catalog.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("CATALOG_URL", "http://localhost:21000"),
            token: env::var("CATALOG_TOKEN").ok().filter(|t| !t.is_empty()),
            request_timeout: env_duration_millis("CATALOG_TIMEOUT_MS", 30_000),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Knobs that shape one ingestion run.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub batch_size: usize,
    pub workers: usize,
    pub mode: SubmitMode,
    /// Columns whose blank value clears what the catalog holds.
    pub overwrite_blank: BTreeSet<String>,
    pub lookup: RetryPolicy,
    pub delete_mode: DeleteMode,
    /// Bulk-fetch existing identities of a type before its first pass.
    pub preload_cache: bool,
    /// Capacity of each worker's row channel.
    pub channel_capacity: usize,
}

impl LoadSettings {
    pub fn from_env() -> Self {
        let batch_size = env_usize("LOADER_BATCH_SIZE", 20).max(1);
        Self {
            batch_size,
            workers: env_usize("LOADER_WORKERS", num_cpus::get()).max(1),
            mode: SubmitMode::Upsert,
            overwrite_blank: BTreeSet::new(),
            lookup: RetryPolicy::new(
                env_usize("LOADER_LOOKUP_RETRIES", 5),
                env_duration_millis("LOADER_LOOKUP_BACKOFF_MS", 250),
            ),
            delete_mode: DeleteMode::Soft,
            preload_cache: env_bool("LOADER_PRELOAD_CACHE", true),
            channel_capacity: batch_size * 4,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.channel_capacity = self.batch_size * 4;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_mode(mut self, mode: SubmitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_overwrite_blank<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overwrite_blank = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_lookup(mut self, lookup: RetryPolicy) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = mode;
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload_cache = preload;
        self
    }
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self::from_env()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    pub settings: LoadSettings,
    pub catalog: CatalogConfig,
    pub delta: DeltaConfig,
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self {
            settings: LoadSettings::from_env(),
            catalog: CatalogConfig::from_env(),
            delta: DeltaConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_settings_builders_clamp_to_one() {
        let settings = LoadSettings::from_env().with_batch_size(0).with_workers(0);
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.channel_capacity, 4);
    }

    #[test]
    fn test_overwrite_blank_set() {
        let settings = LoadSettings::from_env().with_overwrite_blank(["description", "readme"]);
        assert!(settings.overwrite_blank.contains("readme"));
        assert!(!settings.overwrite_blank.contains("tags"));
    }
}
