use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{env, CACHE_DIR_NAME, DEFAULT_DATA_DIR, DEFAULT_DEBOUNCE_MS};
use crate::remote::ClientId;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding one JSON file per collection. `None` disables the
    /// local cache entirely (reads are empty, writes are no-ops).
    pub cache_dir: Option<PathBuf>,
    /// Quiet period before a coalesced write fires.
    pub debounce: Duration,
    /// Tag attached to every remote write so push echoes can be recognised.
    pub client_id: ClientId,
    /// Drop self-originated update echoes while a newer local write is pending.
    pub skip_stale_self_echoes: bool,
}

impl SyncConfig {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: Some(cache_dir.as_ref().to_path_buf()),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            client_id: ClientId::random(),
            skip_stale_self_echoes: true,
        }
    }

    /// Configuration for contexts without local storage.
    pub fn without_cache() -> Self {
        Self {
            cache_dir: None,
            ..Self::default()
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_stale_echo_skipping(mut self, enabled: bool) -> Self {
        self.skip_stale_self_echoes = enabled;
        self
    }

    /// Default configuration overlaid with `ATELIER_CACHE_DIR` and
    /// `ATELIER_DEBOUNCE_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(env::CACHE_DIR) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = std::env::var(env::DEBOUNCE_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.debounce = Duration::from_millis(ms);
        }
        config
    }

    fn default_cache_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("atelier"))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
            .join(CACHE_DIR_NAME)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(Self::default_cache_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quiet_period() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(1500));
        assert!(config.cache_dir.is_some());
    }

    #[test]
    fn test_without_cache_disables_storage() {
        let config = SyncConfig::without_cache().with_debounce(Duration::from_millis(10));
        assert!(config.cache_dir.is_none());
        assert_eq!(config.debounce, Duration::from_millis(10));
    }
}
