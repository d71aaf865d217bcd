use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::gallery::DEFAULT_GALLERY_MAX_ITEMS;
use studio_contracts::media::{Credential, ProviderId};
use studio_contracts::settings::{keys, SettingsStore};

use crate::polling::{PollPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_MAX_ATTEMPTS};

pub const DEFAULT_PROXY_BASE: &str = "http://127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = ".studio";
pub const DEFAULT_JOB_HISTORY_CAP: usize = 20;
pub const DEFAULT_TOOL_ROUNDS: usize = 3;

/// Settings shared by the chat session, the gallery and the queue.
pub type SharedSettings = Arc<Mutex<SettingsStore>>;

/// Process-wide knobs. Every value has a default and an environment
/// override; the polling cadence lives here rather than at each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioConfig {
    pub proxy_base: String,
    pub data_dir: PathBuf,
    pub poll: PollPolicy,
    pub gallery_max_items: usize,
    pub job_history_cap: usize,
    pub tool_rounds: usize,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            proxy_base: DEFAULT_PROXY_BASE.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll: PollPolicy::default(),
            gallery_max_items: DEFAULT_GALLERY_MAX_ITEMS,
            job_history_cap: DEFAULT_JOB_HISTORY_CAP,
            tool_rounds: DEFAULT_TOOL_ROUNDS,
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_usize = |key: &str, default: usize| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };
        let interval_secs = lookup("STUDIO_POLL_INTERVAL_SECS")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let max_attempts = lookup("STUDIO_POLL_MAX_ATTEMPTS")
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_POLL_MAX_ATTEMPTS);

        Self {
            proxy_base: lookup("STUDIO_PROXY_BASE")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.proxy_base),
            data_dir: lookup("STUDIO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            poll: PollPolicy::new(interval_secs, max_attempts),
            gallery_max_items: parse_usize("STUDIO_GALLERY_MAX_ITEMS", defaults.gallery_max_items),
            job_history_cap: parse_usize("STUDIO_JOB_HISTORY_CAP", defaults.job_history_cap),
            tool_rounds: parse_usize("STUDIO_TOOL_ROUNDS", defaults.tool_rounds),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Stored credential for `provider`, else its environment variable.
pub fn resolve_credential(settings: &SettingsStore, provider: ProviderId) -> Credential {
    if let Some(stored) = settings.get_string(&keys::credential(provider)) {
        return Credential::new(stored);
    }
    provider
        .credential_env()
        .and_then(non_empty_env)
        .map(Credential::new)
        .unwrap_or_default()
}

pub(crate) fn lock_settings(settings: &SharedSettings) -> StudioResult<MutexGuard<'_, SettingsStore>> {
    settings
        .lock()
        .map_err(|_| StudioError::Storage("settings lock poisoned".to_string()))
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use serde_json::json;
    use studio_contracts::media::ProviderId;
    use studio_contracts::settings::{keys, SettingsStore};

    use super::{resolve_credential, StudioConfig};

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STUDIO_PROXY_BASE", "https://studio.example/"),
            ("STUDIO_DATA_DIR", "/tmp/studio"),
            ("STUDIO_POLL_INTERVAL_SECS", "0.5"),
            ("STUDIO_POLL_MAX_ATTEMPTS", "7"),
            ("STUDIO_GALLERY_MAX_ITEMS", "0"),
            ("STUDIO_TOOL_ROUNDS", "5"),
        ]);
        let config = StudioConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string()));
        assert_eq!(config.proxy_base, "https://studio.example");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/studio"));
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.poll.max_attempts, 7);
        assert_eq!(config.gallery_max_items, 12);
        assert_eq!(config.job_history_cap, 20);
        assert_eq!(config.tool_rounds, 5);
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/studio/settings.json"));
    }

    #[test]
    fn defaults_match_reference_polling() {
        let config = StudioConfig::from_lookup(|_| None);
        assert_eq!(config.poll.interval, Duration::from_secs(5));
        assert_eq!(config.poll.max_attempts, 120);
        assert_eq!(config, StudioConfig::default());
    }

    #[test]
    fn unrepresentable_interval_falls_back_to_default() {
        for raw in ["1e300", "-1", "NaN", "inf", "soon"] {
            let config = StudioConfig::from_lookup(|key| {
                (key == "STUDIO_POLL_INTERVAL_SECS").then(|| raw.to_string())
            });
            assert_eq!(config.poll.interval, Duration::from_secs(5), "{raw}");
        }
    }

    #[test]
    fn stored_credential_wins() -> anyhow::Result<()> {
        let mut settings = SettingsStore::in_memory();
        settings.set(&keys::credential(ProviderId::Chutes), json!(" cpk-123 "))?;
        assert_eq!(resolve_credential(&settings, ProviderId::Chutes).expose(), "cpk-123");
        assert!(resolve_credential(&settings, ProviderId::Dryrun).is_blank());
        Ok(())
    }
}
