use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::media::{Modality, ProviderId};

/// Namespaced keys so one provider's preferences never collide with another's.
pub mod keys {
    use super::{Modality, ProviderId};

    pub const CHAT_HISTORY: &str = "chat.history";
    pub const CHAT_PROVIDER: &str = "chat.provider";
    pub const CHAT_MODEL: &str = "chat.model";
    pub const SYSTEM_PROMPT: &str = "chat.system_prompt";
    pub const GALLERY_ITEMS: &str = "gallery.items";
    pub const GALLERY_AUTO_SAVE: &str = "gallery.auto_save";

    pub fn credential(provider: ProviderId) -> String {
        format!("credential.{provider}")
    }

    pub fn provider_for(modality: Modality) -> String {
        format!("provider.{modality}")
    }

    pub fn last_model(provider: ProviderId, mode: &str) -> String {
        format!("model.{provider}.{mode}")
    }

    pub fn model_cache(provider: ProviderId) -> String {
        format!("models.{provider}")
    }

    pub fn tool_enabled(tool_name: &str) -> String {
        format!("tools.{tool_name}.enabled")
    }
}

/// String-keyed JSON settings file. Writes merge only the keys this instance
/// touched into whatever is on disk, so two handles do not clobber each other.
/// A store without a path keeps everything in memory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Map<String, Value>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = read_json_object(&path).unwrap_or_default();
        Self {
            path: Some(path),
            values,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Map::new(),
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        if self.values.get(key) == Some(&value) {
            return Ok(());
        }
        self.values.insert(key.to_string(), value);
        self.removed_keys.retain(|existing| existing != key);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("failed to serialize setting '{key}'"))?;
        self.set(key, value)
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.values.remove(key).is_none() {
            return Ok(());
        }
        self.dirty_keys.retain(|existing| existing != key);
        if !self.removed_keys.iter().any(|existing| existing == key) {
            self.removed_keys.push(key.to_string());
        }
        self.flush()
    }

    /// Rough byte size of the serialized settings, used for quota warnings.
    pub fn estimate_size(&self) -> usize {
        serde_json::to_vec(&self.values)
            .map(|bytes| bytes.len())
            .unwrap_or(0)
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.path.clone() else {
            self.dirty_keys.clear();
            self.removed_keys.clear();
            return Ok(());
        };
        if self.dirty_keys.is_empty() && self.removed_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&path).unwrap_or_default();
        for key in &self.dirty_keys {
            if let Some(value) = self.values.get(key) {
                on_disk.insert(key.clone(), value.clone());
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_json_object(&path, &on_disk)?;
        self.values = on_disk;
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
