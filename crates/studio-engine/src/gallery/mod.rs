//! Local gallery of generated media.
//!
//! The item list is replaced wholesale on every change. Removals are found
//! by diffing the previous and next lists, and each removed item has its
//! display reference revoked and its blob deleted exactly once, whether it
//! left through the size cap, `clear`, or `replace`.

mod blob_store;
mod object_urls;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::gallery::{DisplayReference, MediaMetadata, StoredMediaItem};
use studio_contracts::media::{data_uri, parse_data_uri, MediaItem, MediaPayload, ProviderId};
use studio_contracts::settings::keys;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SharedSettings;

pub use blob_store::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use object_urls::{is_object_url, ObjectUrls};

/// Settings payload size past which the inline fallback logs a warning.
const INLINE_WARN_BYTES: usize = 4 * 1024 * 1024;

/// Downloads media that arrived as a remote reference.
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, provider: ProviderId, url: &str) -> StudioResult<(Vec<u8>, String)>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub saved: Vec<String>,
    pub evicted: Vec<String>,
    pub failures: Vec<String>,
}

impl SaveOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// User-facing storage warning, if anything failed.
    pub fn warning(&self) -> Option<String> {
        (!self.failures.is_empty()).then(|| format!("Gallery save failed: {}", self.failures.join("; ")))
    }
}

pub struct Gallery {
    blobs: Option<Arc<dyn BlobStore>>,
    urls: ObjectUrls,
    fetcher: Option<Arc<dyn MediaFetcher>>,
    settings: SharedSettings,
    max_items: usize,
    items: Mutex<Arc<Vec<StoredMediaItem>>>,
}

impl Gallery {
    /// Without a blob store the gallery falls back to inline `data:` URIs
    /// kept in the settings store.
    pub fn new(settings: SharedSettings, max_items: usize) -> Self {
        Self {
            blobs: None,
            urls: ObjectUrls::new(),
            fetcher: None,
            settings,
            max_items: max_items.max(1),
            items: Mutex::new(Arc::new(Vec::new())),
        }
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Newest first.
    pub fn items(&self) -> Arc<Vec<StoredMediaItem>> {
        self.lock_items()
            .map(|items| Arc::clone(&items))
            .unwrap_or_default()
    }

    pub fn object_urls(&self) -> &ObjectUrls {
        &self.urls
    }

    /// Bytes behind a stored item, read from its blob or inline reference.
    pub fn read(&self, item: &StoredMediaItem) -> StudioResult<Option<Vec<u8>>> {
        if let (Some(blobs), Some(blob_id)) = (&self.blobs, &item.blob_id) {
            return blobs.get(blob_id);
        }
        Ok(match &item.reference {
            DisplayReference::Inline(uri) => {
                parse_data_uri(uri).map(|(_, data)| data)
            }
            _ => None,
        })
    }

    /// Persists a batch. Items that cannot be stored are reported in the
    /// outcome and left out; the in-memory list is never half-updated.
    pub fn save(&self, media: &[MediaItem], metadata: &MediaMetadata) -> SaveOutcome {
        let mut outcome = SaveOutcome::default();
        let mut batch = Vec::new();
        for item in media {
            match self.store_item(item, metadata) {
                Ok(stored) => batch.push(stored),
                Err(err) => {
                    warn!(item = %item.id, error = %err, "gallery save failed");
                    outcome.failures.push(err.to_string());
                }
            }
        }
        if batch.is_empty() {
            return outcome;
        }
        // A batch larger than the cap never reaches the list.
        if batch.len() > self.max_items {
            for dropped in batch.split_off(self.max_items) {
                debug!(item = %dropped.id, "batch exceeds gallery cap");
                self.release(&dropped);
            }
        }
        outcome.saved = batch.iter().map(|item| item.id.clone()).collect();

        let mut guard = match self.lock_items() {
            Ok(guard) => guard,
            Err(err) => {
                for stored in &batch {
                    self.release(stored);
                }
                outcome.saved.clear();
                outcome.failures.push(err.to_string());
                return outcome;
            }
        };
        let mut next = batch;
        next.extend(guard.iter().cloned());
        next.truncate(self.max_items);
        let (evicted, persist) = self.commit(&mut guard, next);
        outcome.evicted = evicted;
        if let Err(err) = persist {
            outcome.failures.push(err.to_string());
        }
        info!(saved = outcome.saved.len(), evicted = outcome.evicted.len(), "gallery updated");
        outcome
    }

    /// Removes everything, releasing each item once.
    pub fn clear(&self) -> StudioResult<usize> {
        self.replace(Vec::new())
    }

    /// Out-of-band replacement of the whole list. Returns how many items
    /// were released.
    pub fn replace(&self, next: Vec<StoredMediaItem>) -> StudioResult<usize> {
        let mut guard = self.lock_items()?;
        let mut next = next;
        if next.len() > self.max_items {
            let current: HashSet<&str> = guard.iter().map(|item| item.id.as_str()).collect();
            let overflow = next.split_off(self.max_items);
            // Entries already listed are released by the commit diff.
            for dropped in overflow.iter().filter(|item| !current.contains(item.id.as_str())) {
                self.release(dropped);
            }
        }
        let (evicted, persist) = self.commit(&mut guard, next);
        persist?;
        Ok(evicted.len())
    }

    /// Rebuilds the list from persisted metadata. Blob-backed entries get a
    /// fresh display reference; entries whose blob is gone are dropped.
    /// Entries past the cap have their blobs deleted, and the trimmed list
    /// is written back whenever anything was dropped.
    pub fn hydrate(&self) -> StudioResult<usize> {
        let persisted: Vec<StoredMediaItem> = self
            .settings
            .lock()
            .map_err(|_| StudioError::Storage("settings lock poisoned".to_string()))?
            .get_typed(keys::GALLERY_ITEMS)
            .unwrap_or_default();
        let total = persisted.len();
        let mut restored = Vec::new();
        for mut item in persisted {
            if restored.len() >= self.max_items {
                self.release(&item);
                continue;
            }
            match (&self.blobs, item.blob_id.clone()) {
                (Some(blobs), Some(blob_id)) => match blobs.get(&blob_id) {
                    Ok(Some(_)) => {
                        item.reference = DisplayReference::Blob(self.urls.create(&blob_id));
                        restored.push(item);
                    }
                    Ok(None) => debug!(item = %item.id, "skipping gallery item with missing blob"),
                    Err(err) => {
                        warn!(item = %item.id, error = %err, "failed to read gallery blob");
                        item.reference = DisplayReference::Blob(self.urls.create(&blob_id));
                        restored.push(item);
                    }
                },
                (None, Some(_)) => debug!(item = %item.id, "skipping blob item without a blob store"),
                (_, None) => {
                    if item.reference.is_blob_derived() {
                        continue;
                    }
                    restored.push(item);
                }
            }
        }
        let count = restored.len();
        if count < total {
            info!(kept = count, dropped = total - count, "trimmed persisted gallery");
            self.persist(&restored)?;
        }
        let mut guard = self.lock_items()?;
        for previous in guard.iter() {
            if let DisplayReference::Blob(url) = &previous.reference {
                self.urls.revoke(url);
            }
        }
        *guard = Arc::new(restored);
        Ok(count)
    }

    /// Frees every live display reference. Blobs stay for the next session.
    pub fn teardown(&self) -> usize {
        self.urls.revoke_all()
    }

    fn store_item(&self, item: &MediaItem, metadata: &MediaMetadata) -> StudioResult<StoredMediaItem> {
        let (data, mime_type) = match &item.payload {
            MediaPayload::Bytes { data, mime_type } => (data.clone(), mime_type.clone()),
            MediaPayload::Remote { url, mime_type } => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    StudioError::Storage(format!("no fetcher available for {url}"))
                })?;
                let (data, fetched_mime) = fetcher.fetch(metadata.provider, url)?;
                (data, mime_type.clone().unwrap_or(fetched_mime))
            }
        };
        if data.is_empty() {
            return Err(StudioError::EmptyResult(metadata.provider.to_string()));
        }
        let digest = hex::encode(Sha256::digest(&data));
        let (reference, blob_id) = match &self.blobs {
            Some(blobs) => {
                let blob_id = Uuid::new_v4().to_string();
                blobs.put(&blob_id, &data)?;
                (DisplayReference::Blob(self.urls.create(&blob_id)), Some(blob_id))
            }
            None => (DisplayReference::Inline(data_uri(&mime_type, &data)), None),
        };
        Ok(StoredMediaItem {
            id: Uuid::new_v4().to_string(),
            modality: item.modality,
            reference,
            prompt: metadata.prompt.clone(),
            model: metadata.model.clone(),
            provider: metadata.provider,
            mime_type,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            blob_id,
            digest: Some(digest),
        })
    }

    /// Swaps in `next`, releases whatever disappeared, and persists.
    fn commit(
        &self,
        current: &mut MutexGuard<'_, Arc<Vec<StoredMediaItem>>>,
        next: Vec<StoredMediaItem>,
    ) -> (Vec<String>, StudioResult<()>) {
        let keep: HashSet<&str> = next.iter().map(|item| item.id.as_str()).collect();
        let removed: Vec<StoredMediaItem> = current
            .iter()
            .filter(|item| !keep.contains(item.id.as_str()))
            .cloned()
            .collect();
        **current = Arc::new(next);
        for item in &removed {
            self.release(item);
        }
        let persist = self.persist(current);
        (removed.into_iter().map(|item| item.id).collect(), persist)
    }

    fn release(&self, item: &StoredMediaItem) {
        if let DisplayReference::Blob(url) = &item.reference {
            self.urls.revoke(url);
        }
        if let (Some(blobs), Some(blob_id)) = (&self.blobs, &item.blob_id) {
            if let Err(err) = blobs.delete(blob_id) {
                warn!(item = %item.id, error = %err, "failed to delete gallery blob");
            }
        }
    }

    fn persist(&self, items: &[StoredMediaItem]) -> StudioResult<()> {
        let mut settings = self
            .settings
            .lock()
            .map_err(|_| StudioError::Storage("settings lock poisoned".to_string()))?;
        settings
            .set_typed(keys::GALLERY_ITEMS, &items)
            .map_err(|err| StudioError::Storage(format!("{err:#}")))?;
        if self.blobs.is_none() && settings.estimate_size() > INLINE_WARN_BYTES {
            warn!(
                bytes = settings.estimate_size(),
                "inline gallery entries are growing the settings store"
            );
        }
        Ok(())
    }

    fn lock_items(&self) -> StudioResult<MutexGuard<'_, Arc<Vec<StoredMediaItem>>>> {
        self.items
            .lock()
            .map_err(|_| StudioError::Storage("gallery lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use studio_contracts::gallery::{DisplayReference, MediaMetadata};
    use studio_contracts::media::{MediaItem, Modality, ProviderId};
    use studio_contracts::error::StudioResult;
    use studio_contracts::settings::{keys, SettingsStore};

    use super::{BlobStore, FsBlobStore, Gallery, MediaFetcher, MemoryBlobStore};
    use crate::config::SharedSettings;

    fn settings() -> SharedSettings {
        Arc::new(Mutex::new(SettingsStore::in_memory()))
    }

    fn metadata(prompt: &str) -> MediaMetadata {
        MediaMetadata {
            prompt: prompt.to_string(),
            model: "dryrun-image-1".to_string(),
            provider: ProviderId::Dryrun,
        }
    }

    fn png(tag: u8) -> MediaItem {
        MediaItem::bytes(Modality::Image, vec![0x89, b'P', b'N', b'G', tag], "image/png")
    }

    #[test]
    fn cap_evicts_oldest_and_deletes_each_blob_once() -> anyhow::Result<()> {
        let store = Arc::new(MemoryBlobStore::new());
        let gallery = Gallery::new(settings(), 12).with_blob_store(store.clone());
        let mut blob_by_prompt = Vec::new();
        for idx in 0..15u8 {
            let outcome = gallery.save(&[png(idx)], &metadata(&format!("p{idx}")));
            assert!(outcome.is_clean());
            let items = gallery.items();
            blob_by_prompt.push(items[0].blob_id.clone().unwrap_or_default());
        }

        let items = gallery.items();
        assert_eq!(items.len(), 12);
        let prompts: Vec<_> = items.iter().rev().map(|item| item.prompt.clone()).collect();
        let expected: Vec<_> = (3..15).map(|idx| format!("p{idx}")).collect();
        assert_eq!(prompts, expected);

        let mut deletions = store.deletions();
        deletions.sort();
        let mut evicted = blob_by_prompt[..3].to_vec();
        evicted.sort();
        assert_eq!(deletions, evicted);
        assert_eq!(store.len(), 12);
        assert_eq!(gallery.object_urls().live_count(), 12);
        Ok(())
    }

    #[test]
    fn clear_and_replace_release_exactly_once() -> anyhow::Result<()> {
        let store = Arc::new(MemoryBlobStore::new());
        let gallery = Gallery::new(settings(), 12).with_blob_store(store.clone());
        gallery.save(&[png(1), png(2), png(3)], &metadata("batch"));
        let before = gallery.items();

        let kept: Vec<_> = before.iter().skip(1).cloned().collect();
        assert_eq!(gallery.replace(kept)?, 1);
        assert_eq!(gallery.clear()?, 2);
        assert_eq!(gallery.clear()?, 0);
        assert_eq!(store.deletions().len(), 3);
        assert_eq!(gallery.object_urls().live_count(), 0);
        Ok(())
    }

    #[test]
    fn oversized_batch_releases_items_past_the_cap() -> anyhow::Result<()> {
        let store = Arc::new(MemoryBlobStore::new());
        let gallery = Gallery::new(settings(), 2).with_blob_store(store.clone());
        let outcome = gallery.save(&[png(1), png(2), png(3), png(4)], &metadata("burst"));

        assert!(outcome.is_clean());
        assert_eq!(outcome.saved.len(), 2);
        let items = gallery.items();
        let listed: Vec<_> = items.iter().map(|item| item.id.clone()).collect();
        assert_eq!(outcome.saved, listed);
        assert_eq!(store.len(), 2);
        assert_eq!(store.deletions().len(), 2);
        assert_eq!(gallery.object_urls().live_count(), 2);
        assert_eq!(gallery.read(&items[0])?, Some(vec![0x89, b'P', b'N', b'G', 1]));

        assert_eq!(gallery.clear()?, 2);
        assert_eq!(store.len(), 0);
        assert_eq!(gallery.object_urls().live_count(), 0);
        let mut deletions = store.deletions();
        let total = deletions.len();
        deletions.sort();
        deletions.dedup();
        assert_eq!((total, deletions.len()), (4, 4));
        Ok(())
    }

    #[test]
    fn hydrate_with_smaller_cap_deletes_dropped_blobs() -> anyhow::Result<()> {
        let shared = settings();
        let store = Arc::new(MemoryBlobStore::new());
        let gallery = Gallery::new(shared.clone(), 5).with_blob_store(store.clone());
        for idx in 0..5u8 {
            gallery.save(&[png(idx)], &metadata(&format!("p{idx}")));
        }
        assert_eq!(gallery.teardown(), 5);
        assert_eq!(store.len(), 5);

        let smaller = Gallery::new(shared.clone(), 2).with_blob_store(store.clone());
        assert_eq!(smaller.hydrate()?, 2);
        let prompts: Vec<_> = smaller.items().iter().map(|item| item.prompt.clone()).collect();
        assert_eq!(prompts, vec!["p4".to_string(), "p3".to_string()]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.deletions().len(), 3);
        assert_eq!(smaller.object_urls().live_count(), 2);
        let persisted = shared
            .lock()
            .map(|settings| settings.get(keys::GALLERY_ITEMS).cloned())
            .ok()
            .flatten();
        assert_eq!(persisted.and_then(|value| value.as_array().map(Vec::len)), Some(2));

        assert_eq!(smaller.clear()?, 2);
        assert_eq!(store.len(), 0);
        Ok(())
    }

    #[test]
    fn replace_past_cap_releases_unlisted_overflow() -> anyhow::Result<()> {
        let store = Arc::new(MemoryBlobStore::new());
        let gallery = Gallery::new(settings(), 2).with_blob_store(store.clone());
        gallery.save(&[png(1)], &metadata("first"));
        gallery.save(&[png(2)], &metadata("second"));
        let donor = Gallery::new(settings(), 2).with_blob_store(store.clone());
        donor.save(&[png(3)], &metadata("foreign"));

        let mut next: Vec<_> = gallery.items().iter().cloned().collect();
        next.extend(donor.items().iter().cloned());
        assert_eq!(gallery.replace(next)?, 0);
        assert_eq!(gallery.items().len(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.deletions().len(), 1);
        Ok(())
    }

    #[test]
    fn quota_failure_leaves_list_untouched() -> anyhow::Result<()> {
        let store = Arc::new(MemoryBlobStore::with_quota(6));
        let gallery = Gallery::new(settings(), 12).with_blob_store(store.clone());
        let first = gallery.save(&[png(1)], &metadata("fits"));
        assert!(first.is_clean());
        let second = gallery.save(&[png(2)], &metadata("too big"));
        assert_eq!(second.saved.len(), 0);
        assert!(second.warning().unwrap_or_default().contains("quota exceeded"));
        assert_eq!(gallery.items().len(), 1);
        assert_eq!(gallery.items()[0].prompt, "fits");
        Ok(())
    }

    #[test]
    fn inline_fallback_without_blob_store() -> anyhow::Result<()> {
        let shared = settings();
        let gallery = Gallery::new(shared.clone(), 2);
        gallery.save(&[png(1), png(2), png(3)], &metadata("inline"));
        let items = gallery.items();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0].reference, DisplayReference::Inline(uri) if uri.starts_with("data:image/png;base64,")));
        assert_eq!(gallery.read(&items[0])?, Some(vec![0x89, b'P', b'N', b'G', 1]));
        let persisted = shared
            .lock()
            .map(|settings| settings.get(keys::GALLERY_ITEMS).cloned())
            .ok()
            .flatten();
        assert_eq!(persisted.and_then(|value| value.as_array().map(Vec::len)), Some(2));
        Ok(())
    }

    #[test]
    fn hydrate_restores_blob_items_and_skips_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let settings_path = temp.path().join("settings.json");
        let store: Arc<FsBlobStore> = Arc::new(FsBlobStore::new(temp.path().join("blobs")));
        let shared: SharedSettings = Arc::new(Mutex::new(SettingsStore::open(&settings_path)));
        let gallery = Gallery::new(shared, 12).with_blob_store(store.clone());
        gallery.save(&[png(1), png(2)], &metadata("keep"));
        let lost = gallery.items()[0].blob_id.clone().unwrap_or_default();
        assert_eq!(gallery.teardown(), 2);
        store.delete(&lost)?;

        let reopened: SharedSettings = Arc::new(Mutex::new(SettingsStore::open(&settings_path)));
        let restored = Gallery::new(reopened, 12).with_blob_store(store);
        assert_eq!(restored.hydrate()?, 1);
        let items = restored.items();
        assert!(items[0].reference.is_blob_derived());
        assert_eq!(restored.object_urls().live_count(), 1);
        assert_eq!(items[0].digest.as_ref().map(String::len), Some(64));
        Ok(())
    }

    struct StaticFetcher;

    impl MediaFetcher for StaticFetcher {
        fn fetch(&self, _provider: ProviderId, url: &str) -> StudioResult<(Vec<u8>, String)> {
            Ok((url.as_bytes().to_vec(), "video/mp4".to_string()))
        }
    }

    #[test]
    fn remote_items_are_fetched_before_storing() -> anyhow::Result<()> {
        let store = Arc::new(MemoryBlobStore::new());
        let gallery = Gallery::new(settings(), 12).with_blob_store(store.clone());
        let remote = MediaItem::remote(Modality::Video, "https://cdn.example/v.mp4", None);

        let without = gallery.save(&[remote.clone()], &metadata("clip"));
        assert!(!without.is_clean());

        let gallery = gallery.with_fetcher(Arc::new(StaticFetcher));
        let with = gallery.save(&[remote], &metadata("clip"));
        assert!(with.is_clean());
        assert_eq!(gallery.items()[0].mime_type, "video/mp4");
        assert_eq!(store.len(), 1);
        Ok(())
    }
}
