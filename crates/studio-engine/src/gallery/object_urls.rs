use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

const SCHEME_PREFIX: &str = "blob:studio/";

/// Live display references handed out for stored blobs. A reference is
/// freed by `revoke`; revoking it again is a no-op.
#[derive(Debug, Default)]
pub struct ObjectUrls {
    live: Mutex<HashMap<String, String>>,
}

impl ObjectUrls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, blob_id: &str) -> String {
        let url = format!("{SCHEME_PREFIX}{}", Uuid::new_v4());
        if let Ok(mut live) = self.live.lock() {
            live.insert(url.clone(), blob_id.to_string());
        }
        url
    }

    pub fn revoke(&self, url: &str) -> bool {
        self.live
            .lock()
            .map(|mut live| live.remove(url).is_some())
            .unwrap_or(false)
    }

    pub fn resolve(&self, url: &str) -> Option<String> {
        self.live.lock().ok()?.get(url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or_default()
    }

    /// Frees every live reference and returns how many there were.
    pub fn revoke_all(&self) -> usize {
        self.live
            .lock()
            .map(|mut live| live.drain().count())
            .unwrap_or_default()
    }
}

pub fn is_object_url(reference: &str) -> bool {
    reference.starts_with(SCHEME_PREFIX)
}
