// src/blob.rs

//! Locally addressable blob URLs for transcoded output.
//!
//! Every registration gets a fresh `blob:ffqueue/<uuid>` URL, so two runs of
//! the same job never share a handle. URLs stay resolvable until revoked.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

const URL_PREFIX: &str = "blob:ffqueue/";

/// Playable handle to an output: URL, MIME type and the bytes behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    url: String,
    mime_type: String,
    data: Bytes,
}

impl ResourceHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

#[derive(Debug, Default)]
pub struct BlobStore {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under a new URL.
    pub fn register(&self, data: Bytes, mime_type: &str) -> ResourceHandle {
        let url = format!("{URL_PREFIX}{}", Uuid::new_v4());
        debug!(%url, bytes = data.len(), mime_type, "registered blob");
        self.lock().insert(url.clone(), data.clone());
        ResourceHandle {
            url,
            mime_type: mime_type.to_string(),
            data,
        }
    }

    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        self.lock().get(url).cloned()
    }

    /// Forget a URL. Returns false if it was unknown or already revoked.
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self.lock().remove(url).is_some();
        if removed {
            debug!(%url, "revoked blob");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
