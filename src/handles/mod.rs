//! Revocable handles for converted payloads.
//!
//! A handle is what the outside world gets for a successful output: it can be
//! resolved to bytes for display or download until it is revoked. Bytes that
//! were already resolved stay valid for their holder after revocation.

use crate::constants::HANDLE_URL_SCHEME;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    id: Uuid,
}

impl ObjectHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{}/{}", HANDLE_URL_SCHEME, self.id)
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug, Clone)]
pub struct HandleEntry {
    pub data: Bytes,
    pub mime: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    entries: Arc<Mutex<HashMap<Uuid, HandleEntry>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, HandleEntry>> {
        // A poisoned map is still structurally sound; keep serving it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mint(&self, data: Bytes, mime: impl Into<String>, file_name: impl Into<String>) -> ObjectHandle {
        let id = Uuid::new_v4();
        self.lock().insert(
            id,
            HandleEntry {
                data,
                mime: mime.into(),
                file_name: file_name.into(),
            },
        );
        tracing::debug!("Minted handle {}/{}", HANDLE_URL_SCHEME, id);
        ObjectHandle { id }
    }

    pub fn resolve(&self, handle: &ObjectHandle) -> Option<Bytes> {
        self.lock().get(&handle.id).map(|entry| entry.data.clone())
    }

    pub fn entry(&self, handle: &ObjectHandle) -> Option<HandleEntry> {
        self.lock().get(&handle.id).cloned()
    }

    pub fn is_live(&self, handle: &ObjectHandle) -> bool {
        self.lock().contains_key(&handle.id)
    }

    /// Returns false when the handle was already revoked or never minted here.
    pub fn revoke(&self, handle: &ObjectHandle) -> bool {
        let removed = self.lock().remove(&handle.id).is_some();
        if removed {
            tracing::debug!("Revoked handle {}", handle);
        } else {
            tracing::warn!("Handle {} revoked twice or unknown", handle);
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }
}
