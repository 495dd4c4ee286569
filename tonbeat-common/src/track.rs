//! Track and collection data model
//!
//! A track is the playable logical unit (an NFT): stable `address` identity
//! with an ordinal `index` fallback, display metadata, an optional collection
//! reference, and an optional pre-resolved audio source handle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Collection reference carried by a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Stable collection address
    pub address: String,

    /// Display name, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Track identity key
///
/// Two tracks are the same entity iff their addresses match, or both lack an
/// address and their indexes match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// Stable external identity
    Address(String),
    /// Ordinal fallback when the address is absent
    Index(u32),
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKey::Address(addr) => write!(f, "{}", addr),
            TrackKey::Index(idx) => write!(f, "idx:{}", idx),
        }
    }
}

/// A playable logical unit (NFT) with metadata
///
/// Immutable once placed in a playlist, except for collection enrichment
/// which only fills missing collection data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Stable external identity; `index` is the fallback when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Ordinal position assigned by the upstream list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Collection>,

    /// Pre-resolved audio source, when an upstream generation step supplied one
    #[serde(skip)]
    pub source: Option<SourceHandle>,

    /// Unknown metadata attributes preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Track {
    /// Identity key, or None for a malformed track (no address and no index)
    pub fn key(&self) -> Option<TrackKey> {
        if let Some(addr) = &self.address {
            if !addr.is_empty() {
                return Some(TrackKey::Address(addr.clone()));
            }
        }
        self.index.map(TrackKey::Index)
    }

    /// Whether two tracks refer to the same entity
    pub fn same_entity(&self, other: &Track) -> bool {
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Track + collection addresses, required before a listen can be recorded
    pub fn listen_identity(&self) -> Option<(&str, &str)> {
        let addr = self.address.as_deref().filter(|a| !a.is_empty())?;
        let coll = self
            .collection
            .as_ref()
            .map(|c| c.address.as_str())
            .filter(|a| !a.is_empty())?;
        Some((addr, coll))
    }
}

/// Opaque reference to playable audio data
///
/// Cloneable; all clones share the underlying payload. The music source
/// cache exclusively owns release: once released the payload is dropped and
/// every clone observes the handle as empty.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    id: Uuid,
    data: Mutex<Option<Vec<u8>>>,
    byte_len: usize,
    release_count: AtomicU32,
    duration_hint: Option<f64>,
}

impl SourceHandle {
    /// Wrap generated audio bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_duration_hint(data, None)
    }

    /// Wrap generated audio bytes with a known duration in seconds
    pub fn with_duration_hint(data: Vec<u8>, duration_secs: Option<f64>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                byte_len: data.len(),
                data: Mutex::new(Some(data)),
                release_count: AtomicU32::new(0),
                duration_hint: duration_secs,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Payload size at creation time (stable across release)
    pub fn byte_len(&self) -> usize {
        self.inner.byte_len
    }

    /// Duration in seconds, when the generator reported one
    pub fn duration_hint(&self) -> Option<f64> {
        self.inner.duration_hint
    }

    /// Copy of the payload, or None once released
    pub fn data(&self) -> Option<Vec<u8>> {
        self.inner.data.lock().expect("source handle lock poisoned").clone()
    }

    /// Drop the payload. Returns true if this call performed the release.
    pub fn release(&self) -> bool {
        let freed = self
            .inner
            .data
            .lock()
            .expect("source handle lock poisoned")
            .take()
            .is_some();
        if freed {
            self.inner.release_count.fetch_add(1, Ordering::Relaxed);
        }
        freed
    }

    pub fn is_released(&self) -> bool {
        self.inner.data.lock().expect("source handle lock poisoned").is_none()
    }

    /// Number of effective releases (0 or 1; >1 would indicate a lifetime bug)
    pub fn release_count(&self) -> u32 {
        self.inner.release_count.load(Ordering::Relaxed)
    }
}
