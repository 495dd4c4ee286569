//! Listen delivery with a bounded retry queue
//!
//! Sends counted-listen events to the backend: up to 3 bounded attempts
//! with linear backoff, then the record is parked in a deduplicated queue.
//! A periodic sweep retries queued records once per pass and drops
//! anything older than the configured maximum age. Delivery errors never
//! propagate to playback.

use crate::backend::BackendClient;
use crate::error::{Error, Result};
use crate::session::SessionManager;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tonbeat_common::time;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tonbeat_common::api::{LegacyListenRequest, SessionListenRequest};
use tonbeat_common::auth::MusicAuth;
use tonbeat_common::config::DeliveryConfig;
use tonbeat_common::track::Track;
use tracing::{debug, info, warn};

/// A counted listen ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenRecord {
    pub track_address: String,
    pub collection_address: String,
    pub timestamp: DateTime<Utc>,
}

impl ListenRecord {
    /// Build from a track; fails unless both addresses are present
    pub fn for_track(track: &Track) -> Result<Self> {
        let (track_address, collection_address) = track.listen_identity().ok_or_else(|| {
            Error::InvalidTrack("listen requires track and collection addresses".to_string())
        })?;
        Ok(Self {
            track_address: track_address.to_string(),
            collection_address: collection_address.to_string(),
            timestamp: time::now(),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}:{}", self.track_address, self.collection_address)
    }
}

struct QueuedListen {
    record: ListenRecord,
    enqueued_at: Instant,
}

/// Durable listen delivery service
pub struct ListenDelivery {
    backend: Arc<BackendClient>,
    config: DeliveryConfig,
    queue: Mutex<HashMap<String, QueuedListen>>,
}

impl ListenDelivery {
    pub fn new(backend: Arc<BackendClient>, config: DeliveryConfig) -> Self {
        Self {
            backend,
            config,
            queue: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver one record; true only on server-acknowledged success
    ///
    /// Exhausting all attempts (or any delivery error) parks the record
    /// in the retry queue instead of dropping it.
    pub async fn record_listen(&self, record: &ListenRecord, auth: &MusicAuth) -> bool {
        for attempt in 1..=self.config.max_attempts {
            match self.attempt(record, auth).await {
                Ok(true) => {
                    debug!(track = %record.track_address, attempt, "listen delivered");
                    return true;
                }
                Ok(false) => {
                    warn!(track = %record.track_address, attempt, "backend did not acknowledge listen");
                }
                Err(e) => {
                    warn!(track = %record.track_address, attempt, error = %e, "listen delivery failed");
                }
            }
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
        }

        self.enqueue(record.clone());
        false
    }

    /// Sequential bulk delivery with a small inter-request delay
    ///
    /// One attempt per record, not the hot playback path. Returns the
    /// number of acknowledged records.
    pub async fn record_batch(&self, records: &[ListenRecord], auth: &MusicAuth) -> usize {
        let mut delivered = 0;
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }
            match self.attempt(record, auth).await {
                Ok(true) => delivered += 1,
                Ok(false) => warn!(track = %record.track_address, "batch listen not acknowledged"),
                Err(e) => warn!(track = %record.track_address, error = %e, "batch listen failed"),
            }
        }
        info!(delivered, total = records.len(), "batch delivery finished");
        delivered
    }

    /// Retry every queued record once; drop entries past the maximum age
    ///
    /// Returns the number of records delivered by this sweep.
    pub async fn flush_queue(&self, auth: &MusicAuth) -> usize {
        let max_age = self.config.queue_max_age();
        let candidates: Vec<(String, ListenRecord, Instant)> = {
            let queue = self.lock();
            queue
                .iter()
                .map(|(k, q)| (k.clone(), q.record.clone(), q.enqueued_at))
                .collect()
        };

        let mut delivered = 0;
        for (key, record, enqueued_at) in candidates {
            if enqueued_at.elapsed() > max_age {
                warn!(track = %record.track_address, "dropping stale queued listen");
                self.lock().remove(&key);
                continue;
            }

            match self.attempt(&record, auth).await {
                Ok(true) => {
                    debug!(track = %record.track_address, "queued listen delivered");
                    self.lock().remove(&key);
                    delivered += 1;
                }
                Ok(false) | Err(_) => {
                    // Stays queued for the next sweep
                }
            }
        }
        delivered
    }

    /// Background sweep draining the queue with whatever authorization the
    /// session manager currently holds
    pub fn spawn_retry_sweep(self: &Arc<Self>, sessions: Arc<SessionManager>) -> JoinHandle<()> {
        let delivery = Arc::clone(self);
        let interval = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if delivery.queue_len() == 0 {
                    continue;
                }
                match sessions.music_auth().await {
                    Some(auth) => {
                        delivery.flush_queue(&auth).await;
                    }
                    None => debug!("retry sweep skipped: no valid authorization"),
                }
            }
        })
    }

    pub fn queue_len(&self) -> usize {
        self.lock().len()
    }

    fn enqueue(&self, record: ListenRecord) {
        let mut queue = self.lock();
        let key = record.queue_key();
        // Dedup by track+collection; the original enqueue time governs expiry
        queue.entry(key).or_insert_with(|| {
            info!(track = %record.track_address, "listen parked for retry");
            QueuedListen {
                record,
                enqueued_at: Instant::now(),
            }
        });
    }

    async fn attempt(&self, record: &ListenRecord, auth: &MusicAuth) -> Result<bool> {
        let timeout = self.config.timeout();
        match auth {
            MusicAuth::Session(session) => {
                let request = SessionListenRequest {
                    nft_address: record.track_address.clone(),
                    timestamp: record.timestamp.timestamp_millis(),
                };
                let response = self
                    .backend
                    .record_session_listen(session, &request, timeout)
                    .await?;
                Ok(response.success)
            }
            MusicAuth::ApiKey(key) => {
                let request = LegacyListenRequest {
                    nft_address: record.track_address.clone(),
                    collection_address: record.collection_address.clone(),
                };
                self.backend
                    .record_legacy_listen(&key.server_url, &request, timeout)
                    .await
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueuedListen>> {
        self.queue.lock().expect("listen queue lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonbeat_common::track::Collection;

    #[test]
    fn test_record_requires_both_addresses() {
        let bare = Track {
            address: Some("A".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ListenRecord::for_track(&bare),
            Err(Error::InvalidTrack(_))
        ));

        let full = Track {
            address: Some("A".to_string()),
            collection: Some(Collection {
                address: "EQcoll".to_string(),
                name: None,
            }),
            ..Default::default()
        };
        let record = ListenRecord::for_track(&full).unwrap();
        assert_eq!(record.track_address, "A");
        assert_eq!(record.collection_address, "EQcoll");
    }

    #[test]
    fn test_enqueue_dedupes_and_keeps_original_age() {
        let delivery = ListenDelivery::new(
            Arc::new(BackendClient::new().unwrap()),
            DeliveryConfig::default(),
        );
        let record = ListenRecord {
            track_address: "A".to_string(),
            collection_address: "EQcoll".to_string(),
            timestamp: Utc::now(),
        };

        delivery.enqueue(record.clone());
        let first_age = delivery.lock().get("A:EQcoll").unwrap().enqueued_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        delivery.enqueue(record);

        assert_eq!(delivery.queue_len(), 1);
        assert_eq!(delivery.lock().get("A:EQcoll").unwrap().enqueued_at, first_age);
    }
}
