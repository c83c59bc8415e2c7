use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::altegio::{BookingApi, SlotCandidate};
use crate::errors::BotError;

#[derive(Debug, Clone)]
struct CacheEntry {
    slots: Vec<SlotCandidate>,
    fetched_at: DateTime<Utc>,
}

/// Availability as served to callers. `possibly_stale` is set when the
/// remote fetch failed and an expired entry was served instead; display is
/// best-effort, correctness is enforced at commit time.
#[derive(Debug, Clone)]
pub struct Availability {
    pub slots: Vec<SlotCandidate>,
    pub possibly_stale: bool,
}

/// Short-lived per-(staff, service, day) cache of availability. Entries are
/// disposable; the remote platform stays the source of truth.
pub struct SlotCache {
    ttl: Duration,
    adapter: Arc<dyn BookingApi>,
    inner: RwLock<HashMap<(i64, i64, NaiveDate), CacheEntry>>,
}

impl SlotCache {
    pub fn new(adapter: Arc<dyn BookingApi>, ttl: Duration) -> Self {
        Self {
            ttl,
            adapter,
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(entry.fetched_at);
        age.to_std().map(|age| age < self.ttl).unwrap_or(false)
    }

    /// Cached slots if fresh, otherwise fetched through the adapter. On
    /// adapter failure a stale entry is served tagged `possibly_stale`
    /// rather than failing the caller outright.
    pub async fn get(
        &self,
        staff_id: i64,
        service_id: i64,
        date: NaiveDate,
    ) -> Result<Availability, BotError> {
        let key = (staff_id, service_id, date);
        let now = Utc::now();

        {
            let map = self.inner.read().await;
            if let Some(entry) = map.get(&key) {
                if self.is_fresh(entry, now) {
                    return Ok(Availability {
                        slots: entry.slots.clone(),
                        possibly_stale: false,
                    });
                }
            }
        }

        match self.adapter.list_availability(staff_id, service_id, date).await {
            Ok(slots) => {
                let mut map = self.inner.write().await;
                // Expired entries stay around for one extra TTL window as
                // the stale fallback, then get dropped here.
                map.retain(|_, entry| {
                    now.signed_duration_since(entry.fetched_at)
                        .to_std()
                        .map(|age| age < self.ttl * 2)
                        .unwrap_or(false)
                });
                map.insert(
                    key,
                    CacheEntry {
                        slots: slots.clone(),
                        fetched_at: now,
                    },
                );
                Ok(Availability {
                    slots,
                    possibly_stale: false,
                })
            }
            Err(fetch_err) => {
                let map = self.inner.read().await;
                if let Some(entry) = map.get(&key) {
                    tracing::warn!(
                        "serving stale availability for staff {} on {}: {}",
                        staff_id,
                        date,
                        fetch_err
                    );
                    return Ok(Availability {
                        slots: entry.slots.clone(),
                        possibly_stale: true,
                    });
                }
                Err(fetch_err)
            }
        }
    }

    /// Drops every entry for the staff/date, typically after a commit or a
    /// definite rejection consumed one of its slots.
    pub async fn invalidate(&self, staff_id: i64, date: NaiveDate) {
        let mut map = self.inner.write().await;
        map.retain(|(entry_staff, _, entry_date), _| {
            *entry_staff != staff_id || *entry_date != date
        });
    }
}
