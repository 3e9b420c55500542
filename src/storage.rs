use crate::error::Result;
use crate::types::EventOccurrence;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Storage trait for persisting event occurrences. The REST layer and the
/// scheduler bring their own implementation; the scraper only needs these
/// two operations plus lookups for tests and diagnostics.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert-or-update keyed on `external_id`.
    async fn upsert_by_external_id(&self, record: &EventOccurrence) -> Result<UpsertOutcome>;

    /// Delete occurrences with `start_date` before `cutoff`. With
    /// `keep_featured`, featured records survive regardless of age.
    /// Returns the number of deleted rows.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>, keep_featured: bool) -> Result<u64>;

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<EventOccurrence>>;

    async fn count(&self) -> Result<usize>;
}

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    events: Arc<Mutex<HashMap<String, EventOccurrence>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upsert_by_external_id(&self, record: &EventOccurrence) -> Result<UpsertOutcome> {
        let mut events = self.events.lock().unwrap();
        let outcome = if events.contains_key(&record.external_id) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };
        events.insert(record.external_id.clone(), record.clone());
        debug!("Upserted event {} ({:?})", record.external_id, outcome);
        Ok(outcome)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>, keep_featured: bool) -> Result<u64> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|_, e| e.start_date >= cutoff || (keep_featured && e.is_featured));
        let deleted = (before - events.len()) as u64;
        debug!("Deleted {} stale events older than {}", deleted, cutoff);
        Ok(deleted)
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<EventOccurrence>> {
        let events = self.events.lock().unwrap();
        Ok(events.get(external_id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.events.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventCategory, PriceInfo};
    use chrono::Duration;

    fn sample_event(id: &str, start: DateTime<Utc>, featured: bool) -> EventOccurrence {
        EventOccurrence {
            external_id: id.to_string(),
            name: "Testfest".to_string(),
            description: None,
            location: None,
            address: None,
            latitude: None,
            longitude: None,
            start_date: start,
            end_date: None,
            image_url: "https://example.com/img.jpg".to_string(),
            source_url: "https://example.com/veranstaltung/1".to_string(),
            category: EventCategory::General,
            price_info: PriceInfo::default(),
            contact_info: None,
            is_featured: featured,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_external_id() {
        let storage = InMemoryStorage::new();
        let event = sample_event("abc", Utc::now(), false);

        assert_eq!(
            storage.upsert_by_external_id(&event).await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            storage.upsert_by_external_id(&event).await.unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reaper_spares_featured_records() {
        let storage = InMemoryStorage::new();
        let old = Utc::now() - Duration::days(30);

        storage
            .upsert_by_external_id(&sample_event("stale", old, false))
            .await
            .unwrap();
        storage
            .upsert_by_external_id(&sample_event("pinned", old, true))
            .await
            .unwrap();

        let deleted = storage
            .delete_older_than(Utc::now() - Duration::days(1), true)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(storage.get_by_external_id("stale").await.unwrap().is_none());
        assert!(storage.get_by_external_id("pinned").await.unwrap().is_some());
    }
}
