//! In-memory trait implementations used by engine unit tests and local
//! experiments. The mutex gives each store the same atomicity the SQL
//! implementations get from their write transactions.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;

use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
use citabot_core::domain::catalog::{Provider, ProviderId, Service};
use citabot_core::domain::conversation::{ControlState, Conversation, ConversationId};
use citabot_core::interval::TimeSlot;
use citabot_core::rate::{RateDecision, RateWindow};

use super::{
    phone_suffix, BookingStore, CatalogStore, CommitOutcome, ConversationStore, KeywordStore,
    RateLimitStore, RepositoryError, StatsDelta, StatsStore,
};

#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: Mutex<HashMap<String, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Booking> {
        self.bookings.lock().await.values().cloned().collect()
    }
}

fn conflicts_with(existing: &Booking, candidate: &Booking, exclude_self: bool) -> bool {
    if exclude_self && existing.id == candidate.id {
        return false;
    }
    existing.provider_id == candidate.provider_id
        && existing.status.is_active()
        && existing.slot().overlaps(&candidate.slot())
}

#[async_trait::async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.bookings.lock().await.get(&id.0).cloned())
    }

    async fn insert_if_free(&self, booking: &Booking) -> Result<CommitOutcome, RepositoryError> {
        let mut bookings = self.bookings.lock().await;
        if bookings.values().any(|existing| conflicts_with(existing, booking, false)) {
            return Ok(CommitOutcome::Conflict);
        }
        bookings.insert(booking.id.0.clone(), booking.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn reschedule_if_free(
        &self,
        booking: &Booking,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut bookings = self.bookings.lock().await;
        if bookings.values().any(|existing| conflicts_with(existing, booking, true)) {
            return Ok(CommitOutcome::Conflict);
        }
        bookings.insert(booking.id.0.clone(), booking.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn set_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
        external_event_ref: Option<&str>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut bookings = self.bookings.lock().await;
        if let Some(booking) = bookings.get_mut(&id.0) {
            booking.status = status;
            if let Some(event_ref) = external_event_ref {
                booking.external_event_ref = Some(event_ref.to_string());
            }
            if let Some(notes) = notes {
                booking.notes = Some(notes.to_string());
            }
            booking.updated_at = now;
        }
        Ok(())
    }

    async fn active_for_provider(
        &self,
        provider_id: &ProviderId,
        window: &TimeSlot,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let bookings = self.bookings.lock().await;
        let mut matching: Vec<Booking> = bookings
            .values()
            .filter(|booking| {
                booking.provider_id == *provider_id
                    && booking.status.is_active()
                    && booking.slot().overlaps(window)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|booking| booking.start);
        Ok(matching)
    }

    async fn next_active_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.upcoming_for_phone(phone, now).await?.into_iter().next())
    }

    async fn upcoming_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let suffix = phone_suffix(phone).to_string();
        let bookings = self.bookings.lock().await;
        let mut matching: Vec<Booking> = bookings
            .values()
            .filter(|booking| {
                booking.client_phone.ends_with(&suffix)
                    && booking.status.is_active()
                    && booking.start > now
            })
            .cloned()
            .collect();
        matching.sort_by_key(|booking| booking.start);
        Ok(matching)
    }

    async fn past_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let suffix = phone_suffix(phone).to_string();
        let bookings = self.bookings.lock().await;
        let mut matching: Vec<Booking> = bookings
            .values()
            .filter(|booking| booking.client_phone.ends_with(&suffix) && booking.start <= now)
            .cloned()
            .collect();
        matching.sort_by_key(|booking| std::cmp::Reverse(booking.start));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<i64, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.lock().await.get(&id.0).cloned())
    }

    async fn upsert_on_contact(
        &self,
        id: ConversationId,
        client_phone: &str,
        client_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations.entry(id.0).or_insert_with(|| {
            Conversation::new(id, client_phone, now)
        });
        conversation.last_message_at = Some(now);
        if conversation.client_name.is_none() {
            conversation.client_name = client_name.map(str::to_owned);
        }
        Ok(conversation.clone())
    }

    async fn set_state(
        &self,
        id: ConversationId,
        state: ControlState,
        paused_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.lock().await;
        if let Some(conversation) = conversations.get_mut(&id.0) {
            conversation.state = state;
            match state {
                ControlState::Automated => {
                    conversation.paused_by = None;
                    conversation.paused_at = None;
                }
                ControlState::Paused(_) => {
                    conversation.paused_by = paused_by.map(str::to_owned);
                    conversation.paused_at = Some(now);
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_claim(
        &self,
        sender: &str,
        capacity: u32,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RepositoryError> {
        let window = Duration::seconds(window_secs);
        let mut windows = self.windows.lock().await;
        let state =
            windows.entry(sender.to_string()).or_insert_with(|| RateWindow::new(sender, now));
        state.roll(window, now);
        let allowed = state.try_claim(capacity);
        Ok(state.decision(allowed, capacity, window))
    }
}

pub struct InMemoryCatalogStore {
    services: Vec<Service>,
    providers: Vec<Provider>,
}

impl InMemoryCatalogStore {
    pub fn new(services: Vec<Service>, providers: Vec<Provider>) -> Self {
        Self { services, providers }
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn list_services(&self) -> Result<Vec<Service>, RepositoryError> {
        Ok(self.services.iter().filter(|service| service.active).cloned().collect())
    }

    async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>, RepositoryError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .services
            .iter()
            .find(|service| service.active && service.name.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        Ok(self.providers.iter().filter(|provider| provider.active).cloned().collect())
    }

    async fn find_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        Ok(self.providers.iter().find(|provider| provider.active && provider.id == *id).cloned())
    }

    async fn find_provider_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Provider>, RepositoryError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .providers
            .iter()
            .find(|provider| provider.active && provider.name.to_lowercase().contains(&needle))
            .cloned())
    }
}

pub struct InMemoryKeywordStore {
    keywords: Vec<String>,
}

impl InMemoryKeywordStore {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords: keywords.into_iter().map(|keyword| keyword.to_lowercase()).collect() }
    }
}

#[async_trait::async_trait]
impl KeywordStore for InMemoryKeywordStore {
    async fn active_keywords(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.keywords.clone())
    }
}

#[derive(Default)]
pub struct InMemoryStatsStore {
    records: Mutex<Vec<(NaiveDate, StatsDelta)>>,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn totals(&self) -> StatsDelta {
        let records = self.records.lock().await;
        let mut totals = StatsDelta::default();
        for (_, delta) in records.iter() {
            totals.messages_received += delta.messages_received;
            totals.messages_responded += delta.messages_responded;
            totals.bookings_created += delta.bookings_created;
            totals.bookings_updated += delta.bookings_updated;
            totals.bookings_cancelled += delta.bookings_cancelled;
            totals.human_handoffs += delta.human_handoffs;
            totals.errors += delta.errors;
        }
        totals
    }
}

#[async_trait::async_trait]
impl StatsStore for InMemoryStatsStore {
    async fn record(&self, day: NaiveDate, delta: StatsDelta) -> Result<(), RepositoryError> {
        self.records.lock().await.push((day, delta));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
    use citabot_core::domain::catalog::{ProviderId, ServiceId};

    use super::InMemoryBookingStore;
    use crate::repositories::{BookingStore, CommitOutcome};

    fn sample(id: &str, start_offset_hours: i64) -> Booking {
        let start = Utc::now() + Duration::hours(start_offset_hours);
        Booking {
            id: BookingId(id.to_string()),
            client_phone: "5215533330001".to_string(),
            client_name: "Cliente".to_string(),
            provider_id: ProviderId("prov-mem".to_string()),
            services: vec![ServiceId("corte".to_string())],
            start,
            end: start + Duration::minutes(60),
            total_price: Decimal::new(35_000, 2),
            external_event_ref: None,
            status: BookingStatus::Pending,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mirror_of_sql_conflict_semantics() {
        let store = InMemoryBookingStore::new();
        assert_eq!(
            store.insert_if_free(&sample("mem-1", 24)).await.expect("insert"),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.insert_if_free(&sample("mem-2", 24)).await.expect("insert"),
            CommitOutcome::Conflict
        );

        let mut rescheduled = sample("mem-1", 24);
        rescheduled.start += Duration::minutes(15);
        rescheduled.end += Duration::minutes(15);
        assert_eq!(
            store.reschedule_if_free(&rescheduled).await.expect("reschedule"),
            CommitOutcome::Committed
        );
    }
}
