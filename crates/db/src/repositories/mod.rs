use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
use citabot_core::domain::catalog::{Provider, ProviderId, Service};
use citabot_core::domain::conversation::{ControlState, Conversation, ConversationId};
use citabot_core::interval::TimeSlot;
use citabot_core::rate::RateDecision;

pub mod booking;
pub mod catalog;
pub mod conversation;
pub mod keyword;
pub mod memory;
pub mod rate_limit;
pub mod stats;

pub use booking::SqlBookingStore;
pub use catalog::SqlCatalogStore;
pub use conversation::SqlConversationStore;
pub use keyword::SqlKeywordStore;
pub use memory::{
    InMemoryBookingStore, InMemoryCatalogStore, InMemoryConversationStore, InMemoryKeywordStore,
    InMemoryRateLimitStore, InMemoryStatsStore,
};
pub use rate_limit::SqlRateLimitStore;
pub use stats::SqlStatsStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Outcome of a conflict-checked booking write. `Conflict` means an active
/// booking for the same provider already occupies part of the interval and
/// nothing was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Conflict,
}

/// Counter increments for one day of bot activity. All fields default to
/// zero so call sites name only what changed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatsDelta {
    pub messages_received: u32,
    pub messages_responded: u32,
    pub bookings_created: u32,
    pub bookings_updated: u32,
    pub bookings_cancelled: u32,
    pub human_handoffs: u32,
    pub errors: u32,
    pub response_time_ms: Option<f64>,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;

    /// Persist a new booking only if no active booking for the same provider
    /// overlaps its interval. The overlap re-check and the insert happen in
    /// one atomic storage unit.
    async fn insert_if_free(&self, booking: &Booking) -> Result<CommitOutcome, RepositoryError>;

    /// Rewrite an existing booking only if its new interval is free,
    /// excluding the booking's own prior interval from the check.
    async fn reschedule_if_free(&self, booking: &Booking)
        -> Result<CommitOutcome, RepositoryError>;

    /// Transition a booking's status, optionally attaching the external
    /// event reference and replacing the notes (cancellation reasons).
    async fn set_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
        external_event_ref: Option<&str>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn active_for_provider(
        &self,
        provider_id: &ProviderId,
        window: &TimeSlot,
    ) -> Result<Vec<Booking>, RepositoryError>;

    /// Next upcoming active booking for a client phone (suffix match, the
    /// helpdesk sometimes prefixes country codes inconsistently).
    async fn next_active_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, RepositoryError>;

    async fn upcoming_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, RepositoryError>;

    async fn past_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Booking>, RepositoryError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError>;

    /// Create the conversation on first contact, or touch `last_message_at`
    /// (and backfill the client name) on subsequent contacts.
    async fn upsert_on_contact(
        &self,
        id: ConversationId,
        client_phone: &str,
        client_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError>;

    async fn set_state(
        &self,
        id: ConversationId,
        state: ControlState,
        paused_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Roll the sender's window if expired, then claim one slot iff the
    /// count is below capacity. The claim must be atomic: two concurrent
    /// calls must never both win the last slot.
    async fn check_and_claim(
        &self,
        sender: &str,
        capacity: u32,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RepositoryError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, RepositoryError>;
    async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>, RepositoryError>;
    async fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError>;
    async fn find_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError>;
    async fn find_provider_by_name(&self, name: &str)
        -> Result<Option<Provider>, RepositoryError>;
}

#[async_trait]
pub trait KeywordStore: Send + Sync {
    async fn active_keywords(&self) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn record(&self, day: NaiveDate, delta: StatsDelta) -> Result<(), RepositoryError>;
}

/// Timestamps are stored as fixed-width UTC rfc3339 TEXT so lexicographic
/// SQL comparisons agree with chronological order.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

/// Suffix used for phone matching; inboxes disagree on country-code
/// prefixes, the last ten digits do not.
pub(crate) fn phone_suffix(phone: &str) -> &str {
    match phone.char_indices().nth_back(9) {
        Some((index, _)) => &phone[index..],
        None => phone,
    }
}
