use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use citabot_calendar::CalendarClient;
use citabot_core::domain::booking::BookingId;
use citabot_core::domain::catalog::{Provider, ProviderId, Weekday};
use citabot_core::errors::PipelineError;
use citabot_core::interval::TimeSlot;
use citabot_db::repositories::BookingStore;

const SLOT_GRID_MINUTES: i64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Live,
    Cached,
    Stale,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Availability {
    pub free: bool,
    pub source: Freshness,
    pub busy: Vec<TimeSlot>,
}

/// A booking's own interval, excluded when re-validating its move.
#[derive(Clone, Debug)]
pub struct ExcludedInterval {
    pub booking_id: BookingId,
    pub slot: TimeSlot,
}

struct CacheEntry {
    busy: Vec<TimeSlot>,
    fetched_at: Instant,
}

/// Resolves free/busy for a provider and interval.
///
/// Busy time is the union of the external calendar's free/busy answer and
/// locally known active bookings - the local leg is the defense against
/// replication lag in the external source. The external leg is cached per
/// provider per day with a short TTL and invalidated eagerly on every
/// booking commit. When the calendar is unreachable the last known value is
/// served tagged [`Freshness::Stale`] instead of failing the interaction.
pub struct AvailabilityOracle {
    calendar: Arc<dyn CalendarClient>,
    bookings: Arc<dyn BookingStore>,
    calendar_id: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<(String, NaiveDate), CacheEntry>>,
}

impl AvailabilityOracle {
    pub fn new(
        calendar: Arc<dyn CalendarClient>,
        bookings: Arc<dyn BookingStore>,
        calendar_id: impl Into<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            calendar,
            bookings,
            calendar_id: calendar_id.into(),
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn query(
        &self,
        provider_id: &ProviderId,
        slot: &TimeSlot,
    ) -> Result<Availability, PipelineError> {
        self.query_excluding(provider_id, slot, None).await
    }

    pub async fn query_excluding(
        &self,
        provider_id: &ProviderId,
        slot: &TimeSlot,
        exclude: Option<&ExcludedInterval>,
    ) -> Result<Availability, PipelineError> {
        let day = slot.start.date_naive();
        let (busy, source) = self.day_busy(provider_id, day, exclude).await?;
        let free = !busy.iter().any(|interval| interval.overlaps(slot));

        debug!(
            provider_id = %provider_id.0,
            start = %slot.start,
            end = %slot.end,
            free,
            source = ?source,
            busy_intervals = busy.len(),
            "availability resolved"
        );

        Ok(Availability { free, source, busy })
    }

    /// Candidate start times on a 30-minute grid inside the provider's
    /// working block for that day, skipping busy intervals and past times.
    pub async fn free_slots(
        &self,
        provider: &Provider,
        date: NaiveDate,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeSlot>, PipelineError> {
        let weekday = Weekday::from_chrono(date.weekday());
        let Some(block) = provider.block_for(weekday) else {
            return Ok(Vec::new());
        };

        let (busy, _) = self.day_busy(&provider.id, date, None).await?;

        let day_start = date.and_time(block.start).and_utc();
        let day_end = date.and_time(block.end).and_utc();
        let duration = chrono::Duration::minutes(i64::from(duration_minutes));

        let mut slots = Vec::new();
        let mut cursor = day_start;
        while cursor + duration <= day_end {
            let candidate = TimeSlot { start: cursor, end: cursor + duration };
            let clear = !busy.iter().any(|interval| interval.overlaps(&candidate));
            if clear && candidate.start >= now {
                slots.push(candidate);
            }
            cursor += chrono::Duration::minutes(SLOT_GRID_MINUTES);
        }

        Ok(slots)
    }

    /// Drop every cached day for the provider. Called by the booking engine
    /// after each committed create/update/cancel.
    pub async fn invalidate_provider(&self, provider_id: &ProviderId) {
        let mut cache = self.cache.lock().await;
        cache.retain(|(cached_provider, _), _| cached_provider != &provider_id.0);
    }

    async fn day_busy(
        &self,
        provider_id: &ProviderId,
        day: NaiveDate,
        exclude: Option<&ExcludedInterval>,
    ) -> Result<(Vec<TimeSlot>, Freshness), PipelineError> {
        let (mut busy, source) = self.external_day_busy(provider_id, day).await;

        if let Some(excluded) = exclude {
            // The booking's own external event shows up as a busy interval
            // identical to its prior slot; drop one such match.
            if let Some(position) = busy.iter().position(|interval| *interval == excluded.slot) {
                busy.remove(position);
            }
        }

        let window = day_window(day);
        let local = self
            .bookings
            .active_for_provider(provider_id, &window)
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))?;

        for booking in local {
            if let Some(excluded) = exclude {
                if booking.id == excluded.booking_id {
                    continue;
                }
            }
            busy.push(booking.slot());
        }

        busy.sort_by_key(|interval| interval.start);
        Ok((busy, source))
    }

    async fn external_day_busy(
        &self,
        provider_id: &ProviderId,
        day: NaiveDate,
    ) -> (Vec<TimeSlot>, Freshness) {
        let key = (provider_id.0.clone(), day);
        let mut cache = self.cache.lock().await;

        if let Some(entry) = cache.get(&key) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return (entry.busy.clone(), Freshness::Cached);
            }
        }

        match self.calendar.query_freebusy(&self.calendar_id, &day_window(day)).await {
            Ok(intervals) => {
                let busy: Vec<TimeSlot> =
                    intervals.iter().map(|interval| interval.slot()).collect();
                cache.insert(key, CacheEntry { busy: busy.clone(), fetched_at: Instant::now() });
                (busy, Freshness::Live)
            }
            Err(error) => {
                // Keep the chat flowing on calendar outage: last known value
                // if we have one, an optimistic empty view otherwise. Either
                // way the caller sees `Stale` and the commit path still
                // re-checks local bookings atomically.
                let fallback = cache.get(&key).map(|entry| entry.busy.clone()).unwrap_or_default();
                warn!(
                    provider_id = %provider_id.0,
                    %day,
                    error = %error,
                    cached = !fallback.is_empty(),
                    "freebusy lookup failed; serving stale availability"
                );
                (fallback, Freshness::Stale)
            }
        }
    }
}

fn day_window(day: NaiveDate) -> TimeSlot {
    let start = day.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc();
    let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
    let end = next.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc();
    TimeSlot { start, end }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
    use rust_decimal::Decimal;
    use tokio::sync::Mutex;

    use citabot_calendar::types::{BusyInterval, EventDraft, EventPatch, EventRef};
    use citabot_calendar::{CalendarClient, CalendarError};
    use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
    use citabot_core::domain::catalog::{
        AvailabilityBlock, Provider, ProviderId, ServiceId, Weekday,
    };
    use citabot_core::interval::TimeSlot;
    use citabot_db::repositories::{BookingStore, InMemoryBookingStore};

    use super::{AvailabilityOracle, Freshness};

    struct ScriptedCalendar {
        responses: Mutex<VecDeque<Result<Vec<BusyInterval>, CalendarError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedCalendar {
        fn new(responses: Vec<Result<Vec<BusyInterval>, CalendarError>>) -> Self {
            Self { responses: Mutex::new(responses.into()), calls: Mutex::new(0) }
        }

        async fn calls(&self) -> u32 {
            *self.calls.lock().await
        }
    }

    #[async_trait]
    impl CalendarClient for ScriptedCalendar {
        async fn query_freebusy(
            &self,
            _calendar_id: &str,
            _window: &TimeSlot,
        ) -> Result<Vec<BusyInterval>, CalendarError> {
            *self.calls.lock().await += 1;
            self.responses.lock().await.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn create_event(
            &self,
            _calendar_id: &str,
            _draft: &EventDraft,
        ) -> Result<EventRef, CalendarError> {
            Ok(EventRef("scripted".to_string()))
        }

        async fn update_event(
            &self,
            _calendar_id: &str,
            _event_ref: &EventRef,
            _patch: &EventPatch,
        ) -> Result<(), CalendarError> {
            Ok(())
        }

        async fn delete_event(
            &self,
            _calendar_id: &str,
            _event_ref: &EventRef,
        ) -> Result<(), CalendarError> {
            Ok(())
        }
    }

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn slot(start: &str, end: &str) -> TimeSlot {
        TimeSlot { start: ts(start), end: ts(end) }
    }

    fn busy(start: &str, end: &str) -> BusyInterval {
        BusyInterval { start: ts(start), end: ts(end) }
    }

    fn oracle(
        calendar: Arc<ScriptedCalendar>,
        bookings: Arc<InMemoryBookingStore>,
    ) -> AvailabilityOracle {
        AvailabilityOracle::new(calendar, bookings, "primary", Duration::from_secs(300))
    }

    fn provider_id() -> ProviderId {
        ProviderId("prov-orc".to_string())
    }

    fn local_booking(id: &str, start: &str, end: &str) -> Booking {
        Booking {
            id: BookingId(id.to_string()),
            client_phone: "5215544440001".to_string(),
            client_name: "Cliente".to_string(),
            provider_id: provider_id(),
            services: vec![ServiceId("corte".to_string())],
            start: ts(start),
            end: ts(end),
            total_price: Decimal::new(15_000, 2),
            external_event_ref: None,
            status: BookingStatus::Pending,
            notes: None,
            created_at: ts(start),
            updated_at: ts(start),
        }
    }

    #[tokio::test]
    async fn external_busy_blocks_the_slot_live() {
        let calendar = Arc::new(ScriptedCalendar::new(vec![Ok(vec![busy(
            "2026-05-12T16:00:00Z",
            "2026-05-12T17:00:00Z",
        )])]));
        let oracle = oracle(calendar, Arc::new(InMemoryBookingStore::new()));

        let result = oracle
            .query(&provider_id(), &slot("2026-05-12T16:30:00Z", "2026-05-12T17:30:00Z"))
            .await
            .expect("query");
        assert!(!result.free);
        assert_eq!(result.source, Freshness::Live);
    }

    #[tokio::test]
    async fn second_query_within_ttl_is_served_from_cache() {
        let calendar = Arc::new(ScriptedCalendar::new(vec![Ok(Vec::new())]));
        let oracle = oracle(calendar.clone(), Arc::new(InMemoryBookingStore::new()));
        let window = slot("2026-05-13T16:00:00Z", "2026-05-13T17:00:00Z");

        let first = oracle.query(&provider_id(), &window).await.expect("query");
        assert_eq!(first.source, Freshness::Live);

        let second = oracle.query(&provider_id(), &window).await.expect("query");
        assert_eq!(second.source, Freshness::Cached);
        assert_eq!(calendar.calls().await, 1);
    }

    #[tokio::test]
    async fn calendar_outage_serves_the_last_known_value_as_stale() {
        let calendar = Arc::new(ScriptedCalendar::new(vec![
            Ok(vec![busy("2026-05-14T16:00:00Z", "2026-05-14T17:00:00Z")]),
            Err(CalendarError::Transport("calendar down".to_string())),
        ]));
        let bookings = Arc::new(InMemoryBookingStore::new());
        let oracle =
            AvailabilityOracle::new(calendar, bookings, "primary", Duration::from_millis(1));
        let window = slot("2026-05-14T16:00:00Z", "2026-05-14T17:00:00Z");

        let live = oracle.query(&provider_id(), &window).await.expect("query");
        assert!(!live.free);
        assert_eq!(live.source, Freshness::Live);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let stale = oracle.query(&provider_id(), &window).await.expect("query");
        assert!(!stale.free, "last known busy interval still applies");
        assert_eq!(stale.source, Freshness::Stale);
    }

    #[tokio::test]
    async fn outage_with_no_history_is_optimistic_but_marked_stale() {
        let calendar = Arc::new(ScriptedCalendar::new(vec![Err(CalendarError::Transport(
            "calendar down".to_string(),
        ))]));
        let oracle = oracle(calendar, Arc::new(InMemoryBookingStore::new()));

        let result = oracle
            .query(&provider_id(), &slot("2026-05-15T16:00:00Z", "2026-05-15T17:00:00Z"))
            .await
            .expect("query");
        assert!(result.free);
        assert_eq!(result.source, Freshness::Stale);
    }

    #[tokio::test]
    async fn local_active_bookings_block_even_when_the_calendar_is_clear() {
        let calendar = Arc::new(ScriptedCalendar::new(vec![Ok(Vec::new())]));
        let bookings = Arc::new(InMemoryBookingStore::new());
        bookings
            .insert_if_free(&local_booking("bk-av-1", "2026-05-16T16:00:00Z", "2026-05-16T17:00:00Z"))
            .await
            .expect("insert");
        let oracle = oracle(calendar, bookings);

        let result = oracle
            .query(&provider_id(), &slot("2026-05-16T16:30:00Z", "2026-05-16T17:30:00Z"))
            .await
            .expect("query");
        assert!(!result.free, "local pending booking guards against replication lag");
    }

    #[tokio::test]
    async fn invalidation_forces_a_fresh_external_read() {
        let calendar = Arc::new(ScriptedCalendar::new(vec![Ok(Vec::new()), Ok(Vec::new())]));
        let oracle = oracle(calendar.clone(), Arc::new(InMemoryBookingStore::new()));
        let window = slot("2026-05-17T16:00:00Z", "2026-05-17T17:00:00Z");

        oracle.query(&provider_id(), &window).await.expect("query");
        oracle.invalidate_provider(&provider_id()).await;
        let after = oracle.query(&provider_id(), &window).await.expect("query");

        assert_eq!(after.source, Freshness::Live);
        assert_eq!(calendar.calls().await, 2);
    }

    #[tokio::test]
    async fn free_slots_follow_the_provider_schedule_and_busy_intervals() {
        // 2026-05-18 is a Monday.
        let calendar = Arc::new(ScriptedCalendar::new(vec![Ok(vec![busy(
            "2026-05-18T10:00:00Z",
            "2026-05-18T11:00:00Z",
        )])]));
        let oracle = oracle(calendar, Arc::new(InMemoryBookingStore::new()));
        let provider = Provider {
            id: provider_id(),
            name: "Ana".to_string(),
            phone: None,
            specialties: Vec::new(),
            schedule: vec![AvailabilityBlock {
                weekday: Weekday::Monday,
                start: NaiveTime::from_hms_opt(10, 0, 0).expect("time"),
                end: NaiveTime::from_hms_opt(13, 0, 0).expect("time"),
            }],
            active: true,
        };
        let date = NaiveDate::from_ymd_opt(2026, 5, 18).expect("date");

        let slots = oracle
            .free_slots(&provider, date, 60, ts("2026-05-01T00:00:00Z"))
            .await
            .expect("free slots");

        let starts: Vec<String> =
            slots.iter().map(|slot| slot.start.format("%H:%M").to_string()).collect();
        assert_eq!(starts, vec!["11:00", "11:30", "12:00"]);

        // No block on Sunday, so no slots at all.
        let sunday = NaiveDate::from_ymd_opt(2026, 5, 17).expect("date");
        let none = oracle
            .free_slots(&provider, sunday, 60, ts("2026-05-01T00:00:00Z"))
            .await
            .expect("free slots");
        assert!(none.is_empty());
    }
}
