use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use citabot_core::interval::TimeSlot;

use crate::types::{BusyInterval, EventDraft, EventPatch, EventRef};
use crate::CalendarError;

#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn query_freebusy(
        &self,
        calendar_id: &str,
        window: &TimeSlot,
    ) -> Result<Vec<BusyInterval>, CalendarError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<EventRef, CalendarError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_ref: &EventRef,
        patch: &EventPatch,
    ) -> Result<(), CalendarError>;

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_ref: &EventRef,
    ) -> Result<(), CalendarError>;
}

/// Always-free calendar that mints sequential event refs. Used when the
/// deployment has no external calendar wired up, and as a test default.
#[derive(Default)]
pub struct NoopCalendarClient {
    counter: AtomicU64,
}

impl NoopCalendarClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarClient for NoopCalendarClient {
    async fn query_freebusy(
        &self,
        _calendar_id: &str,
        _window: &TimeSlot,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        Ok(Vec::new())
    }

    async fn create_event(
        &self,
        _calendar_id: &str,
        _draft: &EventDraft,
    ) -> Result<EventRef, CalendarError> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(EventRef(format!("noop-event-{id}")))
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
