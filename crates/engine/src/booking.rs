use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use citabot_agent::replies;
use citabot_calendar::types::{EventDraft, EventPatch, EventRef};
use citabot_calendar::CalendarClient;
use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
use citabot_core::domain::catalog::{Provider, Service, ServiceId};
use citabot_core::errors::PipelineError;
use citabot_core::interval::TimeSlot;
use citabot_db::repositories::{
    BookingStore, CatalogStore, CommitOutcome, StatsDelta, StatsStore,
};

use crate::availability::{AvailabilityOracle, ExcludedInterval};

#[derive(Clone, Debug)]
pub struct CreateBookingRequest {
    pub client_phone: String,
    pub client_name: String,
    pub service_names: Vec<String>,
    pub provider_name: Option<String>,
    pub start: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Partial reschedule request. Date and time combine with the stored
/// booking when only one of them changes.
#[derive(Clone, Debug, Default)]
pub struct BookingChanges {
    pub new_date: Option<NaiveDate>,
    pub new_time: Option<NaiveTime>,
    pub new_service_names: Option<Vec<String>>,
    pub new_provider_name: Option<String>,
}

impl BookingChanges {
    pub fn is_empty(&self) -> bool {
        self.new_date.is_none()
            && self.new_time.is_none()
            && self.new_service_names.is_none()
            && self.new_provider_name.is_none()
    }
}

/// A committed booking plus the display names reply formatting needs.
#[derive(Clone, Debug)]
pub struct BookingOutcome {
    pub booking: Booking,
    pub service_names: Vec<String>,
    pub provider_name: String,
    pub changes: Vec<String>,
}

/// Owns the appointment lifecycle and the per-provider non-overlap
/// invariant.
///
/// Writes go through a per-provider async lock *and* the store's
/// check-and-commit write, so two workers racing for one slot produce
/// exactly one committed booking and one conflict. Every commit invalidates
/// the availability cache for the provider before anything else observes
/// the change.
pub struct BookingEngine {
    bookings: Arc<dyn BookingStore>,
    catalog: Arc<dyn CatalogStore>,
    calendar: Arc<dyn CalendarClient>,
    oracle: Arc<AvailabilityOracle>,
    stats: Arc<dyn StatsStore>,
    calendar_id: String,
    provider_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BookingEngine {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        catalog: Arc<dyn CatalogStore>,
        calendar: Arc<dyn CalendarClient>,
        oracle: Arc<AvailabilityOracle>,
        stats: Arc<dyn StatsStore>,
        calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            bookings,
            catalog,
            calendar,
            oracle,
            stats,
            calendar_id: calendar_id.into(),
            provider_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a booking: validate services and provider, price the request,
    /// check availability, then commit `pending` atomically and mirror the
    /// event to the external calendar (`confirmed` on success, `cancelled`
    /// with a retryable error on failure).
    pub async fn create(
        &self,
        request: &CreateBookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, PipelineError> {
        let services = self.resolve_services(&request.service_names).await?;
        let provider = self.resolve_provider(request.provider_name.as_deref(), &services).await?;

        if request.start < now {
            return Err(PipelineError::Validation(replies::past_start_time()));
        }

        let duration: i64 = services.iter().map(|s| i64::from(s.duration_minutes)).sum();
        let total_price: Decimal = services.iter().map(|s| s.price).sum();
        let slot = TimeSlot::new(request.start, request.start + Duration::minutes(duration))?;

        let booking = Booking {
            id: BookingId::generate(),
            client_phone: request.client_phone.clone(),
            client_name: request.client_name.clone(),
            provider_id: provider.id.clone(),
            services: services.iter().map(|s| s.id.clone()).collect(),
            start: slot.start,
            end: slot.end,
            total_price,
            external_event_ref: None,
            status: BookingStatus::Pending,
            notes: request.notes.clone(),
            created_at: now,
            updated_at: now,
        };

        {
            let lock = self.provider_lock(&provider.id.0);
            let _guard = lock.lock().await;

            let availability = self.oracle.query(&provider.id, &slot).await?;
            if !availability.free {
                return Err(PipelineError::Conflict(format!(
                    "provider {} is busy in [{}, {})",
                    provider.id.0, slot.start, slot.end
                )));
            }

            // The availability check and this insert are distinct steps, so
            // the store re-verifies the overlap inside its own write
            // transaction before committing.
            match self
                .bookings
                .insert_if_free(&booking)
                .await
                .map_err(|e| PipelineError::Persistence(e.to_string()))?
            {
                CommitOutcome::Committed => {}
                CommitOutcome::Conflict => {
                    return Err(PipelineError::Conflict(format!(
                        "slot for provider {} was taken during commit",
                        provider.id.0
                    )));
                }
            }
        }

        self.oracle.invalidate_provider(&provider.id).await;

        let service_names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let draft = event_draft(&booking, &service_names, &provider.name, slot);

        match self.calendar.create_event(&self.calendar_id, &draft).await {
            Ok(EventRef(event_ref)) => {
                self.bookings
                    .set_status(&booking.id, BookingStatus::Confirmed, Some(&event_ref), None, now)
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;

                info!(
                    booking_id = %booking.id.0,
                    provider_id = %provider.id.0,
                    start = %booking.start,
                    event_ref,
                    "booking confirmed"
                );
                self.record_stats(now, StatsDelta { bookings_created: 1, ..StatsDelta::default() })
                    .await;

                let mut confirmed = booking;
                confirmed.status = BookingStatus::Confirmed;
                confirmed.external_event_ref = Some(event_ref);
                Ok(BookingOutcome {
                    booking: confirmed,
                    service_names,
                    provider_name: provider.name,
                    changes: Vec::new(),
                })
            }
            Err(calendar_error) => {
                // Release the slot: a booking without its mirrored event is
                // not allowed to hold the calendar hostage.
                if let Err(rollback_error) = self
                    .bookings
                    .set_status(&booking.id, BookingStatus::Cancelled, None, None, now)
                    .await
                {
                    error!(
                        booking_id = %booking.id.0,
                        error = %rollback_error,
                        "failed to cancel booking after calendar failure"
                    );
                }
                self.oracle.invalidate_provider(&provider.id).await;

                Err(PipelineError::external(
                    "calendar",
                    calendar_error.to_string(),
                    calendar_error.is_transient(),
                ))
            }
        }
    }

    /// Re-point the client's next appointment: new slot, services and/or
    /// provider. The new interval is validated against every active booking
    /// for the provider except this booking's own prior interval.
    pub async fn update_next_for_phone(
        &self,
        client_phone: &str,
        changes: &BookingChanges,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, PipelineError> {
        if changes.is_empty() {
            return Err(PipelineError::Validation(
                "No se especificaron cambios para realizar.".to_string(),
            ));
        }

        let mut booking = self
            .bookings
            .next_active_for_phone(client_phone, now)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?
            .ok_or_else(|| PipelineError::Validation(replies::no_upcoming_booking()))?;

        let old_slot = booking.slot();
        let old_provider = booking.provider_id.clone();
        let mut change_notes = Vec::new();

        let services = match &changes.new_service_names {
            Some(names) => {
                let services = self.resolve_services(names).await?;
                booking.services = services.iter().map(|s| s.id.clone()).collect();
                booking.total_price = services.iter().map(|s| s.price).sum();
                change_notes.push(format!(
                    "Servicios: {}",
                    services.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
                ));
                services
            }
            None => self.services_by_ids(&booking.services).await?,
        };

        let provider = match &changes.new_provider_name {
            Some(name) => {
                let provider = self.resolve_provider(Some(name), &services).await?;
                booking.provider_id = provider.id.clone();
                change_notes.push(format!("Estilista: {}", provider.name));
                provider
            }
            None => self
                .catalog
                .find_provider(&booking.provider_id)
                .await
                .map_err(|e| PipelineError::Persistence(e.to_string()))?
                .ok_or_else(|| {
                    PipelineError::Validation(replies::unknown_provider(&booking.provider_id.0))
                })?,
        };

        let duration = match &changes.new_service_names {
            Some(_) => {
                Duration::minutes(services.iter().map(|s| i64::from(s.duration_minutes)).sum())
            }
            None => old_slot.end - old_slot.start,
        };

        let reslotted = changes.new_date.is_some() || changes.new_time.is_some();
        let start = if reslotted {
            let date = changes.new_date.unwrap_or_else(|| booking.start.date_naive());
            let time = changes.new_time.unwrap_or_else(|| booking.start.time());
            date.and_time(time).and_utc()
        } else {
            booking.start
        };
        if start < now {
            return Err(PipelineError::Validation(replies::past_start_time()));
        }
        if reslotted {
            change_notes.push(format!(
                "Fecha/hora: {} a las {}",
                start.format("%Y-%m-%d"),
                start.format("%H:%M")
            ));
        }

        let slot = TimeSlot::new(start, start + duration)?;
        booking.start = slot.start;
        booking.end = slot.end;
        booking.updated_at = now;

        {
            let lock = self.provider_lock(&provider.id.0);
            let _guard = lock.lock().await;

            let excluded =
                ExcludedInterval { booking_id: booking.id.clone(), slot: old_slot };
            let availability =
                self.oracle.query_excluding(&provider.id, &slot, Some(&excluded)).await?;
            if !availability.free {
                return Err(PipelineError::Conflict(format!(
                    "provider {} is busy in [{}, {})",
                    provider.id.0, slot.start, slot.end
                )));
            }

            match self
                .bookings
                .reschedule_if_free(&booking)
                .await
                .map_err(|e| PipelineError::Persistence(e.to_string()))?
            {
                CommitOutcome::Committed => {}
                CommitOutcome::Conflict => {
                    return Err(PipelineError::Conflict(format!(
                        "new slot for provider {} was taken during commit",
                        provider.id.0
                    )));
                }
            }
        }

        self.oracle.invalidate_provider(&old_provider).await;
        if provider.id != old_provider {
            self.oracle.invalidate_provider(&provider.id).await;
        }

        let service_names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();

        // Update, never delete+recreate: the event keeps its identity so
        // attendee links stay valid. Propagation is best-effort.
        if let Some(event_ref) = booking.external_event_ref.clone() {
            let draft = event_draft(&booking, &service_names, &provider.name, slot);
            let patch = EventPatch {
                summary: Some(draft.summary),
                description: Some(draft.description),
                slot: Some(slot),
            };
            if let Err(calendar_error) = self
                .calendar
                .update_event(&self.calendar_id, &EventRef(event_ref.clone()), &patch)
                .await
            {
                warn!(
                    booking_id = %booking.id.0,
                    event_ref,
                    error = %calendar_error,
                    "calendar event update failed; local booking is authoritative"
                );
            }
        }

        info!(
            booking_id = %booking.id.0,
            provider_id = %provider.id.0,
            start = %booking.start,
            changes = change_notes.len(),
            "booking rescheduled"
        );
        self.record_stats(now, StatsDelta { bookings_updated: 1, ..StatsDelta::default() }).await;

        Ok(BookingOutcome {
            booking,
            service_names,
            provider_name: provider.name,
            changes: change_notes,
        })
    }

    /// Cancel by id. Idempotent: cancelling an already-cancelled booking is
    /// a no-op success. The external event delete is best-effort.
    pub async fn cancel(
        &self,
        id: &BookingId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Booking, PipelineError> {
        let mut booking = self
            .bookings
            .find_by_id(id)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?
            .ok_or_else(|| PipelineError::Validation("No encontré esa cita.".to_string()))?;

        if booking.status == BookingStatus::Cancelled {
            return Ok(booking);
        }

        let notes = reason.map(|reason| format!("Motivo cancelación: {reason}"));
        self.bookings
            .set_status(id, BookingStatus::Cancelled, None, notes.as_deref(), now)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        if let Some(event_ref) = &booking.external_event_ref {
            if let Err(calendar_error) =
                self.calendar.delete_event(&self.calendar_id, &EventRef(event_ref.clone())).await
            {
                warn!(
                    booking_id = %booking.id.0,
                    event_ref,
                    error = %calendar_error,
                    "calendar event delete failed; booking is cancelled locally"
                );
            }
        }

        self.oracle.invalidate_provider(&booking.provider_id).await;
        info!(booking_id = %booking.id.0, provider_id = %booking.provider_id.0, "booking cancelled");
        self.record_stats(now, StatsDelta { bookings_cancelled: 1, ..StatsDelta::default() }).await;

        booking.status = BookingStatus::Cancelled;
        if notes.is_some() {
            booking.notes = notes;
        }
        booking.updated_at = now;
        Ok(booking)
    }

    /// Cancel the client's next upcoming appointment, resolved by phone.
    pub async fn cancel_next_for_phone(
        &self,
        client_phone: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, PipelineError> {
        let booking = self
            .bookings
            .next_active_for_phone(client_phone, now)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?
            .ok_or_else(|| PipelineError::Validation(replies::no_upcoming_booking()))?;

        let provider_name = self
            .catalog
            .find_provider(&booking.provider_id)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?
            .map(|provider| provider.name)
            .unwrap_or_else(|| booking.provider_id.0.clone());
        let service_names = self.display_names(&booking.services).await;

        let cancelled = self.cancel(&booking.id, reason, now).await?;

        Ok(BookingOutcome {
            booking: cancelled,
            service_names,
            provider_name,
            changes: Vec::new(),
        })
    }

    /// Display names for stored service ids; raw ids stand in for services
    /// retired from the catalog.
    pub async fn display_names(&self, ids: &[ServiceId]) -> Vec<String> {
        let services = self.catalog.list_services().await.unwrap_or_default();
        ids.iter()
            .map(|id| {
                services
                    .iter()
                    .find(|service| service.id == *id)
                    .map(|service| service.name.clone())
                    .unwrap_or_else(|| id.0.clone())
            })
            .collect()
    }

    async fn resolve_services(&self, names: &[String]) -> Result<Vec<Service>, PipelineError> {
        let mut services = Vec::with_capacity(names.len());
        for name in names {
            let service = self
                .catalog
                .find_service_by_name(name)
                .await
                .map_err(|e| PipelineError::Persistence(e.to_string()))?
                .ok_or_else(|| PipelineError::Validation(replies::unknown_service(name)))?;
            services.push(service);
        }
        if services.is_empty() {
            return Err(PipelineError::Validation(
                "Necesito al menos un servicio para agendar la cita.".to_string(),
            ));
        }
        Ok(services)
    }

    async fn services_by_ids(&self, ids: &[ServiceId]) -> Result<Vec<Service>, PipelineError> {
        let all = self
            .catalog
            .list_services()
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| all.iter().find(|service| service.id == *id).cloned())
            .collect())
    }

    async fn resolve_provider(
        &self,
        provider_name: Option<&str>,
        services: &[Service],
    ) -> Result<Provider, PipelineError> {
        match provider_name {
            Some(name) => {
                let provider = self
                    .catalog
                    .find_provider_by_name(name)
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?
                    .ok_or_else(|| PipelineError::Validation(replies::unknown_provider(name)))?;

                for service in services {
                    if !service.offered_by(&provider.id) {
                        return Err(PipelineError::Validation(format!(
                            "{} no ofrece el servicio '{}'.",
                            provider.name, service.name
                        )));
                    }
                }
                Ok(provider)
            }
            None => {
                let providers = self
                    .catalog
                    .list_providers()
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;
                providers
                    .into_iter()
                    .find(|provider| {
                        services.iter().all(|service| service.offered_by(&provider.id))
                    })
                    .ok_or_else(|| {
                        PipelineError::Validation(
                            "Ningún estilista ofrece esa combinación de servicios.".to_string(),
                        )
                    })
            }
        }
    }

    fn provider_lock(&self, provider_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks =
            self.provider_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(provider_id.to_string()).or_default().clone()
    }

    async fn record_stats(&self, now: DateTime<Utc>, delta: StatsDelta) {
        if let Err(stats_error) = self.stats.record(now.date_naive(), delta).await {
            warn!(error = %stats_error, "failed to record booking stats");
        }
    }
}

fn event_draft(
    booking: &Booking,
    service_names: &[String],
    provider_name: &str,
    slot: TimeSlot,
) -> EventDraft {
    let summary = format!("{} - {}", service_names.join(", "), booking.client_name);
    let mut description = format!(
        "Número de teléfono: {}\nServicios: {}\nPrecio Total: ${}\nEstilista: {}",
        booking.client_phone,
        service_names.join(", "),
        booking.total_price,
        provider_name,
    );
    if let Some(notes) = &booking.notes {
        description.push_str(&format!("\nNotas: {notes}"));
    }
    EventDraft { summary, description, slot }
}
