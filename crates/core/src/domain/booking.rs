use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{ProviderId, ServiceId};
use crate::errors::DomainError;
use crate::interval::TimeSlot;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Active bookings participate in the per-provider non-overlap invariant.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

/// An appointment. Cancelled bookings are terminal but never deleted; they
/// are retained for audit and reporting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_phone: String,
    pub client_name: String,
    pub provider_id: ProviderId,
    pub services: Vec<ServiceId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_price: Decimal,
    pub external_event_ref: Option<String>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot { start: self.start, end: self.end }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self.status, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: BookingStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidBookingTransition { from: self.status, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use crate::domain::catalog::{ProviderId, ServiceId};

    use super::{Booking, BookingId, BookingStatus};

    fn booking(status: BookingStatus) -> Booking {
        let start = Utc::now() + Duration::days(1);
        Booking {
            id: BookingId::generate(),
            client_phone: "5215512345678".to_string(),
            client_name: "Mariana López".to_string(),
            provider_id: ProviderId("prov-ana".to_string()),
            services: vec![ServiceId("corte".to_string())],
            start,
            end: start + Duration::minutes(60),
            total_price: Decimal::new(35_000, 2),
            external_event_ref: None,
            status,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pending_confirms_once_the_external_event_exists() {
        let mut booking = booking(BookingStatus::Pending);
        booking.transition_to(BookingStatus::Confirmed).expect("pending -> confirmed");
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut booking = booking(BookingStatus::Cancelled);
        let error = booking
            .transition_to(BookingStatus::Confirmed)
            .expect_err("cancelled -> confirmed should fail");
        assert!(matches!(error, crate::errors::DomainError::InvalidBookingTransition { .. }));
    }

    #[test]
    fn confirmed_cannot_regress_to_pending() {
        let booking = booking(BookingStatus::Confirmed);
        assert!(!booking.can_transition_to(BookingStatus::Pending));
        assert!(booking.can_transition_to(BookingStatus::Cancelled));
    }

    #[test]
    fn only_pending_and_confirmed_count_as_active() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
    }

    #[test]
    fn status_round_trips_through_storage_strings() {
        for status in [BookingStatus::Pending, BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("no_asistio"), None);
    }
}
