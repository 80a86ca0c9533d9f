use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Half-open time interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        if start >= end {
            return Err(DomainError::EmptySlot { start, end });
        }
        Ok(Self { start, end })
    }

    /// Two half-open intervals conflict iff `s1 < e2 && s2 < e1`.
    /// Back-to-back slots (one ending exactly where the other starts) do not.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::TimeSlot;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn slot(start: &str, end: &str) -> TimeSlot {
        TimeSlot::new(ts(start), ts(end)).expect("valid slot")
    }

    #[test]
    fn rejects_empty_and_inverted_slots() {
        assert!(TimeSlot::new(ts("2026-03-10T10:00:00Z"), ts("2026-03-10T10:00:00Z")).is_err());
        assert!(TimeSlot::new(ts("2026-03-10T11:00:00Z"), ts("2026-03-10T10:00:00Z")).is_err());
    }

    #[test]
    fn detects_partial_and_contained_overlap() {
        let base = slot("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z");
        assert!(base.overlaps(&slot("2026-03-10T10:30:00Z", "2026-03-10T11:30:00Z")));
        assert!(base.overlaps(&slot("2026-03-10T09:30:00Z", "2026-03-10T10:30:00Z")));
        assert!(base.overlaps(&slot("2026-03-10T10:15:00Z", "2026-03-10T10:45:00Z")));
        assert!(base.overlaps(&slot("2026-03-10T09:00:00Z", "2026-03-10T12:00:00Z")));
    }

    #[test]
    fn back_to_back_slots_do_not_overlap() {
        let first = slot("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z");
        let second = slot("2026-03-10T11:00:00Z", "2026-03-10T12:00:00Z");
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
    }

    #[test]
    fn duration_is_reported_in_minutes() {
        assert_eq!(slot("2026-03-10T10:00:00Z", "2026-03-10T11:30:00Z").duration_minutes(), 90);
    }
}
