use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use citabot_core::interval::TimeSlot;

/// Opaque reference to an event in the external calendar.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot { start: self.start, end: self.end }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    pub slot: TimeSlot,
}

/// Partial update for an existing event; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub slot: Option<TimeSlot>,
}
