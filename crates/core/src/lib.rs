pub mod config;
pub mod domain;
pub mod errors;
pub mod interval;
pub mod rate;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::booking::{Booking, BookingId, BookingStatus};
pub use domain::catalog::{AvailabilityBlock, Provider, ProviderId, Service, ServiceId, Weekday};
pub use domain::conversation::{ControlState, Conversation, ConversationId, PauseReason};
pub use errors::{DomainError, PipelineError};
pub use interval::TimeSlot;
pub use rate::{RateDecision, RateWindow};
