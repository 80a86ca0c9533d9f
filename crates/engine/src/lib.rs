//! Conversation control plane + booking consistency engine.
//!
//! The pieces compose per inbound event:
//!
//! ```text
//! webhook event → RateLimiter → ConversationGate → MessageAggregator
//!                                                        │ (3 s quiet)
//!                                                 merged turn
//!                                                        │
//!                                       DecisionMaker (external LLM)
//!                                                        │
//!                            BookingEngine ←→ AvailabilityOracle
//!                                                        │
//!                                  gate re-check → send_reply
//! ```
//!
//! Invariants owned here: per-provider bookings never overlap (enforced by
//! check-and-commit storage writes plus a per-provider lock), a sender's
//! admitted-message count never exceeds the window capacity, a pending turn
//! flushes at most once, and no automated reply leaves while a human holds
//! the conversation.

pub mod aggregator;
pub mod availability;
pub mod booking;
pub mod debounce;
pub mod gate;
pub mod orchestrator;
pub mod rate_limiter;

pub use aggregator::{FlushSink, MessageAggregator, PendingFlush};
pub use availability::{Availability, AvailabilityOracle, ExcludedInterval, Freshness};
pub use booking::{BookingChanges, BookingEngine, BookingOutcome, CreateBookingRequest};
pub use debounce::{DebounceHandler, KeyedDebouncer};
pub use gate::ConversationGate;
pub use orchestrator::{EventDisposition, Orchestrator, PipelineDeps};
pub use rate_limiter::RateLimiter;
