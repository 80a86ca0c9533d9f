//! Chatwoot integration - the messaging-platform boundary.
//!
//! This crate owns everything that touches the helpdesk wire format:
//! - **Payloads** (`payload`) - serde model of the webhook JSON
//! - **Events** (`events`) - lowering raw webhooks into the closed
//!   [`InboundEvent`] set the pipeline consumes
//! - **Signature** (`signature`) - HMAC-SHA256 webhook verification
//! - **Client** (`client`) - outbound replies through the Chatwoot REST API
//! - **Dedupe** (`dedupe`) - at-least-once webhook delivery protection
//!
//! Nothing here decides anything; classification and transport only.

pub mod client;
pub mod dedupe;
pub mod events;
pub mod payload;
pub mod signature;

pub use client::{ChatClient, ChatError, HttpChatClient, NoopChatClient};
pub use dedupe::DedupeCache;
pub use events::{classify, ConversationStatus, IgnoreReason, InboundEvent, MessageFragment};
pub use payload::WebhookPayload;
pub use signature::verify_signature;
