//! Decision-maker boundary - the language model as a constrained translator.
//!
//! The external LLM collaborator receives one merged turn plus rolling
//! conversation context and must answer with exactly one command from a
//! closed set. This crate owns:
//! - **Commands** (`command`) - the closed [`AgentCommand`] enum and strict
//!   JSON parsing; anything unknown or malformed is a parse error, never a
//!   crash
//! - **Decisions** (`decision`) - the [`DecisionMaker`] trait, an LLM-backed
//!   implementation with bounded retries, and a scripted test double
//! - **Context** (`context`) - the rolling per-conversation history window
//! - **Replies** (`replies`) - Spanish client-facing reply formatting
//!
//! # Safety principle
//!
//! The LLM never decides prices, durations or slot ownership. It only names
//! a command; the booking engine validates and executes deterministically.

pub mod command;
pub mod context;
pub mod decision;
pub mod llm;
pub mod replies;

pub use command::{
    AgentCommand, CancelBookingArgs, CheckAvailabilityArgs, CommandParseError, CreateBookingArgs,
    UpdateBookingArgs,
};
pub use context::{ContextBuffer, ContextEntry, Speaker};
pub use decision::{
    DecisionError, DecisionMaker, LlmClient, LlmDecisionMaker, MergedTurn, ScriptedDecisionMaker,
};
pub use llm::HttpLlmClient;
