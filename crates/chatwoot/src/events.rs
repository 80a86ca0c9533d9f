use chrono::{DateTime, Utc};
use serde_json::Value;

use citabot_core::domain::conversation::ConversationId;

use crate::payload::WebhookPayload;

/// The closed set of pipeline-relevant happenings a webhook can carry.
/// Everything else lowers to `Ignored` with a reason for the logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    MessageFragment(MessageFragment),
    HumanAgentReplied { conversation_id: ConversationId, agent_name: Option<String> },
    ConversationCreated {
        conversation_id: ConversationId,
        client_phone: String,
        client_name: Option<String>,
    },
    StatusChanged { conversation_id: ConversationId, status: ConversationStatus },
    Ignored { reason: IgnoreReason },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageFragment {
    pub conversation_id: ConversationId,
    pub message_id: Option<i64>,
    pub client_phone: String,
    pub client_name: Option<String>,
    pub content: String,
    /// Opaque media references (audio, images). Transcription and
    /// description happen in an external collaborator, not here.
    pub attachment_refs: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationStatus {
    Open,
    Resolved,
    Pending,
    Snoozed,
    Unknown,
}

impl ConversationStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "open" => Self::Open,
            "resolved" => Self::Resolved,
            "pending" => Self::Pending,
            "snoozed" => Self::Snoozed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedEvent(String),
    NotIncoming,
    PrivateNote,
    NoConversation,
    NoContent,
    NoStatus,
}

/// Lower a raw webhook into an [`InboundEvent`]. Never fails: payloads that
/// do not concern the pipeline come back as `Ignored`.
pub fn classify(payload: &WebhookPayload) -> InboundEvent {
    match payload.event.as_deref() {
        Some("message_created") => classify_message(payload),
        Some("conversation_created") => classify_conversation_created(payload),
        Some("conversation_status_changed") => classify_status_changed(payload),
        Some(other) => InboundEvent::Ignored { reason: IgnoreReason::UnsupportedEvent(other.to_string()) },
        None => InboundEvent::Ignored { reason: IgnoreReason::UnsupportedEvent("missing".to_string()) },
    }
}

fn classify_message(payload: &WebhookPayload) -> InboundEvent {
    if payload.private.unwrap_or(false) {
        return InboundEvent::Ignored { reason: IgnoreReason::PrivateNote };
    }

    let Some(conversation) = &payload.conversation else {
        return InboundEvent::Ignored { reason: IgnoreReason::NoConversation };
    };
    let conversation_id = ConversationId(conversation.id);

    // A message authored by a helpdesk user is a human agent taking over,
    // regardless of message direction.
    if let Some(sender) = &payload.sender {
        if sender.sender_type.as_deref() == Some("user") {
            return InboundEvent::HumanAgentReplied {
                conversation_id,
                agent_name: sender.name.clone(),
            };
        }
    }

    if payload.message_type.as_deref() != Some("incoming") {
        return InboundEvent::Ignored { reason: IgnoreReason::NotIncoming };
    }

    let content = payload.content.as_deref().unwrap_or("").trim().to_string();
    let attachment_refs: Vec<String> = payload
        .attachments
        .iter()
        .flatten()
        .filter_map(|attachment| attachment.data_url.clone())
        .collect();

    if content.is_empty() && attachment_refs.is_empty() {
        return InboundEvent::Ignored { reason: IgnoreReason::NoContent };
    }

    let client_phone = conversation
        .client_phone()
        .unwrap_or_else(|| format!("unknown_{}", conversation.id));

    InboundEvent::MessageFragment(MessageFragment {
        conversation_id,
        message_id: payload.id,
        client_phone,
        client_name: conversation.client_name(),
        content,
        attachment_refs,
        timestamp: parse_created_at(payload.created_at.as_ref()),
    })
}

fn classify_conversation_created(payload: &WebhookPayload) -> InboundEvent {
    let Some(conversation) = &payload.conversation else {
        return InboundEvent::Ignored { reason: IgnoreReason::NoConversation };
    };

    let client_phone = conversation
        .client_phone()
        .unwrap_or_else(|| format!("unknown_{}", conversation.id));

    InboundEvent::ConversationCreated {
        conversation_id: ConversationId(conversation.id),
        client_phone,
        client_name: conversation.client_name(),
    }
}

fn classify_status_changed(payload: &WebhookPayload) -> InboundEvent {
    let Some(conversation) = &payload.conversation else {
        return InboundEvent::Ignored { reason: IgnoreReason::NoConversation };
    };

    let status = payload
        .status
        .as_deref()
        .or(conversation.status.as_deref())
        .map(ConversationStatus::parse);

    match status {
        Some(status) => InboundEvent::StatusChanged {
            conversation_id: ConversationId(conversation.id),
            status,
        },
        None => InboundEvent::Ignored { reason: IgnoreReason::NoStatus },
    }
}

/// Chatwoot sends `created_at` as either epoch seconds or an ISO string
/// depending on the event; accept both.
fn parse_created_at(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(number) => {
            let seconds = number.as_i64()?;
            DateTime::from_timestamp(seconds, 0)
        }
        Value::String(raw) => {
            DateTime::parse_from_rfc3339(raw).ok().map(|parsed| parsed.with_timezone(&Utc))
        }
        _ => None,
    }
}
