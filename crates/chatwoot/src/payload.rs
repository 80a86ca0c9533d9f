use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Raw Chatwoot webhook body. Almost everything is optional on the wire;
/// [`crate::events::classify`] is responsible for deciding what a payload
/// actually means.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub sender: Option<WebhookSender>,
    #[serde(default)]
    pub attachments: Option<Vec<WebhookAttachment>>,
    #[serde(default)]
    pub conversation: Option<WebhookConversation>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookSender {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// "contact" for clients, "user" for human agents.
    #[serde(default, rename = "type")]
    pub sender_type: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookContact {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookConversation {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub contact: Option<WebhookContact>,
    #[serde(default)]
    pub meta: Option<HashMap<String, Value>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookAttachment {
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub data_url: Option<String>,
}

impl WebhookConversation {
    /// Phone resolution order: contact record, contact identifier, then the
    /// `meta.sender` blob some inboxes populate instead.
    pub fn client_phone(&self) -> Option<String> {
        if let Some(contact) = &self.contact {
            if let Some(phone) = contact.phone_number.as_deref().filter(|p| !p.is_empty()) {
                return Some(phone.to_string());
            }
            if let Some(identifier) = contact.identifier.as_deref().filter(|i| !i.is_empty()) {
                return Some(identifier.to_string());
            }
        }

        self.meta
            .as_ref()
            .and_then(|meta| meta.get("sender"))
            .and_then(|sender| sender.get("phone_number"))
            .and_then(Value::as_str)
            .filter(|phone| !phone.is_empty())
            .map(str::to_owned)
    }

    pub fn client_name(&self) -> Option<String> {
        self.contact
            .as_ref()
            .and_then(|contact| contact.name.as_deref())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
    }
}
