use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    HumanReply,
    KeywordMatch,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HumanReply => "human_reply",
            Self::KeywordMatch => "keyword_match",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "human_reply" => Some(Self::HumanReply),
            "keyword_match" => Some(Self::KeywordMatch),
            _ => None,
        }
    }
}

/// Who is allowed to reply in a conversation. The pause reason lives inside
/// the variant, so `PAUSED ⇔ reason present` holds by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Automated,
    Paused(PauseReason),
}

impl ControlState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Automated)
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        match self {
            Self::Automated => None,
            Self::Paused(reason) => Some(*reason),
        }
    }

    /// Apply a pause request. Re-pausing keeps the existing reason, except
    /// that an explicit human reply overrides a keyword pause; a keyword
    /// match never displaces a human pause.
    pub fn pause(&self, reason: PauseReason) -> ControlState {
        match (self, reason) {
            (Self::Paused(PauseReason::HumanReply), _) => Self::Paused(PauseReason::HumanReply),
            (Self::Paused(PauseReason::KeywordMatch), PauseReason::HumanReply) => {
                Self::Paused(PauseReason::HumanReply)
            }
            (Self::Paused(existing), PauseReason::KeywordMatch) => Self::Paused(*existing),
            (Self::Automated, reason) => Self::Paused(reason),
        }
    }

    pub fn resume(&self) -> ControlState {
        Self::Automated
    }
}

/// Tracking record for one helpdesk conversation. Created on first contact,
/// transitioned but never deleted.
#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub client_phone: String,
    pub client_name: Option<String>,
    pub state: ControlState,
    pub paused_by: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, client_phone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            client_phone: client_phone.into(),
            client_name: None,
            state: ControlState::Automated,
            paused_by: None,
            paused_at: None,
            last_message_at: Some(now),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlState, PauseReason};

    #[test]
    fn automated_pauses_for_either_reason() {
        let state = ControlState::Automated;
        assert_eq!(
            state.pause(PauseReason::HumanReply),
            ControlState::Paused(PauseReason::HumanReply)
        );
        assert_eq!(
            state.pause(PauseReason::KeywordMatch),
            ControlState::Paused(PauseReason::KeywordMatch)
        );
    }

    #[test]
    fn human_reply_overrides_keyword_pause() {
        let state = ControlState::Paused(PauseReason::KeywordMatch);
        assert_eq!(
            state.pause(PauseReason::HumanReply),
            ControlState::Paused(PauseReason::HumanReply)
        );
    }

    #[test]
    fn keyword_never_displaces_a_human_pause() {
        let state = ControlState::Paused(PauseReason::HumanReply);
        assert_eq!(
            state.pause(PauseReason::KeywordMatch),
            ControlState::Paused(PauseReason::HumanReply)
        );
    }

    #[test]
    fn repausing_keeps_the_existing_reason() {
        let state = ControlState::Paused(PauseReason::KeywordMatch);
        assert_eq!(
            state.pause(PauseReason::KeywordMatch),
            ControlState::Paused(PauseReason::KeywordMatch)
        );
    }

    #[test]
    fn resume_always_returns_control_to_the_bot() {
        assert_eq!(ControlState::Paused(PauseReason::HumanReply).resume(), ControlState::Automated);
        assert_eq!(ControlState::Automated.resume(), ControlState::Automated);
        assert!(ControlState::Automated.is_active());
        assert_eq!(ControlState::Automated.pause_reason(), None);
    }
}
