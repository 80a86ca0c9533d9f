use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::info;

use citabot_core::domain::conversation::{ControlState, ConversationId, PauseReason};
use citabot_core::errors::PipelineError;
use citabot_db::repositories::ConversationStore;

struct CachedState {
    state: ControlState,
    cached_at: Instant,
}

/// Tracks whether the bot or a human holds each conversation.
///
/// `is_active` gates every outbound automated message - including the
/// re-check immediately before send - so reads are served from a short-TTL
/// in-process cache with the durable row as fallback. Pause and resume
/// write through and refresh the cache eagerly, which is what closes the
/// pause/in-flight-reply race.
pub struct ConversationGate {
    store: Arc<dyn ConversationStore>,
    cache: Mutex<HashMap<i64, CachedState>>,
    cache_ttl: Duration,
}

impl ConversationGate {
    pub fn new(store: Arc<dyn ConversationStore>, cache_ttl: Duration) -> Self {
        Self { store, cache: Mutex::new(HashMap::new()), cache_ttl }
    }

    pub async fn is_active(&self, id: ConversationId) -> Result<bool, PipelineError> {
        Ok(self.state(id).await?.is_active())
    }

    pub async fn state(&self, id: ConversationId) -> Result<ControlState, PipelineError> {
        if let Some(state) = self.cached(id) {
            return Ok(state);
        }

        let state = self
            .store
            .find(id)
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))?
            .map(|conversation| conversation.state)
            // Unknown conversations default to automated; the record is
            // created on first contact.
            .unwrap_or(ControlState::Automated);

        self.remember(id, state);
        Ok(state)
    }

    /// Apply a pause with the precedence rules of [`ControlState::pause`]:
    /// human takeover may override a keyword pause, never the reverse.
    pub async fn pause(
        &self,
        id: ConversationId,
        reason: PauseReason,
        paused_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ControlState, PipelineError> {
        let current = self.durable_state(id).await?;
        let next = current.pause(reason);

        if next != current {
            self.store
                .set_state(id, next, paused_by, now)
                .await
                .map_err(|error| PipelineError::Persistence(error.to_string()))?;
            info!(
                conversation_id = id.0,
                reason = reason.as_str(),
                paused_by = paused_by.unwrap_or("system"),
                "conversation paused"
            );
        }

        self.remember(id, next);
        Ok(next)
    }

    pub async fn resume(&self, id: ConversationId, now: DateTime<Utc>) -> Result<(), PipelineError> {
        self.store
            .set_state(id, ControlState::Automated, None, now)
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))?;
        self.remember(id, ControlState::Automated);
        info!(conversation_id = id.0, "conversation resumed, bot reactivated");
        Ok(())
    }

    /// Durable read that bypasses the cache; pause precedence must be
    /// evaluated against the source of truth.
    async fn durable_state(&self, id: ConversationId) -> Result<ControlState, PipelineError> {
        Ok(self
            .store
            .find(id)
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))?
            .map(|conversation| conversation.state)
            .unwrap_or(ControlState::Automated))
    }

    fn cached(&self, id: ConversationId) -> Option<ControlState> {
        let cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cache
            .get(&id.0)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.state)
    }

    fn remember(&self, id: ConversationId, state: ControlState) {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.insert(id.0, CachedState { state, cached_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use citabot_core::domain::conversation::{ControlState, ConversationId, PauseReason};
    use citabot_db::repositories::{ConversationStore, InMemoryConversationStore};

    use super::ConversationGate;

    async fn gate_with_conversation(id: i64) -> (ConversationGate, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        store
            .upsert_on_contact(ConversationId(id), "5215512345678", None, Utc::now())
            .await
            .expect("create conversation");
        (ConversationGate::new(store.clone(), Duration::from_secs(30)), store)
    }

    #[tokio::test]
    async fn pause_then_resolve_round_trips() {
        let (gate, _store) = gate_with_conversation(61).await;
        let id = ConversationId(61);

        assert!(gate.is_active(id).await.expect("active"));

        let state = gate
            .pause(id, PauseReason::HumanReply, Some("Agente Sofía"), Utc::now())
            .await
            .expect("pause");
        assert_eq!(state, ControlState::Paused(PauseReason::HumanReply));
        assert!(!gate.is_active(id).await.expect("paused"));

        gate.resume(id, Utc::now()).await.expect("resume");
        assert!(gate.is_active(id).await.expect("active again"));
    }

    #[tokio::test]
    async fn human_reply_overrides_keyword_pause_but_not_vice_versa() {
        let (gate, _store) = gate_with_conversation(62).await;
        let id = ConversationId(62);

        let state =
            gate.pause(id, PauseReason::KeywordMatch, None, Utc::now()).await.expect("pause");
        assert_eq!(state, ControlState::Paused(PauseReason::KeywordMatch));

        let state = gate
            .pause(id, PauseReason::HumanReply, Some("Agente"), Utc::now())
            .await
            .expect("pause");
        assert_eq!(state, ControlState::Paused(PauseReason::HumanReply));

        // Keyword pause arriving later must not displace the human pause.
        let state =
            gate.pause(id, PauseReason::KeywordMatch, None, Utc::now()).await.expect("pause");
        assert_eq!(state, ControlState::Paused(PauseReason::HumanReply));
    }

    #[tokio::test]
    async fn unknown_conversations_default_to_automated() {
        let store = Arc::new(InMemoryConversationStore::new());
        let gate = ConversationGate::new(store, Duration::from_secs(30));
        assert!(gate.is_active(ConversationId(63)).await.expect("default"));
    }

    #[tokio::test]
    async fn pause_invalidates_the_read_cache_eagerly() {
        let (gate, _store) = gate_with_conversation(64).await;
        let id = ConversationId(64);

        // Warm the cache with the active state, then pause through the gate;
        // the next read must see the pause immediately, not after the TTL.
        assert!(gate.is_active(id).await.expect("warm cache"));
        gate.pause(id, PauseReason::HumanReply, None, Utc::now()).await.expect("pause");
        assert!(!gate.is_active(id).await.expect("sees pause"));
    }

    #[tokio::test]
    async fn stale_cache_entries_fall_back_to_the_store() {
        let store = Arc::new(InMemoryConversationStore::new());
        let id = ConversationId(65);
        store.upsert_on_contact(id, "5215512345678", None, Utc::now()).await.expect("create");
        let gate = ConversationGate::new(store.clone(), Duration::from_millis(10));

        assert!(gate.is_active(id).await.expect("warm cache"));

        // Pause behind the gate's back; once the TTL lapses the durable
        // state wins.
        store
            .set_state(id, ControlState::Paused(PauseReason::HumanReply), None, Utc::now())
            .await
            .expect("pause directly");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!gate.is_active(id).await.expect("sees durable state"));
    }
}
