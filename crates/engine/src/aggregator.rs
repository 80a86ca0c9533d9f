use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use citabot_chatwoot::events::MessageFragment;
use citabot_core::domain::conversation::ConversationId;

use crate::debounce::{DebounceHandler, KeyedDebouncer};

/// One merged turn, emitted after the sender has been quiet for the
/// grouping delay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingFlush {
    pub conversation_id: ConversationId,
    pub client_phone: String,
    pub client_name: Option<String>,
    pub text: String,
    pub fragment_count: usize,
    pub first_enqueued_at: DateTime<Utc>,
}

#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn flush(&self, turn: PendingFlush);
}

struct PendingTurn {
    client_phone: String,
    client_name: Option<String>,
    fragments: Vec<String>,
    first_enqueued_at: DateTime<Utc>,
}

struct AggregatorInner {
    pending: Mutex<HashMap<i64, PendingTurn>>,
    sink: Arc<dyn FlushSink>,
}

#[async_trait]
impl DebounceHandler<ConversationId> for AggregatorInner {
    async fn fire(&self, key: ConversationId) {
        let turn = {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.remove(&key.0)
        };

        let Some(turn) = turn else {
            return;
        };

        self.sink
            .flush(PendingFlush {
                conversation_id: key,
                client_phone: turn.client_phone,
                client_name: turn.client_name,
                // Fragments merge in arrival order; a single space keeps the
                // original segmentation visible without inventing structure.
                text: turn.fragments.join(" "),
                fragment_count: turn.fragments.len(),
                first_enqueued_at: turn.first_enqueued_at,
            })
            .await;
    }
}

/// Merges rapid successive fragments from one conversation into one logical
/// turn. Each enqueue pushes the conversation's flush timer back to the full
/// grouping delay; the flush drains the buffer exactly once. Conversations
/// never share buffers, so senders cannot interleave.
pub struct MessageAggregator {
    inner: Arc<AggregatorInner>,
    debouncer: Arc<KeyedDebouncer<ConversationId>>,
}

impl MessageAggregator {
    pub fn new(delay: Duration, sink: Arc<dyn FlushSink>) -> Self {
        let inner = Arc::new(AggregatorInner { pending: Mutex::new(HashMap::new()), sink });
        let handler: Arc<dyn DebounceHandler<ConversationId>> = inner.clone();
        let debouncer = KeyedDebouncer::new(delay, handler);
        Self { inner, debouncer }
    }

    pub fn enqueue(&self, fragment: &MessageFragment, now: DateTime<Utc>) {
        {
            let mut pending =
                self.inner.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let turn = pending.entry(fragment.conversation_id.0).or_insert_with(|| PendingTurn {
                client_phone: fragment.client_phone.clone(),
                client_name: fragment.client_name.clone(),
                fragments: Vec::new(),
                first_enqueued_at: now,
            });
            if turn.client_name.is_none() {
                turn.client_name = fragment.client_name.clone();
            }
            turn.fragments.push(fragment.content.clone());
        }

        self.debouncer.reset(fragment.conversation_id);
    }

    pub fn pending_conversations(&self) -> usize {
        self.inner.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
