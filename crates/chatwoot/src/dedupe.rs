use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use citabot_core::domain::conversation::ConversationId;

/// Bounded first-seen set for webhook deliveries. The platform delivers
/// at-least-once, so a redelivered message must not re-enter the pipeline.
/// Keys are (conversation, message id) with the message timestamp standing
/// in when an inbox omits ids. FIFO eviction keeps memory flat.
pub struct DedupeCache {
    capacity: usize,
    inner: Mutex<DedupeState>,
}

#[derive(Default)]
struct DedupeState {
    seen: HashSet<(i64, i64)>,
    order: VecDeque<(i64, i64)>,
}

impl DedupeCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(DedupeState::default()) }
    }

    /// Returns true the first time a key is seen, false on redelivery.
    pub fn first_seen(&self, conversation_id: ConversationId, message_key: i64) -> bool {
        let key = (conversation_id.0, message_key);
        let mut state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !state.seen.insert(key) {
            return false;
        }

        state.order.push_back(key);
        if state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.seen.remove(&evicted);
            }
        }
        true
    }
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(4_096)
    }
}
