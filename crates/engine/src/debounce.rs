use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

#[async_trait]
pub trait DebounceHandler<K>: Send + Sync {
    async fn fire(&self, key: K);
}

/// Per-key deferred task with reset and cancel, run on the tokio runtime.
///
/// Each `reset` replaces the key's pending timer; when a timer elapses
/// undisturbed its handler fires exactly once. Generation counters make the
/// claim race-free: a timer that lost a reset race while already awake
/// finds a newer generation in the map and stands down instead of
/// double-firing.
pub struct KeyedDebouncer<K> {
    delay: Duration,
    handler: Arc<dyn DebounceHandler<K>>,
    generations: AtomicU64,
    tasks: Mutex<HashMap<K, TaskEntry>>,
}

struct TaskEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

impl<K> KeyedDebouncer<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(delay: Duration, handler: Arc<dyn DebounceHandler<K>>) -> Arc<Self> {
        Arc::new(Self { delay, handler, generations: AtomicU64::new(0), tasks: Mutex::new(HashMap::new()) })
    }

    /// Schedule (or push back) the key's deferred fire to `delay` from now.
    pub fn reset(self: &Arc<Self>, key: K) {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let debouncer = Arc::clone(self);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debouncer.delay).await;

            let claimed = {
                let mut tasks = lock(&debouncer.tasks);
                match tasks.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        tasks.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };

            if claimed {
                debouncer.handler.fire(task_key).await;
            }
        });

        let mut tasks = lock(&self.tasks);
        if let Some(previous) = tasks.insert(key, TaskEntry { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the key's pending timer, if any, without firing.
    pub fn cancel(&self, key: &K) {
        let mut tasks = lock(&self.tasks);
        if let Some(entry) = tasks.remove(key) {
            entry.handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.tasks).len()
    }
}

fn lock<K>(mutex: &Mutex<HashMap<K, TaskEntry>>) -> std::sync::MutexGuard<'_, HashMap<K, TaskEntry>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{DebounceHandler, KeyedDebouncer};

    #[derive(Default)]
    struct RecordingHandler {
        fired: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl DebounceHandler<&'static str> for RecordingHandler {
        async fn fire(&self, key: &'static str) {
            self.fired.lock().await.push(key);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_resets_collapse_into_one_fire() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = KeyedDebouncer::new(Duration::from_secs(3), handler.clone());

        for _ in 0..4 {
            debouncer.reset("conv-1");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(handler.fired.lock().await.is_empty(), "quiet period has not elapsed yet");

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(*handler.fired.lock().await, vec!["conv-1"]);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_the_pending_fire() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = KeyedDebouncer::new(Duration::from_secs(3), handler.clone());

        debouncer.reset("conv-2");
        debouncer.cancel(&"conv-2");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(handler.fired.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_debounce_independently() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = KeyedDebouncer::new(Duration::from_secs(3), handler.clone());

        debouncer.reset("conv-a");
        tokio::time::sleep(Duration::from_secs(2)).await;
        debouncer.reset("conv-b");
        // conv-a has been quiet for 3 s; conv-b only for 1 s.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(*handler.fired.lock().await, vec!["conv-a"]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*handler.fired.lock().await, vec!["conv-a", "conv-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_fire_schedules_a_new_period() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = KeyedDebouncer::new(Duration::from_secs(3), handler.clone());

        debouncer.reset("conv-3");
        tokio::time::sleep(Duration::from_secs(4)).await;
        debouncer.reset("conv-3");
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(*handler.fired.lock().await, vec!["conv-3", "conv-3"]);
    }
}
