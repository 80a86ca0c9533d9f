use std::sync::Arc;

use chrono::{DateTime, Utc};

use citabot_core::config::PipelineConfig;
use citabot_core::errors::PipelineError;
use citabot_core::rate::RateDecision;
use citabot_db::repositories::RateLimitStore;

/// Per-sender sliding-window admission control. All state lives in the
/// shared store so every worker sees the same counts; this type only binds
/// the configured capacity and window to the store's atomic claim.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    capacity: u32,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            capacity: config.rate_limit_max_messages,
            window_secs: config.rate_limit_window_secs as i64,
        }
    }

    pub async fn check(
        &self,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, PipelineError> {
        self.store
            .check_and_claim(sender, self.capacity, self.window_secs, now)
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))
    }
}
