//! Request pacing for third-party quota compliance.
//!
//! Every outbound call (submit, poll, download) goes through one shared
//! [`Pacer`], which keeps at least `min_gap` between consecutive calls
//! across all holders of the same pacer.
//!
//! The gap applies per operation, not per HTTP request: a ComfyUI poll
//! (`/queue` then `/history`) or submit (upload then `/prompt`) is paced
//! once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default gap between consecutive backend calls.
pub const DEFAULT_REQUEST_GAP: Duration = Duration::from_secs(3);

/// Shared minimum-gap limiter. Cloning shares the schedule.
#[derive(Debug, Clone)]
pub struct Pacer {
    min_gap: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_GAP)
    }
}

impl Pacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// A pacer that never waits.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_gap;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
