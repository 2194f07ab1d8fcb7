//! Sliding-window request budget

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Allows at most `max_requests` acquisitions in any `window`.
///
/// Callers over budget sleep until the oldest acquisition leaves the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let max_requests = (max_requests as usize).max(1);
        Self {
            max_requests,
            window,
            sent: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Wait for a slot and take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
                let now = Instant::now();
                prune(&mut sent, now, self.window);

                if sent.len() < self.max_requests {
                    sent.push_back(now);
                    return;
                }

                match sent.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!("rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
        prune(&mut sent, Instant::now(), self.window);
        self.max_requests - sent.len()
    }
}

fn prune(sent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = sent.front() {
        if now.saturating_duration_since(oldest) >= window {
            sent.pop_front();
        } else {
            break;
        }
    }
}
