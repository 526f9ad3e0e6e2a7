//! Rolling-window limiter for outbound requests.
//!
//! Every request to the upstream, recovery checks included, takes one slot. A slot is
//! held until its timestamp leaves the window; nothing is ever given back early.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::models::RateLimitConfig;

/// Shared limiter allowing at most `max_requests` per trailing `window`.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    sleep_slice: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests.max(1),
            window: Duration::from_secs(config.window_secs),
            sleep_slice: Duration::from_millis(config.sleep_slice_ms),
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until one more request fits in the window, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait_for = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                self.prune(&mut requests, now);

                if requests.len() < self.max_requests {
                    requests.push_back(now);
                    return;
                }

                match requests.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            log::debug!("[rate] quota exhausted, next slot in {:?}", wait_for);
            sleep(wait_for.max(self.sleep_slice).min(self.window)).await;
        }
    }

    /// Requests recorded in the current window.
    pub async fn in_window(&self) -> usize {
        let mut requests = self.requests.lock().await;
        self.prune(&mut requests, Instant::now());
        requests.len()
    }

    fn prune(&self, requests: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = requests.front() {
            if now.duration_since(*oldest) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}
