//! Availability breaker for the upstream site.
//!
//! One shared state for the whole process: a single ban signal stops all
//! acquisition traffic until recovery is confirmed.
//!
//! ## States
//!
//! ```text
//! Available → Banned:   ban status code or ban phrase in a page body
//! Banned → Available:   cooldown elapsed AND recovery check returned 200
//! Banned → Banned:      recovery check failed, cooldown re-armed for a full interval
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::models::BanConfig;

/// Current breaker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerState {
    /// Traffic may flow
    Available,
    /// Upstream refused us; no traffic before `until`, then only a recovery check
    Banned { until: Instant, reason: String },
}

/// Circuit breaker guarding every outbound acquisition request.
#[derive(Debug)]
pub struct AvailabilityBreaker {
    state: Mutex<BreakerState>,
    /// Serializes checks so waiters past the cooldown do not all hit upstream
    check_lock: Mutex<()>,
    interval: Duration,
    poll_slice: Duration,
    recheck_sleep: Duration,
}

impl AvailabilityBreaker {
    pub fn new(config: &BanConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::Available),
            check_lock: Mutex::new(()),
            interval: config.interval(),
            poll_slice: Duration::from_secs(config.poll_slice_secs.max(1)),
            recheck_sleep: Duration::from_secs(config.recheck_sleep_secs),
        }
    }

    /// Mark the upstream as banned for one full interval from now.
    pub async fn trip(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("[ban] marked upstream as banned: {}", reason);
        *self.state.lock().await = BreakerState::Banned {
            until: Instant::now() + self.interval,
            reason,
        };
    }

    pub async fn is_banned(&self) -> bool {
        matches!(*self.state.lock().await, BreakerState::Banned { .. })
    }

    /// Reason recorded by the last trip, while banned.
    pub async fn ban_reason(&self) -> Option<String> {
        match &*self.state.lock().await {
            BreakerState::Available => None,
            BreakerState::Banned { reason, .. } => Some(reason.clone()),
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.state.lock().await.clone()
    }

    /// Block until the upstream is available.
    ///
    /// Returns immediately when not banned. Otherwise sleeps in slices until
    /// the cooldown has passed, then runs `check` (which must itself go through
    /// the rate limiter). A successful check clears the ban for every waiter; a
    /// failed one re-arms the cooldown and the wait continues. A trip recorded
    /// while the check was in flight wins over its success.
    pub async fn wait_for_availability<F, Fut>(&self, check: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        loop {
            let retry_at = match self.retry_at().await {
                None => return,
                Some(at) => at,
            };

            let now = Instant::now();
            if now < retry_at {
                sleep((retry_at - now).min(self.poll_slice)).await;
                continue;
            }

            {
                let _checking = self.check_lock.lock().await;

                // Another waiter may have checked while we queued for the lock
                let armed_until = match self.retry_at().await {
                    None => return,
                    Some(at) if Instant::now() < at => continue,
                    Some(at) => at,
                };

                log::info!("[ban] attempting recovery check");
                if check().await {
                    if self.clear_if_unchanged(armed_until).await {
                        log::info!("[ban] recovery check successful, upstream available again");
                        return;
                    }
                    log::warn!("[ban] tripped again during recovery check, keeping ban");
                    continue;
                }
                self.rearm().await;
            }

            sleep(self.recheck_sleep.min(self.interval)).await;
        }
    }

    async fn retry_at(&self) -> Option<Instant> {
        match &*self.state.lock().await {
            BreakerState::Available => None,
            BreakerState::Banned { until, .. } => Some(*until),
        }
    }

    /// Clear the ban only if no trip happened since `armed_until` was read.
    async fn clear_if_unchanged(&self, armed_until: Instant) -> bool {
        let mut state = self.state.lock().await;
        match &*state {
            BreakerState::Banned { until, .. } if *until != armed_until => false,
            _ => {
                *state = BreakerState::Available;
                true
            }
        }
    }

    async fn rearm(&self) {
        let mut state = self.state.lock().await;
        if let BreakerState::Banned { until, .. } = &mut *state {
            *until = Instant::now() + self.interval;
            log::warn!("[ban] recovery check failed, next retry in {:?}", self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn breaker() -> AvailabilityBreaker {
        AvailabilityBreaker::new(&BanConfig::default())
    }

    #[tokio::test]
    async fn test_available_returns_without_check() {
        let breaker = breaker();
        let checks = AtomicUsize::new(0);
        breaker
            .wait_for_availability(|| async {
                checks.fetch_add(1, Ordering::SeqCst);
                true
            })
            .await;
        assert_eq!(checks.load(Ordering::SeqCst), 0);
        assert!(!breaker.is_banned().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_check_only_after_cooldown() {
        let breaker = breaker();
        let tripped_at = Instant::now();
        breaker.trip("status 429").await;
        assert_eq!(breaker.ban_reason().await.as_deref(), Some("status 429"));

        let checked_at = std::sync::Mutex::new(Vec::new());
        breaker
            .wait_for_availability(|| async {
                checked_at.lock().unwrap().push(Instant::now());
                true
            })
            .await;

        let checked_at = checked_at.into_inner().unwrap();
        assert_eq!(checked_at.len(), 1);
        assert!(checked_at[0] - tripped_at >= Duration::from_secs(15 * 60));
        assert!(!breaker.is_banned().await);
        assert_eq!(breaker.ban_reason().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_rearms_full_cooldown() {
        let breaker = breaker();
        breaker.trip("keyword match in html").await;

        let checked_at = std::sync::Mutex::new(Vec::new());
        let attempts = AtomicUsize::new(0);
        breaker
            .wait_for_availability(|| async {
                checked_at.lock().unwrap().push(Instant::now());
                attempts.fetch_add(1, Ordering::SeqCst) > 0
            })
            .await;

        let checked_at = checked_at.into_inner().unwrap();
        assert_eq!(checked_at.len(), 2);
        assert!(checked_at[1] - checked_at[0] >= Duration::from_secs(15 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_waiters_resume_after_one_check() {
        let breaker = Arc::new(breaker());
        breaker.trip("status 403").await;
        let checks = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let breaker = Arc::clone(&breaker);
            let checks = Arc::clone(&checks);
            handles.push(tokio::spawn(async move {
                breaker
                    .wait_for_availability(|| {
                        let checks = Arc::clone(&checks);
                        async move {
                            checks.fetch_add(1, Ordering::SeqCst);
                            true
                        }
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(checks.load(Ordering::SeqCst), 1);
        assert!(!breaker.is_banned().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_during_successful_check_keeps_ban() {
        let breaker = breaker();
        let tripped_at = Instant::now();
        breaker.trip("status 429").await;

        let attempts = AtomicUsize::new(0);
        breaker
            .wait_for_availability(|| async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    // An in-flight request hits a ban while the check succeeds
                    breaker.trip("status 403").await;
                }
                true
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(Instant::now() - tripped_at >= Duration::from_secs(30 * 60));
        assert!(!breaker.is_banned().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_while_banned_extends_cooldown() {
        let breaker = breaker();
        breaker.trip("status 429").await;
        tokio::time::advance(Duration::from_secs(600)).await;
        breaker.trip("status 503").await;

        match breaker.state().await {
            BreakerState::Banned { until, reason } => {
                assert_eq!(reason, "status 503");
                assert!(until - Instant::now() >= Duration::from_secs(15 * 60));
            }
            BreakerState::Available => panic!("expected banned"),
        }
    }
}
