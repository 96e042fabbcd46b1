//! Client-side pacing against the provider's per-minute and per-day quotas.
//!
//! Requests that fit the current window run immediately. Everything else
//! waits its turn on a fair (FIFO) async mutex; the holder of that mutex is
//! the only task draining the queue, re-checking the window after every
//! sleep so the per-minute bound holds even when timers fire early or late.

use crate::clock::{self, Clock};
use crate::error::{ApiError, ApiResult};
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const MINUTE: Duration = Duration::from_secs(60);
/// Timestamps older than this are dropped from the window.
const RETENTION: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // One under the documented 60/min.
        Self {
            requests_per_minute: 59,
            requests_per_day: 2000,
        }
    }
}

impl RateLimitConfig {
    /// Gap enforced between requests released from the queue.
    pub fn spacing(&self) -> Duration {
        MINUTE / self.requests_per_minute.max(1)
    }
}

#[derive(Debug)]
enum Admission {
    Granted,
    Wait(Duration),
    Exhausted,
}

#[derive(Debug)]
struct QuotaWindow {
    recent: VecDeque<Instant>,
    day: Option<NaiveDate>,
    day_count: u32,
    waiting: usize,
}

impl QuotaWindow {
    fn new() -> Self {
        Self {
            recent: VecDeque::new(),
            day: None,
            day_count: 0,
            waiting: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) >= RETENTION {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_minute(&self, now: Instant) -> usize {
        self.recent
            .iter()
            .filter(|ts| now.duration_since(**ts) < MINUTE)
            .count()
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_count = 0;
        }
    }

    fn try_admit(
        &mut self,
        config: &RateLimitConfig,
        now: Instant,
        today: NaiveDate,
        paced: bool,
    ) -> Admission {
        self.prune(now);
        self.roll_day(today);

        if self.day_count >= config.requests_per_day {
            return Admission::Exhausted;
        }

        let mut wait = Duration::ZERO;
        if self.in_minute(now) >= config.requests_per_minute as usize {
            // Oldest timestamp still inside the window decides when a slot opens.
            if let Some(oldest) = self
                .recent
                .iter()
                .find(|ts| now.duration_since(**ts) < MINUTE)
            {
                wait = (*oldest + MINUTE).saturating_duration_since(now);
            }
            // Window is full but every entry sits exactly on the edge; yield briefly.
            if wait.is_zero() {
                wait = Duration::from_millis(1);
            }
        }
        if paced {
            if let Some(last) = self.recent.back() {
                wait = wait.max((*last + config.spacing()).saturating_duration_since(now));
            }
        }

        if wait.is_zero() {
            self.recent.push_back(now);
            self.day_count += 1;
            Admission::Granted
        } else {
            Admission::Wait(wait)
        }
    }
}

/// Decrements the waiting count even if the queued future is dropped.
struct WaitingGuard<'a> {
    window: &'a Mutex<QuotaWindow>,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.waiting = window.waiting.saturating_sub(1);
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<QuotaWindow>,
    turn: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            window: Mutex::new(QuotaWindow::new()),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Runs `request` once the quota allows it and hands back its outcome.
    ///
    /// Fails with [`ApiError::QuotaExhausted`] without running `request` when
    /// today's cap is used up.
    pub async fn execute_request<F, Fut, T>(&self, request: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.acquire().await?;
        request().await
    }

    /// Waits for a slot and records it.
    pub async fn acquire(&self) -> ApiResult<()> {
        {
            let mut window = self.lock_window();
            if window.waiting == 0 {
                match window.try_admit(&self.config, Instant::now(), self.today(), false) {
                    Admission::Granted => return Ok(()),
                    Admission::Exhausted => return Err(self.exhausted()),
                    Admission::Wait(_) => {}
                }
            }
            window.waiting += 1;
        }
        let _waiting = WaitingGuard {
            window: &self.window,
        };

        let _turn = self.turn.lock().await;
        loop {
            let admission = {
                let mut window = self.lock_window();
                window.try_admit(&self.config, Instant::now(), self.today(), true)
            };
            match admission {
                Admission::Granted => return Ok(()),
                Admission::Exhausted => return Err(self.exhausted()),
                Admission::Wait(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "rate limiter delaying queued request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Requests recorded in the trailing minute.
    pub fn request_count(&self) -> usize {
        let mut window = self.lock_window();
        let now = Instant::now();
        window.prune(now);
        window.in_minute(now)
    }

    /// Requests recorded since the start of the current UTC day.
    pub fn requests_today(&self) -> u32 {
        let mut window = self.lock_window();
        window.roll_day(self.today());
        window.day_count
    }

    pub fn queued(&self) -> usize {
        self.lock_window().waiting
    }

    /// Forgets every recorded request. Queued callers keep their place.
    pub fn reset(&self) {
        let mut window = self.lock_window();
        window.recent.clear();
        window.day_count = 0;
    }

    fn exhausted(&self) -> ApiError {
        warn!(limit = self.config.requests_per_day, "daily request quota exhausted");
        ApiError::QuotaExhausted {
            limit: self.config.requests_per_day,
        }
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, QuotaWindow> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }
}
