use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// At most `calls` events inside any window of `period`. A GCRA limiter such as
/// `governor` spreads calls evenly instead, so it cannot express this bound.
#[derive(Debug)]
pub struct SlidingWindow {
    calls: usize,
    period: Duration,
    recent: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            calls,
            period,
            recent: VecDeque::with_capacity(calls),
        }
    }

    /// How long a call arriving at `now` has to wait. Zero means it may go ahead.
    pub fn delay_at(&mut self, now: Instant) -> Duration {
        if self.calls == 0 || self.period.is_zero() {
            return Duration::ZERO;
        }
        while let Some(oldest) = self.recent.front() {
            if now.saturating_duration_since(*oldest) >= self.period {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() < self.calls {
            return Duration::ZERO;
        }
        match self.recent.front() {
            Some(oldest) => (*oldest + self.period).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn record(&mut self, at: Instant) {
        if self.calls == 0 {
            return;
        }
        self.recent.push_back(at);
        while self.recent.len() > self.calls {
            self.recent.pop_front();
        }
    }
}

/// Blocking limiter; clones share one window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Arc<Mutex<SlidingWindow>>,
}

impl RateLimiter {
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            window: Arc::new(Mutex::new(SlidingWindow::new(calls, period))),
        }
    }

    /// Blocks the calling thread until one more call fits in the window, then claims it.
    pub fn wait(&self) {
        loop {
            let delay = {
                let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                let delay = window.delay_at(now);
                if delay.is_zero() {
                    window.record(now);
                    return;
                }
                delay
            };
            tracing::debug!(delay_ms = delay.as_millis() as u64, "rate limit reached; sleeping");
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_allows_calls_up_to_the_limit() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_secs(10));

        assert_eq!(window.delay_at(start), Duration::ZERO);
        window.record(start);
        assert_eq!(window.delay_at(start), Duration::ZERO);
        window.record(start + Duration::from_secs(1));

        let third = start + Duration::from_secs(2);
        assert_eq!(window.delay_at(third), Duration::from_secs(8));
    }

    #[test]
    fn window_slides_past_old_calls() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(1, Duration::from_secs(5));
        window.record(start);
        assert_eq!(
            window.delay_at(start + Duration::from_secs(3)),
            Duration::from_secs(2)
        );
        assert_eq!(
            window.delay_at(start + Duration::from_secs(5)),
            Duration::ZERO
        );
    }

    #[test]
    fn zero_calls_disables_limiting() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(0, Duration::from_secs(5));
        window.record(start);
        window.record(start);
        assert_eq!(window.delay_at(start), Duration::ZERO);
    }

    #[test]
    fn limiter_blocks_until_the_window_has_room() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait();
        limiter.clone().wait();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
