use std::{collections::HashMap, sync::Mutex};
use tokio::time::{Duration, Instant};

pub const QUOTA_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    started: Instant,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            started: now,
        }
    }
}

/// in-memory hourly send counter per sender address
#[derive(Debug)]
pub struct HourlyQuota {
    cap: u32,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub retry_after: Duration,
}

impl HourlyQuota {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    fn with_window<T>(&self, sender: &str, f: impl FnOnce(&mut Window, Instant) -> T) -> T {
        let now = Instant::now();
        let key = sender.to_ascii_lowercase();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = windows.entry(key).or_insert_with(|| Window::fresh(now));

        if now.duration_since(window.started) >= QUOTA_WINDOW {
            *window = Window::fresh(now);
        }

        f(window, now)
    }

    /// count one send against `sender`, fails once the cap is reached
    pub fn try_reserve(&self, sender: &str) -> Result<(), QuotaExceeded> {
        let cap = self.cap;

        self.with_window(sender, |window, now| {
            if window.count >= cap {
                Err(QuotaExceeded {
                    retry_after: QUOTA_WINDOW.saturating_sub(now.duration_since(window.started)),
                })
            } else {
                window.count += 1;
                Ok(())
            }
        })
    }

    /// give back a reservation whose message was never delivered
    pub fn release(&self, sender: &str) {
        self.with_window(sender, |window, _| {
            window.count = window.count.saturating_sub(1);
        });
    }

    pub fn remaining(&self, sender: &str) -> u32 {
        let cap = self.cap;

        self.with_window(sender, |window, _| cap.saturating_sub(window.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cap_is_enforced_then_reset() {
        let quota = HourlyQuota::new(2);

        assert!(quota.try_reserve("a@example.org").is_ok());
        assert!(quota.try_reserve("a@example.org").is_ok());
        assert_eq!(quota.remaining("a@example.org"), 0);

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        let exceeded = quota.try_reserve("a@example.org").unwrap_err();
        assert_eq!(exceeded.retry_after, Duration::from_secs(50 * 60));

        tokio::time::advance(Duration::from_secs(50 * 60)).await;
        assert_eq!(quota.remaining("a@example.org"), 2);
        assert!(quota.try_reserve("a@example.org").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn senders_are_counted_separately() {
        let quota = HourlyQuota::new(1);

        assert!(quota.try_reserve("a@example.org").is_ok());
        assert!(quota.try_reserve("A@Example.org").is_err());
        assert!(quota.try_reserve("b@example.org").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn release_returns_a_slot() {
        let quota = HourlyQuota::new(1);

        assert!(quota.try_reserve("a@example.org").is_ok());
        quota.release("a@example.org");
        assert_eq!(quota.remaining("a@example.org"), 1);

        // releasing an untouched window never underflows
        quota.release("c@example.org");
        assert_eq!(quota.remaining("c@example.org"), 1);
    }
}
