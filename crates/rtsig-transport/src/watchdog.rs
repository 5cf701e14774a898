//! Resettable single-shot timer

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// A one-shot timer that can be armed, re-armed and disarmed
///
/// Meant to be polled from a `select!` loop: [`Watchdog::expired`] stays
/// pending while disarmed, and disarms the watchdog when it fires.
#[derive(Debug, Default)]
pub struct Watchdog {
    timeout: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm with a new timeout, replacing any pending deadline
    pub fn enable(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
        self.sleep = Some(Box::pin(tokio::time::sleep(timeout)));
    }

    /// Re-arm with the last timeout given to [`Watchdog::enable`]
    pub fn reset(&mut self) {
        if let Some(timeout) = self.timeout {
            match self.sleep.as_mut() {
                Some(sleep) => sleep.as_mut().reset(Instant::now() + timeout),
                None => self.sleep = Some(Box::pin(tokio::time::sleep(timeout))),
            }
        }
    }

    pub fn disable(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves when the armed deadline passes
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let mut watchdog = Watchdog::new();
        watchdog.enable(Duration::from_secs(5));
        assert!(watchdog.is_armed());

        let start = Instant::now();
        watchdog.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!watchdog.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_fires() {
        let mut watchdog = Watchdog::new();
        watchdog.enable(Duration::from_millis(100));
        watchdog.disable();

        let fired = tokio::time::timeout(Duration::from_secs(10), watchdog.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_pushes_deadline() {
        let mut watchdog = Watchdog::new();
        watchdog.enable(Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(800)).await;
        watchdog.reset();

        let start = Instant::now();
        watchdog.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rearms_after_fire() {
        let mut watchdog = Watchdog::new();
        watchdog.enable(Duration::from_millis(50));
        watchdog.expired().await;
        assert!(!watchdog.is_armed());

        watchdog.reset();
        assert!(watchdog.is_armed());
    }

    #[test]
    fn test_reset_without_enable_is_noop() {
        let mut watchdog = Watchdog::new();
        watchdog.reset();
        assert!(!watchdog.is_armed());
    }
}
