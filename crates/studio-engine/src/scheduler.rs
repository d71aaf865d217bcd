use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use studio_contracts::error::{StudioError, StudioResult};

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> StudioResult<()> {
        if self.is_cancelled() {
            return Err(StudioError::Cancelled);
        }
        Ok(())
    }
}

/// Source of delays and time for polling loops.
pub trait Scheduler: Send + Sync {
    /// Waits for `duration` unless `cancel` fires first.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> StudioResult<()>;

    /// Time elapsed since the scheduler was created.
    fn now(&self) -> Duration;
}

/// Real clock. Sleeps in short slices so cancellation is noticed promptly.
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    started: Instant,
    slice: Duration,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            slice: Duration::from_millis(200),
        }
    }
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> StudioResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(self.slice.min(deadline - now));
        }
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Test clock: every sleep returns immediately and advances virtual time.
#[derive(Debug, Default)]
pub struct VirtualScheduler {
    clock: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

impl Scheduler for VirtualScheduler {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> StudioResult<()> {
        cancel.check()?;
        if let Ok(mut clock) = self.clock.lock() {
            *clock += duration;
        }
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        Ok(())
    }

    fn now(&self) -> Duration {
        self.clock.lock().map(|clock| *clock).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use studio_contracts::error::ErrorKind;

    use super::*;

    #[test]
    fn virtual_scheduler_fast_forwards() -> anyhow::Result<()> {
        let scheduler = VirtualScheduler::new();
        let cancel = CancelToken::new();
        scheduler.sleep(Duration::from_secs(5), &cancel)?;
        scheduler.sleep(Duration::from_secs(5), &cancel)?;
        assert_eq!(scheduler.now(), Duration::from_secs(10));
        assert_eq!(scheduler.sleeps().len(), 2);
        Ok(())
    }

    #[test]
    fn cancelled_token_interrupts_sleep() {
        let cancel = CancelToken::new();
        let shared = cancel.clone();
        shared.cancel();
        let err = ThreadScheduler::new()
            .sleep(Duration::from_secs(60), &cancel)
            .err()
            .map(|err| err.kind());
        assert_eq!(err, Some(ErrorKind::Cancelled));
        assert!(VirtualScheduler::new()
            .sleep(Duration::from_secs(1), &cancel)
            .is_err());
    }
}
