use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A spawned timer task that is aborted when the guard is dropped.
#[derive(Debug)]
pub struct TimerGuard {
    handle: JoinHandle<()>,
}

impl TimerGuard {
    pub fn spawn(task: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            handle: tokio::spawn(task),
        }
    }

    /// Run `action` once after `delay`, unless the guard is dropped first.
    pub fn after(delay: Duration, action: impl FnOnce() + Send + 'static) -> Self {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::TimerGuard;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = TimerGuard::after(Duration::from_secs(1), move || flag.store(true, Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        drop(TimerGuard::after(Duration::from_secs(1), move || flag.store(true, Ordering::SeqCst)));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
