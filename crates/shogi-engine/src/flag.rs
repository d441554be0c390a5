use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A level-triggered boolean condition multiple waiters can await, mirroring
/// `asyncio.Event` (`usiok`/`readyok`/`bestmove` in `analysis_service.py`
/// are exactly this).
#[derive(Debug, Default)]
pub struct Flag {
    set: AtomicBool,
    notify: Notify,
}

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Waits until set. Safe against the set-before-wait race: the
    /// `notified()` future is created before the flag is rechecked, so a
    /// `set()` that happens between the check and the `.await` is not lost.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
            if self.is_set() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let flag = Flag::new();
        flag.set();
        flag.wait().await;
    }

    #[tokio::test]
    async fn wait_unblocks_once_another_task_sets_it() {
        let flag = Arc::new(Flag::new());
        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            setter.set();
        });
        flag.wait().await;
        assert!(flag.is_set());
    }
}
