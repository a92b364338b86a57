use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::utils::log_debug;

pub const SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const REMOTE_AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(2000);
pub const KEY_WRITE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Trailing-edge debouncer. Every `schedule` supersedes the previous
/// pending task; only the last one scheduled within the window runs.
/// A task whose timer already fired is left to finish.
#[derive(Clone)]
pub struct Coalescer {
    name: &'static str,
    delay: Duration,
    ticket: Arc<AtomicU64>,
}

impl Coalescer {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F) -> JoinHandle<bool>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mine = self.ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = self.ticket.clone();
        let delay = self.delay;
        let name = self.name;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if ticket.load(Ordering::SeqCst) != mine {
                log_debug("coalescer", format!("{}: superseded ticket {}", name, mine));
                return false;
            }
            task.await;
            true
        })
    }

    /// Drops whatever is pending without running it.
    pub fn cancel(&self) {
        self.ticket.fetch_add(1, Ordering::SeqCst);
    }
}
