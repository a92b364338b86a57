use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct AbortHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl AbortHandle {
    pub fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn abort(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Receiving half handed to a long-running generation. Checked between
/// steps; never interrupts a request that is already on the wire.
#[derive(Debug)]
pub struct AbortSignal {
    rx: oneshot::Receiver<()>,
    aborted: bool,
}

impl AbortSignal {
    pub fn is_aborted(&mut self) -> bool {
        if !self.aborted {
            // A closed channel means the generation was unregistered, not aborted.
            self.aborted = matches!(self.rx.try_recv(), Ok(()));
        }
        self.aborted
    }
}

/// Tracks in-flight generations by id so a character switch can stop
/// a pending job poll.
#[derive(Clone)]
pub struct AbortRegistry {
    inner: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(&self, generation_id: String) -> AbortSignal {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.inner.lock() {
            map.insert(generation_id, AbortHandle::new(tx));
        }
        AbortSignal { rx, aborted: false }
    }

    pub fn abort(&self, generation_id: &str) -> Result<(), String> {
        let mut map = self.inner.lock().map_err(|_| {
            crate::utils::err_msg(
                module_path!(),
                line!(),
                "Failed to acquire lock on abort registry",
            )
        })?;
        match map.remove(generation_id) {
            Some(mut handle) => {
                handle.abort();
                Ok(())
            }
            None => Err(format!(
                "Generation {} not found or already completed",
                generation_id
            )),
        }
    }

    /// Aborts every registered generation. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        match self.inner.lock() {
            Ok(mut map) => {
                let count = map.len();
                for (_, mut handle) in map.drain() {
                    handle.abort();
                }
                count
            }
            Err(_) => 0,
        }
    }

    pub fn unregister(&self, generation_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(generation_id);
        }
    }

    pub fn is_registered(&self, generation_id: &str) -> bool {
        self.inner
            .lock()
            .map(|map| map.contains_key(generation_id))
            .unwrap_or(false)
    }
}

impl Default for AbortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reaches_signal() {
        let registry = AbortRegistry::new();
        let mut signal = registry.register("gen-1".into());
        assert!(!signal.is_aborted());
        registry.abort("gen-1").unwrap();
        assert!(signal.is_aborted());
        assert!(signal.is_aborted());
        assert!(!registry.is_registered("gen-1"));
    }

    #[test]
    fn unregister_does_not_abort() {
        let registry = AbortRegistry::new();
        let mut signal = registry.register("gen-2".into());
        registry.unregister("gen-2");
        assert!(!signal.is_aborted());
        assert!(registry.abort("gen-2").is_err());
    }

    #[test]
    fn abort_all_signals_everything() {
        let registry = AbortRegistry::new();
        let mut a = registry.register("a".into());
        let mut b = registry.register("b".into());
        assert_eq!(registry.abort_all(), 2);
        assert!(a.is_aborted());
        assert!(b.is_aborted());
    }
}
