//! Process-wide map from native call handles to tracked calls
//!
//! Stack callbacks only carry a native handle. The registry lets them find the
//! call's id and wake a thread blocked in [`Call::destroy`](super::Call::destroy)
//! without touching the call object itself, which stays on the GUI thread.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::stack::CallHandle;

use super::CallId;

/// Wake-up signal for a thread waiting on a call's teardown
#[derive(Debug, Default)]
pub(crate) struct CallSignal {
    lock: Mutex<u64>,
    cond: Condvar,
}

impl CallSignal {
    /// Wake every waiter
    pub(crate) fn notify(&self) {
        let mut counter = self.lock.lock();
        *counter = counter.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until notified or `timeout` elapses
    pub(crate) fn wait_for(&self, timeout: Duration) {
        let mut counter = self.lock.lock();
        let seen = *counter;
        let deadline = std::time::Instant::now() + timeout;
        while *counter == seen {
            if self.cond.wait_until(&mut counter, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Registry entry for one active native call
#[derive(Debug, Clone)]
pub(crate) struct RegistryEntry {
    pub(crate) call: CallId,
    pub(crate) signal: Arc<CallSignal>,
}

/// Native handle to call lookup, shared with the stack callback bridge
#[derive(Debug, Default)]
pub(crate) struct CallRegistry {
    entries: DashMap<CallHandle, RegistryEntry>,
}

impl CallRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, handle: CallHandle, call: CallId, signal: Arc<CallSignal>) {
        self.entries.insert(handle, RegistryEntry { call, signal });
    }

    pub(crate) fn remove(&self, handle: CallHandle) -> Option<RegistryEntry> {
        self.entries.remove(&handle).map(|(_, entry)| entry)
    }

    pub(crate) fn lookup(&self, handle: CallHandle) -> Option<RegistryEntry> {
        self.entries.get(&handle).map(|entry| entry.value().clone())
    }

    pub(crate) fn contains(&self, handle: CallHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use uuid::Uuid;

    #[test]
    fn test_lookup_and_remove() {
        let registry = CallRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(CallHandle(3), id, Arc::new(CallSignal::default()));
        assert!(registry.contains(CallHandle(3)));
        assert_eq!(registry.lookup(CallHandle(3)).map(|e| e.call), Some(id));
        assert!(registry.remove(CallHandle(3)).is_some());
        assert!(registry.lookup(CallHandle(3)).is_none());
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(CallSignal::default());
        let notifier = signal.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            notifier.notify();
        });
        signal.wait_for(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(4));
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_times_out() {
        let signal = CallSignal::default();
        let started = Instant::now();
        signal.wait_for(Duration::from_millis(30));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
