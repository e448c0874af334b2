//! Process-wide PID -> handle registry.
//!
//! Per spec.md §9 ("process-global state... model it as a dedicated singleton component
//! with its own synchronisation, not as mutable module-level data"), this is a plain
//! struct instantiated once by the binary's `main` and threaded down to every component
//! that needs to resolve a reaped pid back to its owning handle -- rather than a
//! `lazy_static`/global, which is how the teacher's older code would have modeled it.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PidRegistry<T> {
    inner: Mutex<HashMap<libc::pid_t, T>>,
}

impl<T: Clone> PidRegistry<T> {
    pub fn new() -> Self {
        PidRegistry {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, pid: libc::pid_t, handle: T) {
        let mut guard = self.inner.lock().expect("pid registry lock poisoned");
        guard.insert(pid, handle);
    }

    pub fn remove(&self, pid: libc::pid_t) -> Option<T> {
        let mut guard = self.inner.lock().expect("pid registry lock poisoned");
        guard.remove(&pid)
    }

    pub fn get(&self, pid: libc::pid_t) -> Option<T> {
        let guard = self.inner.lock().expect("pid registry lock poisoned");
        guard.get(&pid).cloned()
    }

    pub fn contains(&self, pid: libc::pid_t) -> bool {
        let guard = self.inner.lock().expect("pid registry lock poisoned");
        guard.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("pid registry lock poisoned");
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let registry: PidRegistry<&'static str> = PidRegistry::new();
        registry.insert(42, "alpha0");
        assert_eq!(registry.get(42), Some("alpha0"));
        assert!(registry.contains(42));
        assert_eq!(registry.remove(42), Some("alpha0"));
        assert_eq!(registry.get(42), None);
    }

    #[test]
    fn len_tracks_live_entries() {
        let registry: PidRegistry<i32> = PidRegistry::new();
        assert!(registry.is_empty());
        registry.insert(1, 100);
        registry.insert(2, 200);
        assert_eq!(registry.len(), 2);
        registry.remove(1);
        assert_eq!(registry.len(), 1);
    }
}
