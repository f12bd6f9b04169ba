use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Generate,
    GalleryFetch,
    SearchFetch,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Generate => "generate",
            Operation::GalleryFetch => "gallery-fetch",
            Operation::SearchFetch => "search-fetch",
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<Operation>>,
}

impl InFlight {
    /// Marks `operation` as running, or returns `None` if it already is.
    pub fn try_acquire(&self, operation: Operation) -> Option<InFlightGuard<'_>> {
        if !lock(&self.active).insert(operation) {
            tracing::debug!(operation = operation.as_str(), "operation already in flight");
            return None;
        }
        Some(InFlightGuard {
            registry: self,
            operation,
        })
    }

    pub fn is_active(&self, operation: Operation) -> bool {
        lock(&self.active).contains(&operation)
    }
}

#[derive(Debug)]
pub struct InFlightGuard<'a> {
    registry: &'a InFlight,
    operation: Operation,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.registry.active).remove(&self.operation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_guard_drops() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_acquire(Operation::SearchFetch).expect("first");
        assert!(in_flight.try_acquire(Operation::SearchFetch).is_none());
        assert!(in_flight.try_acquire(Operation::GalleryFetch).is_some());
        assert!(in_flight.is_active(Operation::SearchFetch));
        drop(guard);
        assert!(!in_flight.is_active(Operation::SearchFetch));
        assert!(in_flight.try_acquire(Operation::SearchFetch).is_some());
    }
}
