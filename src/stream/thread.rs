use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared holder for the backend thread id.
///
/// The client and every stream it produces hold clones of the same
/// slot, so a thread id discovered while streaming is visible to the
/// next query without threading `&mut` through the stream.
#[derive(Debug, Clone, Default)]
pub struct ThreadSlot {
    inner: Arc<Mutex<Option<String>>>,
}

impl ThreadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn set(&self, thread_id: impl Into<String>) {
        *self.lock() = Some(thread_id.into());
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    /// Store `thread_id` unless one is already known.
    /// Returns true when the slot was filled by this call.
    pub fn record_if_absent(&self, thread_id: &str) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(thread_id.to_string());
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        // A plain Option cannot be left half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
