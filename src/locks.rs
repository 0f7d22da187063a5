//! Per-key async mutual exclusion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// A key's mutex and the number of holders plus waiters using it.
struct Slot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// A set of async locks keyed by string; entries are removed once unused.
///
/// Holders of different keys never wait on each other.
#[derive(Clone, Default)]
pub(crate) struct KeyedLocks {
    slots: Slots,
}

impl KeyedLocks {
    /// Wait for exclusive access to `key`.
    ///
    /// Dropping the returned future before it resolves releases its claim
    /// on the entry, the same as dropping the guard.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let (mutex, registration) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            (
                Arc::clone(&slot.mutex),
                Registration {
                    key: key.to_string(),
                    slots: Arc::clone(&self.slots),
                },
            )
        };

        let guard = mutex.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// One claim on a key's entry; the entry goes when the last claim does.
struct Registration {
    key: String,
    slots: Slots,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Exclusive access to one key; released on drop.
pub(crate) struct KeyedGuard {
    // Fields drop in order: the mutex is released before the claim.
    _guard: OwnedMutexGuard<()>,
    _registration: Registration,
}
