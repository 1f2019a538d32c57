//! CameraLocks - per-camera serialization of lifecycle operations
//!
//! connect / disconnect / update / delete for one camera id run one at a
//! time; different ids never contend. A caller queued behind an in-flight
//! connect waits (bounded) instead of racing it.
//!
//! Entries live only while someone holds or waits for them. The last lease
//! released for an id removes its entry, so deleted cameras leave nothing
//! behind.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;

type Slot = Arc<AsyncMutex<()>>;
type Table = Arc<Mutex<HashMap<String, Slot>>>;

/// Per-camera-id lock table
pub struct CameraLocks {
    table: Table,
    wait_timeout: Duration,
}

impl CameraLocks {
    /// `timeout_ms` must outlast a connect grace period plus a stop
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            wait_timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Acquire exclusive access to a camera id, waiting for any operation
    /// already holding it. The returned lease releases on drop.
    pub async fn acquire(&self, camera_id: &str) -> Result<CameraLease, LockError> {
        // Cloned under the table lock; the clone keeps the entry from eviction
        let slot = self
            .table
            .lock()
            .entry(camera_id.to_string())
            .or_default()
            .clone();

        let acquired = timeout(self.wait_timeout, slot.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                tracing::trace!(camera_id = %camera_id, "Camera lease acquired");
                Ok(CameraLease {
                    camera_id: camera_id.to_string(),
                    guard: Some(guard),
                    table: self.table.clone(),
                })
            }
            Err(_) => {
                // The holder may have released while this waiter was giving up
                evict_if_idle(&self.table, camera_id);
                tracing::warn!(
                    camera_id = %camera_id,
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Camera lease timeout - operation in progress"
                );
                Err(LockError::Busy)
            }
        }
    }

    /// Ids currently held or awaited
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.lock().len()
    }
}

/// Remove the entry when the table holds the only reference
fn evict_if_idle(table: &Table, camera_id: &str) {
    let mut table = table.lock();
    if table
        .get(camera_id)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        table.remove(camera_id);
    }
}

/// Exclusive access to one camera id; released on drop
pub struct CameraLease {
    camera_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: Table,
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        // The guard owns a slot reference; release it before counting
        self.guard.take();
        evict_if_idle(&self.table, &self.camera_id);
        tracing::trace!(camera_id = %self.camera_id, "Camera lease released");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Lease wait expired
    #[error("camera busy (lease timeout)")]
    Busy,
}
