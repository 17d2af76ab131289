//! Task registry for tracking and managing spawned Tokio tasks
//!
//! Every leg, aggregator loop and catalog commit runs as a tracked unit so the
//! coordinator can cancel siblings of a failed leg or stop everything on shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// Unique identifier for a tracked unit of work
pub type UnitId = u64;

/// Information about an active unit
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub id: UnitId,
    /// Human-readable name, e.g. `01J.../s3`
    pub name: String,
    pub created_at: Instant,
}

struct UnitEntry {
    info: UnitInfo,
    abort_handle: AbortHandle,
}

/// Registry for tracking spawned units
pub struct TaskRegistry {
    next_id: AtomicU64,
    units: Arc<Mutex<HashMap<UnitId, UnitEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry {
            next_id: AtomicU64::new(1),
            units: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn generate_id(&self) -> UnitId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Spawn a tracked unit and return its ID
    ///
    /// The unit removes itself from the registry when its future completes.
    pub async fn spawn_tracked<F>(&self, name: impl Into<String>, future: F) -> UnitId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.generate_id();
        let name = name.into();
        let units_cleanup = self.units.clone();

        // Hold the lock until the entry is in place so a unit that finishes
        // immediately cannot remove itself before it was inserted.
        let mut units = self.units.lock().await;
        let join_handle = tokio::spawn(async move {
            future.await;
            units_cleanup.lock().await.remove(&id);
        });

        tracing::trace!("spawned unit {} ({})", id, name);
        units.insert(
            id,
            UnitEntry {
                info: UnitInfo {
                    id,
                    name,
                    created_at: Instant::now(),
                },
                abort_handle: join_handle.abort_handle(),
            },
        );
        id
    }

    /// Cancel a unit by its ID
    ///
    /// Returns true if the unit was found and cancelled, false otherwise.
    pub async fn cancel(&self, unit_id: UnitId) -> bool {
        let mut units = self.units.lock().await;
        if let Some(entry) = units.remove(&unit_id) {
            tracing::debug!("cancelling unit {} ({})", unit_id, entry.info.name);
            entry.abort_handle.abort();
            true
        } else {
            false
        }
    }

    /// Get information about all active units
    pub async fn get_active_units(&self) -> Vec<UnitInfo> {
        let units = self.units.lock().await;
        units.values().map(|e| e.info.clone()).collect()
    }

    pub async fn active_count(&self) -> usize {
        self.units.lock().await.len()
    }

    pub async fn is_active(&self, unit_id: UnitId) -> bool {
        self.units.lock().await.contains_key(&unit_id)
    }

    /// Cancel all active units
    pub async fn cancel_all(&self) {
        let mut units = self.units.lock().await;
        for entry in units.values() {
            entry.abort_handle.abort();
        }
        units.clear();
    }

    /// Drop entries whose unit already finished or was aborted elsewhere
    pub async fn cleanup_finished(&self) {
        let mut units = self.units.lock().await;
        units.retain(|_, entry| !entry.abort_handle.is_finished());
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
