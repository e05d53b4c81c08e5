//! In-process persistence for tests and throwaway stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use recall_core::error::{RecallError, Result};
use recall_core::persistence::CatalogPersistence;
use recall_core::types::{SnapshotRef, StoreSnapshot};

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<StoreSnapshot>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously saved snapshot.
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Copy of the last saved snapshot.
    pub fn snapshot(&self) -> Option<StoreSnapshot> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail with a storage error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl CatalogPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|e| RecallError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(guard.clone())
    }

    fn save(&self, snapshot: SnapshotRef<'_>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RecallError::Storage("simulated save failure".to_string()));
        }
        snapshot.verify()?;
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|e| RecallError::Storage(format!("Lock poisoned: {}", e)))?;
        *guard = Some(snapshot.to_owned_snapshot());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
