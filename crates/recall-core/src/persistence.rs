//! Persistence seam for the vector store.
//!
//! The store owns the index/catalog pair in memory and hands a borrowed
//! snapshot to a backend after every mutation. Backends live in
//! `recall-storage`.

use crate::error::Result;
use crate::types::{SnapshotRef, StoreSnapshot};

/// Durable home for an index/catalog pair.
///
/// `save` must write the index and the catalog as one unit: after a crash a
/// later `load` either returns the complete previous or complete new state,
/// or fails with `RecallError::Corrupt`. It never returns a mix.
pub trait CatalogPersistence: Send + Sync {
    /// Read back the last saved snapshot.
    ///
    /// Returns `Ok(None)` when nothing has ever been saved.
    fn load(&self) -> Result<Option<StoreSnapshot>>;

    /// Replace the persisted state with `snapshot`.
    fn save(&self, snapshot: SnapshotRef<'_>) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

impl<T: CatalogPersistence + ?Sized> CatalogPersistence for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        (**self).load()
    }

    fn save(&self, snapshot: SnapshotRef<'_>) -> Result<()> {
        (**self).save(snapshot)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
