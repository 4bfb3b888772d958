use crate::error::LoginsError;

/// A store that can take part in a sync run driven by a sync coordinator.
pub trait SyncEngine: Send + Sync {
    /// Collection name the engine syncs (e.g. `passwords`).
    fn collection_name(&self) -> &'static str;

    /// Called once the coordinator has exchanged data for this collection.
    /// Returns the number of outgoing records.
    fn sync_finished(&self) -> Result<usize, LoginsError>;

    /// Drop sync state so the next sync uploads everything.
    fn reset(&self) -> Result<(), LoginsError>;
}
