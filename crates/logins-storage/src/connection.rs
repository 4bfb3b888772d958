use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use logins_core::{engine::LoginsEngine, LoginsError};
use logins_engine::DatabaseLoginsStorage;
use tracing::{debug, info};

type EngineFactory = dyn Fn(&Path) -> Result<Arc<dyn LoginsEngine>, LoginsError> + Send + Sync;

/// Owner of the shared engine handle.
///
/// `initialize`, `handle` and `close` are mutually exclusive; the lock only
/// guards handle creation, lookup and removal and is never held while the
/// engine serves a data call. Once closed, the handle is gone until someone
/// calls `initialize` again; nothing re-creates it implicitly.
pub struct LoginStorageConnection {
    storage: Mutex<Option<Arc<dyn LoginsEngine>>>,
    factory: Box<EngineFactory>,
}

impl Default for LoginStorageConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginStorageConnection {
    /// Connection that opens a [`DatabaseLoginsStorage`] at the given path.
    pub fn new() -> Self {
        Self::with_factory(|path| {
            let engine: Arc<dyn LoginsEngine> = Arc::new(DatabaseLoginsStorage::new(path)?);
            Ok(engine)
        })
    }

    /// Connection with a custom engine constructor.
    pub fn with_factory(
        factory: impl Fn(&Path) -> Result<Arc<dyn LoginsEngine>, LoginsError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            storage: Mutex::new(None),
            factory: Box::new(factory),
        }
    }

    /// Create the engine bound to `path` unless one already exists, and
    /// return the shared handle. A pre-existing handle is returned as is,
    /// even if it was opened with a different path.
    pub fn initialize(&self, path: impl AsRef<Path>) -> Result<Arc<dyn LoginsEngine>, LoginsError> {
        let mut storage = self.lock()?;
        if let Some(engine) = storage.as_ref() {
            return Ok(engine.clone());
        }
        let path = path.as_ref();
        let engine = (self.factory)(path)?;
        info!(?path, "logins storage connection initialized");
        *storage = Some(engine.clone());
        Ok(engine)
    }

    pub fn handle(&self) -> Result<Arc<dyn LoginsEngine>, LoginsError> {
        self.lock()?.clone().ok_or(LoginsError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Drop the handle and close the engine. Callers still holding a clone of
    /// the handle see engine errors from then on.
    pub fn close(&self) -> Result<(), LoginsError> {
        let engine = self.lock()?.take().ok_or(LoginsError::NotInitialized)?;
        engine.close()?;
        debug!("logins storage connection closed");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Arc<dyn LoginsEngine>>>, LoginsError> {
        self.storage
            .lock()
            .map_err(|e| LoginsError::engine(format!("lock poisoned: {e}")))
    }
}
