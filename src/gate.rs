use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};

/// Boolean key-value store the auto-connect gate persists through
///
/// Implementations are provided by the host application; a missing key
/// reads as `None`.
pub trait FlagStore: Send + Sync {
    /// Read a flag
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Store`] if the backing store cannot be read.
    fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Write a flag
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Store`] if the backing store cannot be written.
    fn set_bool(&self, key: &str, value: bool) -> Result<()>;
}

/// In-memory [`FlagStore`]
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, bool>>,
    writes: Mutex<usize>,
}

impl MemoryFlagStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes performed so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.lock().map_or(0, |writes| *writes)
    }
}

impl FlagStore for MemoryFlagStore {
    fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        let flags = self
            .flags
            .lock()
            .map_err(|e| LinkError::Store(e.to_string()))?;
        Ok(flags.get(key).copied())
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.flags
            .lock()
            .map_err(|e| LinkError::Store(e.to_string()))?
            .insert(key.to_string(), value);
        *self
            .writes
            .lock()
            .map_err(|e| LinkError::Store(e.to_string()))? += 1;
        Ok(())
    }
}

/// One-shot latch gating automatic connection attempts
///
/// The persisted flag records that an attempt has been consumed, so a store
/// that has never seen the key yields an open gate. The flag is loaded
/// lazily on first use and cached for the lifetime of the gate.
pub struct AutoConnectGate {
    store: Arc<dyn FlagStore>,
    key: String,
    open: Mutex<Option<bool>>,
}

impl AutoConnectGate {
    /// Create a gate persisted under `key`
    pub fn new(store: Arc<dyn FlagStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            open: Mutex::new(None),
        }
    }

    /// Whether the next [`try_consume`](Self::try_consume) would succeed
    pub fn is_open(&self) -> bool {
        match self.open.lock() {
            Ok(mut open) => *open.get_or_insert_with(|| self.load()),
            Err(e) => {
                warn!("Auto-connect gate lock poisoned: {}", e);
                false
            }
        }
    }

    /// Close the gate if it is open
    ///
    /// Returns `true` exactly once per open period; the caller may then
    /// initiate a connection.
    pub fn try_consume(&self) -> bool {
        let Ok(mut open) = self.open.lock() else {
            warn!("Auto-connect gate lock poisoned, refusing to consume");
            return false;
        };

        if !*open.get_or_insert_with(|| self.load()) {
            debug!("Auto-connect gate closed, ignoring sighting");
            return false;
        }

        *open = Some(false);
        self.persist(false);
        info!("Auto-connect gate consumed");
        true
    }

    /// Reopen the gate after a restart signal
    ///
    /// No-op (and no store write) when already open. Returns whether the
    /// gate changed.
    pub fn reopen(&self) -> bool {
        let Ok(mut open) = self.open.lock() else {
            warn!("Auto-connect gate lock poisoned, cannot reopen");
            return false;
        };

        if *open.get_or_insert_with(|| self.load()) {
            return false;
        }

        *open = Some(true);
        self.persist(true);
        info!("Auto-connect gate reopened");
        true
    }

    fn load(&self) -> bool {
        match self.store.get_bool(&self.key) {
            Ok(consumed) => !consumed.unwrap_or(false),
            Err(e) => {
                warn!("Failed to read auto-connect flag, assuming open: {}", e);
                true
            }
        }
    }

    fn persist(&self, open: bool) {
        if let Err(e) = self.store.set_bool(&self.key, !open) {
            warn!("Failed to persist auto-connect flag: {}", e);
        }
    }
}
