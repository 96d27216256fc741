use tokio::sync::watch;
use tracing::{debug, warn};

use crate::types::{DeviceAddress, ScanRecord};

/// Deduplicated list of advertisement sightings
///
/// New addresses are appended in sighting order; a repeat sighting replaces
/// the existing record in place. Observers are notified through a revision
/// counter that is bumped once per visible change.
pub struct ScanRegistry {
    records: Vec<ScanRecord>,
    revision: watch::Sender<u64>,
}

impl ScanRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: Vec::new(),
            revision,
        }
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Current revision, bumped once per notification
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Insert or replace a record, notifying observers
    ///
    /// An absent record is a no-op.
    pub fn upsert(&mut self, record: impl Into<Option<ScanRecord>>) {
        if self.upsert_with(record.into(), false) {
            self.notify();
        }
    }

    /// Upsert every record, then notify observers once
    pub fn upsert_batch(&mut self, records: impl IntoIterator<Item = ScanRecord>) {
        let mut changed = false;
        for record in records {
            changed |= self.upsert_with(Some(record), true);
        }

        if changed {
            self.notify();
        }
    }

    /// Records in sighting order
    #[must_use]
    pub fn list(&self) -> &[ScanRecord] {
        &self.records
    }

    /// Look up a record by address
    #[must_use]
    pub fn find(&self, address: &DeviceAddress) -> Option<&ScanRecord> {
        self.records.iter().find(|r| &r.address == address)
    }

    /// Number of distinct addresses seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether nothing has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records, notifying observers
    pub fn clear(&mut self) {
        self.records.clear();
        self.notify();
    }

    fn upsert_with(&mut self, record: Option<ScanRecord>, batched: bool) -> bool {
        let Some(record) = record else {
            warn!("Ignoring empty scan record");
            return false;
        };

        debug!(
            "Sighting {} ({}) rssi {}{}",
            record.address,
            record.display_name.as_deref().unwrap_or("unnamed"),
            record.signal_strength,
            if batched { " [batch]" } else { "" }
        );

        match self.records.iter_mut().find(|r| r.address == record.address) {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
        true
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl Default for ScanRegistry {
    fn default() -> Self {
        Self::new()
    }
}
