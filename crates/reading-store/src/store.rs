//! Per-Metric Reading Slots

use crate::StoreError;
use chrono::{DateTime, Utc};
use obd_protocol::PhysicalValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Latest value of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub metric: String,
    pub value: PhysicalValue,
    pub last_updated: DateTime<Utc>,
}

/// One slot per metric. `None` means no value has been written yet.
type Slot = Mutex<Option<Reading>>;

#[derive(Debug)]
struct Inner {
    /// Fixed at construction; only the slots themselves are locked
    slots: HashMap<String, Slot>,
}

impl Inner {
    fn slot(&self, metric: &str) -> Result<&Slot, StoreError> {
        self.slots
            .get(metric)
            .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))
    }
}

/// A slot only ever holds a complete reading, so a poisoned lock still
/// guards a consistent value.
fn lock(slot: &Slot) -> MutexGuard<'_, Option<Reading>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Constructor for the writer/reader handle pair
pub struct ReadingStore;

impl ReadingStore {
    /// Create a store with one empty slot per metric name
    pub fn new<I, S>(metrics: I) -> (ReadingWriter, ReadingReader)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots: HashMap<String, Slot> = metrics
            .into_iter()
            .map(|m| (m.into(), Mutex::new(None)))
            .collect();
        debug!("Reading store created with {} slots", slots.len());

        let inner = Arc::new(Inner { slots });
        (
            ReadingWriter {
                inner: inner.clone(),
            },
            ReadingReader { inner },
        )
    }
}

/// Sole mutator of the store. Deliberately not `Clone`.
#[derive(Debug)]
pub struct ReadingWriter {
    inner: Arc<Inner>,
}

impl ReadingWriter {
    /// Replace the metric's reading with `value`, stamped now
    pub fn write(&self, metric: &str, value: PhysicalValue) -> Result<(), StoreError> {
        let slot = self.inner.slot(metric)?;
        let reading = Reading {
            metric: metric.to_string(),
            value,
            last_updated: Utc::now(),
        };
        *lock(slot) = Some(reading);
        Ok(())
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.inner.slots.contains_key(metric)
    }
}

/// Read access to the store; copies values out
#[derive(Debug, Clone)]
pub struct ReadingReader {
    inner: Arc<Inner>,
}

impl ReadingReader {
    /// Current reading, or `None` if the metric was never written
    pub fn read(&self, metric: &str) -> Result<Option<Reading>, StoreError> {
        let slot = self.inner.slot(metric)?;
        let reading = lock(slot).clone();
        Ok(reading)
    }

    /// Metric names with a slot in this store
    pub fn metrics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.slots.keys().cloned().collect();
        names.sort();
        names
    }
}
