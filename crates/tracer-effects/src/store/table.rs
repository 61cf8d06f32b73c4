//! Ordered in-memory encounter table shared by the store handlers

use std::collections::{BTreeMap, HashMap};
use tracer_core::{
    EncounterRecord, RecordFilter, RecordId, RecordUpdate, StoredEncounter, Timestamp,
    UpdateOutcome,
};

/// Records keyed by `(timestamp, id)` so iteration order is the query order
#[derive(Debug, Clone, Default)]
pub(crate) struct EncounterTable {
    rows: BTreeMap<(Timestamp, RecordId), EncounterRecord>,
    index: HashMap<RecordId, Timestamp>,
    next_id: RecordId,
}

impl EncounterTable {
    pub(crate) fn next_id(&self) -> RecordId {
        self.next_id
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Insert under an explicit id; the id counter moves past it
    pub(crate) fn insert_with_id(&mut self, id: RecordId, record: EncounterRecord) {
        let ts = record.timestamp();
        self.rows.insert((ts, id), record);
        self.index.insert(id, ts);
        if id >= self.next_id {
            self.next_id = id.next();
        }
    }

    pub(crate) fn insert(&mut self, record: EncounterRecord) -> RecordId {
        let id = self.next_id;
        self.insert_with_id(id, record);
        id
    }

    /// Move the id counter forward without inserting
    pub(crate) fn advance_to(&mut self, next_id: RecordId) {
        if next_id > self.next_id {
            self.next_id = next_id;
        }
    }

    /// What `update` would do, without doing it
    pub(crate) fn preview_update(&self, id: RecordId, update: &RecordUpdate) -> Option<UpdateOutcome> {
        let ts = *self.index.get(&id)?;
        let mut record = self.rows.get(&(ts, id))?.clone();
        Some(record.apply(update))
    }

    /// `None` when the record does not exist
    pub(crate) fn update(&mut self, id: RecordId, update: &RecordUpdate) -> Option<UpdateOutcome> {
        let ts = *self.index.get(&id)?;
        self.rows.get_mut(&(ts, id)).map(|record| record.apply(update))
    }

    pub(crate) fn count(&self, filter: &RecordFilter) -> u64 {
        self.iter().filter(|stored| filter.matches(stored)).count() as u64
    }

    pub(crate) fn matching_ids(&self, filter: &RecordFilter) -> Vec<RecordId> {
        self.iter()
            .filter(|stored| filter.matches(stored))
            .map(|stored| stored.id)
            .collect()
    }

    pub(crate) fn remove_ids(&mut self, ids: &[RecordId]) -> u64 {
        let mut removed = 0;
        for id in ids {
            if let Some(ts) = self.index.remove(id) {
                self.rows.remove(&(ts, *id));
                removed += 1;
            }
        }
        removed
    }

    /// Drop every row; the id counter keeps going
    pub(crate) fn clear(&mut self) -> u64 {
        let removed = self.rows.len() as u64;
        self.rows.clear();
        self.index.clear();
        removed
    }

    pub(crate) fn snapshot(&self) -> Vec<StoredEncounter> {
        self.iter().collect()
    }

    pub(crate) fn recent(&self, limit: usize) -> Vec<StoredEncounter> {
        self.rows
            .iter()
            .rev()
            .take(limit)
            .map(|(&(_, id), record)| StoredEncounter {
                id,
                record: record.clone(),
            })
            .collect()
    }

    fn iter(&self) -> impl Iterator<Item = StoredEncounter> + '_ {
        self.rows.iter().map(|(&(_, id), record)| StoredEncounter {
            id,
            record: record.clone(),
        })
    }
}
