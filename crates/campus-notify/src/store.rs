//! In-memory notification record store.
//!
//! Records are keyed by server id, so the store can never hold two records
//! with the same id, and iteration is always newest first. Merges are
//! field-wise overwrite-with-latest.

use std::collections::BTreeMap;

use crate::model::{NotificationId, NotificationRecord};

/// Whether an upsert created a new record or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Summary of a batch merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Ids that were not in the store before the merge, newest first.
    pub inserted: Vec<NotificationId>,
    /// Number of records merged into existing entries.
    pub updated: usize,
}

/// Canonical record set plus the derived unread counter.
#[derive(Debug, Default, Clone)]
pub struct RecordStore {
    records: BTreeMap<NotificationId, NotificationRecord>,
    unread_count: u64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace-or-insert a single record.
    pub fn upsert_one(&mut self, record: NotificationRecord) -> UpsertOutcome {
        match self.records.get_mut(&record.id) {
            Some(existing) => {
                existing.merge_from(&record);
                UpsertOutcome::Updated
            }
            None => {
                self.records.insert(record.id, record);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Merge a batch of records.
    pub fn upsert_many<I>(&mut self, records: I) -> MergeSummary
    where
        I: IntoIterator<Item = NotificationRecord>,
    {
        let mut summary = MergeSummary::default();
        for record in records {
            let id = record.id;
            match self.upsert_one(record) {
                UpsertOutcome::Inserted => summary.inserted.push(id),
                UpsertOutcome::Updated => summary.updated += 1,
            }
        }
        summary.inserted.sort_unstable_by(|a, b| b.cmp(a));
        summary.inserted.dedup();
        summary
    }

    /// Replace the whole list with the first page of a fresh fetch.
    ///
    /// Duplicate ids inside the page collapse into one record.
    pub fn set_page<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = NotificationRecord>,
    {
        self.records.clear();
        self.upsert_many(records);
    }

    pub fn remove(&mut self, id: NotificationId) -> Option<NotificationRecord> {
        self.records.remove(&id)
    }

    pub fn remove_many(&mut self, ids: &[NotificationId]) -> Vec<NotificationRecord> {
        ids.iter().filter_map(|id| self.records.remove(id)).collect()
    }

    /// Stamp `read_at` on a record that has none.
    ///
    /// Returns `true` only when the record transitioned from unread to read.
    pub fn mark_read(&mut self, id: NotificationId, at: &str) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.read_at.is_none() => {
                record.read_at = Some(at.to_string());
                true
            }
            _ => false,
        }
    }

    /// Stamp `read_at` on every unread record. Returns how many changed.
    pub fn mark_all_read(&mut self, at: &str) -> usize {
        let mut changed = 0;
        for record in self.records.values_mut() {
            if record.read_at.is_none() {
                record.read_at = Some(at.to_string());
                changed += 1;
            }
        }
        changed
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.records.contains_key(&id)
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.records.values().rev()
    }

    /// Owned copy of the records, newest first.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.iter().cloned().collect()
    }

    /// Ids, newest first.
    pub fn ids(&self) -> Vec<NotificationId> {
        self.records.keys().rev().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    /// Replace the counter with the authoritative server value.
    pub fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }

    pub fn increment_unread(&mut self) {
        self.unread_count = self.unread_count.saturating_add(1);
    }

    /// Decrement, floored at zero.
    pub fn decrement_unread(&mut self, by: u64) {
        self.unread_count = self.unread_count.saturating_sub(by);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: NotificationId) -> NotificationRecord {
        NotificationRecord::new(id, format!("title {id}"), format!("body {id}"))
    }

    fn assert_strictly_descending(store: &RecordStore) {
        let ids = store.ids();
        assert!(ids.windows(2).all(|w| w[0] > w[1]), "ids not descending: {ids:?}");
    }

    #[test]
    fn test_upsert_many_is_idempotent() {
        let mut store = RecordStore::new();
        store.upsert_many(vec![record(4), record(1)]);

        let batch = vec![record(2), record(4).with_read_at("2024-01-01T00:00:00Z"), record(9)];
        store.upsert_many(batch.clone());
        let once = store.records();

        let summary = store.upsert_many(batch);
        assert_eq!(store.records(), once);
        assert!(summary.inserted.is_empty());
        assert_eq!(summary.updated, 3);
    }

    #[test]
    fn test_sorted_after_every_operation() {
        let mut store = RecordStore::new();
        store.upsert_many(vec![record(3), record(10), record(7)]);
        assert_strictly_descending(&store);

        store.upsert_one(record(5));
        assert_strictly_descending(&store);

        store.set_page(vec![record(2), record(8), record(8), record(6)]);
        assert_strictly_descending(&store);
        assert_eq!(store.ids(), vec![8, 6, 2]);

        store.remove(6);
        assert_strictly_descending(&store);
    }

    #[test]
    fn test_upsert_one_reports_outcome() {
        let mut store = RecordStore::new();
        assert_eq!(store.upsert_one(record(1)), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_one(record(1)), UpsertOutcome::Updated);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_upsert_many_reports_inserted_ids_newest_first() {
        let mut store = RecordStore::new();
        store.upsert_one(record(2));
        let summary = store.upsert_many(vec![record(1), record(2), record(3), record(3)]);
        assert_eq!(summary.inserted, vec![3, 1]);
        assert_eq!(summary.updated, 2);
    }

    #[test]
    fn test_set_page_replaces_previous_records() {
        let mut store = RecordStore::new();
        store.upsert_many((1..=30).map(record));
        store.set_page(vec![record(31), record(30)]);
        assert_eq!(store.ids(), vec![31, 30]);
    }

    #[test]
    fn test_mark_read_only_transitions_once() {
        let mut store = RecordStore::new();
        store.upsert_one(record(1));

        assert!(store.mark_read(1, "2024-01-01T00:00:00Z"));
        assert!(!store.mark_read(1, "2024-06-01T00:00:00Z"));
        assert!(!store.mark_read(42, "2024-06-01T00:00:00Z"));
        assert_eq!(
            store.get(1).and_then(|r| r.read_at.as_deref()),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_mark_all_read_counts_changes() {
        let mut store = RecordStore::new();
        store.upsert_many(vec![record(1), record(2).with_read_at("x"), record(3)]);
        assert_eq!(store.mark_all_read("now"), 2);
        assert!(store.iter().all(NotificationRecord::is_read));
    }

    #[test]
    fn test_unread_counter_floors_at_zero() {
        let mut store = RecordStore::new();
        store.increment_unread();
        store.decrement_unread(1);
        store.decrement_unread(1);
        assert_eq!(store.unread_count(), 0);

        store.set_unread_count(12);
        store.decrement_unread(3);
        assert_eq!(store.unread_count(), 9);
    }

    #[test]
    fn test_remove_many_skips_unknown_ids() {
        let mut store = RecordStore::new();
        store.upsert_many(vec![record(1), record(2), record(3)]);
        let removed = store.remove_many(&[2, 99, 3]);
        assert_eq!(removed.len(), 2);
        assert_eq!(store.ids(), vec![1]);
    }
}
