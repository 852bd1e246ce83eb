//! Last-writer-wins merge of local and remote record sets
//!
//! For every id present on either side the copy with the later `updated_at`
//! is kept. Ties go to the local copy. Nothing is merged field by field.

use crate::error::{SyncError, SyncResult};
use crate::model::Record;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Result of a merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// One record per id, ordered by id
    pub records: Vec<Record>,
    /// Ids whose winning copy came from the remote and differs from local
    pub pulled: Vec<String>,
    /// Ids whose winning copy came from local and the remote lacks or holds
    /// an older copy of
    pub pushed: Vec<String>,
}

impl MergeOutcome {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Merge two record sets. Pure; neither input is modified.
///
/// Fails with [`SyncError::MergeAmbiguity`] when one input holds two copies
/// of an id with equal `updated_at` but different content.
pub fn merge_records(local: &[Record], remote: &[Record]) -> SyncResult<MergeOutcome> {
    let local = collapse(local)?;
    let remote = collapse(remote)?;

    let mut ids: Vec<&String> = local.keys().chain(remote.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut outcome = MergeOutcome::default();
    for id in ids {
        match (local.get(id), remote.get(id)) {
            (Some(l), Some(r)) if r.updated_at > l.updated_at => {
                outcome.pulled.push(id.clone());
                outcome.records.push(r.clone());
            }
            (Some(l), Some(r)) => {
                if !l.same_content(r) {
                    outcome.pushed.push(id.clone());
                }
                outcome.records.push(l.clone());
            }
            (Some(l), None) => {
                outcome.pushed.push(id.clone());
                outcome.records.push(l.clone());
            }
            (None, Some(r)) => {
                outcome.pulled.push(id.clone());
                outcome.records.push(r.clone());
            }
            (None, None) => {}
        }
    }

    Ok(outcome)
}

// One copy per id within a single input
fn collapse(records: &[Record]) -> SyncResult<BTreeMap<String, Record>> {
    let mut by_id: BTreeMap<String, Record> = BTreeMap::new();

    for record in records {
        match by_id.entry(record.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                if record.updated_at > existing.updated_at {
                    slot.insert(record.clone());
                } else if record.updated_at == existing.updated_at
                    && !record.same_content(existing)
                {
                    return Err(SyncError::MergeAmbiguity {
                        id: record.id.clone(),
                    });
                }
            }
        }
    }

    Ok(by_id)
}
