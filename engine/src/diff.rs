//! List diffing.
//!
//! [`diff`] turns a previously emitted list (identity and version only) and a
//! freshly evaluated one into the operations a client needs to move from the
//! first to the second. [`apply`] performs the client side of that contract
//! on a materialized list.

use crate::{error::Result, Error, Record, RecordId, VersionTag};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One step of a list transformation.
///
/// Indexes refer to positions in the new list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOp {
    /// A record that was not in the previous list
    Add { index: usize, record: Record },
    /// A record whose version changed
    Update { index: usize, record: Record },
    /// An unchanged record whose relative order changed
    Move { id: RecordId, index: usize },
    /// A record that left the list
    Remove { id: RecordId },
}

impl DiffOp {
    /// Id of the record this operation concerns.
    pub fn id(&self) -> &str {
        match self {
            DiffOp::Add { record, .. } | DiffOp::Update { record, .. } => &record.id,
            DiffOp::Move { id, .. } | DiffOp::Remove { id } => id,
        }
    }
}

enum Slot {
    Added,
    Updated,
    Unchanged { previous: usize },
}

/// Compute the operations that turn `previous` into `current`.
///
/// Adds, updates and moves come first in `current` order, then removes in
/// `previous` order. Unchanged records produce nothing unless they have to
/// move; the set of records left in place is a longest increasing run of
/// previous positions, so the number of moves is minimal.
pub fn diff(previous: &[VersionTag], current: &[Record]) -> Vec<DiffOp> {
    let mut prev_index: HashMap<&str, (usize, &str)> = HashMap::with_capacity(previous.len());
    for (pos, tag) in previous.iter().enumerate() {
        prev_index
            .entry(tag.id.as_str())
            .or_insert((pos, tag.etag.as_str()));
    }

    let slots: Vec<Slot> = current
        .iter()
        .map(|record| match prev_index.get(record.id.as_str()) {
            None => Slot::Added,
            Some((_, etag)) if *etag != record.etag => Slot::Updated,
            Some((pos, _)) => Slot::Unchanged { previous: *pos },
        })
        .collect();

    let unchanged: Vec<usize> = slots
        .iter()
        .filter_map(|s| match s {
            Slot::Unchanged { previous } => Some(*previous),
            _ => None,
        })
        .collect();
    let mut in_place = longest_increasing(&unchanged).into_iter();

    let mut ops = Vec::new();
    for (index, (record, slot)) in current.iter().zip(slots).enumerate() {
        match slot {
            Slot::Added => ops.push(DiffOp::Add {
                index,
                record: record.clone(),
            }),
            Slot::Updated => ops.push(DiffOp::Update {
                index,
                record: record.clone(),
            }),
            Slot::Unchanged { .. } => {
                if !in_place.next().unwrap_or(false) {
                    ops.push(DiffOp::Move {
                        id: record.id.clone(),
                        index,
                    });
                }
            }
        }
    }

    let current_ids: HashSet<&str> = current.iter().map(|r| r.id.as_str()).collect();
    let mut removed = HashSet::new();
    for tag in previous {
        if !current_ids.contains(tag.id.as_str()) && removed.insert(tag.id.as_str()) {
            ops.push(DiffOp::Remove { id: tag.id.clone() });
        }
    }

    ops
}

/// Marks the members of one longest strictly increasing subsequence.
fn longest_increasing(seq: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < value);
        if pos > 0 {
            parent[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut keep = vec![false; seq.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = parent[i];
    }
    keep
}

/// Apply diff operations to a materialized previous list.
///
/// Records named by an operation are placed at their index; the remaining
/// previous records fill the free slots in their previous order.
pub fn apply<I>(previous: Vec<Record>, ops: I) -> Result<Vec<Record>>
where
    I: IntoIterator<Item = DiffOp>,
{
    let mut placed: BTreeMap<usize, Record> = BTreeMap::new();
    let mut moves: Vec<(usize, RecordId)> = Vec::new();
    let mut removed: HashSet<RecordId> = HashSet::new();

    for op in ops {
        match op {
            DiffOp::Add { index, record } | DiffOp::Update { index, record } => {
                placed.insert(index, record);
            }
            DiffOp::Move { id, index } => moves.push((index, id)),
            DiffOp::Remove { id } => {
                removed.insert(id);
            }
        }
    }

    let touched: HashSet<&str> = placed
        .values()
        .map(|r| r.id.as_str())
        .chain(moves.iter().map(|(_, id)| id.as_str()))
        .collect();

    let mut moved: HashMap<RecordId, Record> = HashMap::new();
    let mut stay = Vec::with_capacity(previous.len());
    for record in previous {
        if removed.contains(&record.id) {
            continue;
        }
        if touched.contains(record.id.as_str()) {
            moved.insert(record.id.clone(), record);
        } else {
            stay.push(record);
        }
    }

    for (index, id) in moves {
        let record = moved
            .remove(&id)
            .ok_or_else(|| Error::Internal(format!("move of unknown record: {}", id)))?;
        placed.insert(index, record);
    }

    let len = placed.len() + stay.len();
    let mut stay = stay.into_iter();
    let mut result = Vec::with_capacity(len);
    for index in 0..len {
        let record = match placed.remove(&index) {
            Some(record) => record,
            None => stay
                .next()
                .ok_or_else(|| Error::Internal(format!("diff leaves slot {} empty", index)))?,
        };
        result.push(record);
    }

    if !placed.is_empty() {
        return Err(Error::Internal("diff index out of range".to_string()));
    }

    Ok(result)
}
