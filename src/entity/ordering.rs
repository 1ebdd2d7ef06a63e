//! Sort-order maintenance for the identifier list.
//!
//! All functions here are pure: they read an id list and a record map and
//! return positions or freshly allocated id lists. Callers decide whether an
//! allocation is needed at all.
//!
//! # Time Complexity
//!
//! | Function                | Complexity         |
//! |-------------------------|--------------------|
//! | `find_insertion_index`  | O(log n)           |
//! | `insert_sorted`         | O(n) copy          |
//! | `merge_insert_many`     | O(n + k log k)     |
//! | `position_of`           | O(log n + ties)    |
//! | `did_entity_move`       | O(1)               |
//! | `sort_ids`              | O(n log n)         |
//! | `stable_sort_by`        | O(n log r), r runs |

use std::cmp::Ordering;
use std::hash::Hash;

use super::{EntityMap, ReferenceCounter};

/// Returns the index at which `candidate` can be inserted into `ids` while
/// keeping it sorted.
///
/// This is an upper-bound search: a candidate that compares equal to
/// existing records is placed after all of them.
pub(crate) fn find_insertion_index<Id, T, C>(
    ids: &[Id],
    entities: &EntityMap<Id, T>,
    comparer: &C,
    candidate: &T,
) -> usize
where
    Id: Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    ids.partition_point(|id| {
        entities
            .get(id)
            .is_some_and(|existing| comparer(existing, candidate) != Ordering::Greater)
    })
}

/// Returns a copy of `ids` with `id` inserted at its sorted position.
pub(crate) fn insert_sorted<Id, T, C>(
    ids: &[Id],
    entities: &EntityMap<Id, T>,
    comparer: &C,
    id: Id,
    candidate: &T,
) -> Vec<Id>
where
    Id: Clone + Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    let position = find_insertion_index(ids, entities, comparer, candidate);
    let mut new_ids = Vec::with_capacity(ids.len() + 1);
    new_ids.extend_from_slice(&ids[..position]);
    new_ids.push(id);
    new_ids.extend_from_slice(&ids[position..]);
    new_ids
}

/// Merges `incoming` entries into the sorted `ids`.
///
/// The incoming batch is stably sorted among itself first, then interleaved
/// with `ids` by a two-pointer merge. Existing identifiers win ties, so the
/// result matches inserting each incoming entry one at a time in batch order.
///
/// `entities` must already hold the records of `ids`; the incoming records are
/// taken from the batch itself.
pub(crate) fn merge_insert_many<Id, T, C>(
    ids: &[Id],
    entities: &EntityMap<Id, T>,
    comparer: &C,
    incoming: Vec<(Id, ReferenceCounter<T>)>,
) -> Vec<Id>
where
    Id: Clone + Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    if let [(id, entity)] = incoming.as_slice() {
        return insert_sorted(ids, entities, comparer, id.clone(), entity);
    }

    let incoming = stable_sort_by(incoming, |(_, left), (_, right)| comparer(left, right));

    let mut merged = Vec::with_capacity(ids.len() + incoming.len());
    let mut existing = ids.iter().peekable();
    for (id, entity) in incoming {
        while let Some(current) = existing.next_if(|current| {
            entities
                .get(*current)
                .is_none_or(|stored| comparer(stored, &entity) != Ordering::Greater)
        }) {
            merged.push(current.clone());
        }
        merged.push(id);
    }
    merged.extend(existing.cloned());
    merged
}

/// Locates `id` in the sorted `ids` using its stored record.
///
/// Binary-searches the run of records that compare equal to the stored one
/// and scans that run for the identifier. Falls back to a linear scan when the
/// comparator is inconsistent with the current order.
pub(crate) fn position_of<Id, T, C>(
    ids: &[Id],
    entities: &EntityMap<Id, T>,
    comparer: &C,
    id: &Id,
) -> Option<usize>
where
    Id: Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    let entity = entities.get(id)?;
    let compare_at = |other: &Id| entities.get(other).map(|existing| comparer(existing, entity));

    let start = ids.partition_point(|other| compare_at(other) == Some(Ordering::Less));
    ids[start..]
        .iter()
        .take_while(|other| compare_at(*other) == Some(Ordering::Equal))
        .position(|other| other == id)
        .map(|offset| start + offset)
        .or_else(|| ids.iter().position(|other| other == id))
}

/// Returns `true` if `entity` no longer fits between its neighbors.
///
/// A record that still compares no less than `before` and no greater than
/// `after` keeps the id list sorted without moving.
pub(crate) fn did_entity_move<T, C>(
    comparer: &C,
    entity: &T,
    before: Option<&T>,
    after: Option<&T>,
) -> bool
where
    C: Fn(&T, &T) -> Ordering,
{
    before.is_some_and(|previous| comparer(previous, entity) == Ordering::Greater)
        || after.is_some_and(|next| comparer(entity, next) == Ordering::Greater)
}

/// Returns `true` if the record at `position` of `ids` sits between its
/// neighbors according to `entities`.
pub(crate) fn is_in_place<Id, T, C>(
    ids: &[Id],
    entities: &EntityMap<Id, T>,
    comparer: &C,
    position: usize,
) -> bool
where
    Id: Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    let entity_at = |index: usize| ids.get(index).and_then(|id| entities.get(id)).map(|entity| &**entity);

    let Some(entity) = entity_at(position) else {
        return false;
    };
    let before = position.checked_sub(1).and_then(entity_at);
    let after = entity_at(position + 1);
    !did_entity_move(comparer, entity, before, after)
}

/// Stably sorts `ids` by their records in `entities`.
pub(crate) fn sort_ids<Id, T, C>(ids: Vec<Id>, entities: &EntityMap<Id, T>, comparer: &C) -> Vec<Id>
where
    Id: Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    stable_sort_by(ids, |left, right| match (entities.get(left), entities.get(right)) {
        (Some(left), Some(right)) => comparer(left, right),
        _ => Ordering::Equal,
    })
}

/// Stable merge sort that tolerates a comparator without a total order.
///
/// The input is split into its non-descending runs, which are merged pairwise
/// until one is left, so already sorted input costs a single pass. Unlike
/// `slice::sort_by`, an inconsistent `compare` only yields an unspecified
/// permutation of `items` and never panics.
pub(crate) fn stable_sort_by<E, F>(items: Vec<E>, mut compare: F) -> Vec<E>
where
    F: FnMut(&E, &E) -> Ordering,
{
    let mut runs: Vec<Vec<E>> = Vec::new();
    for item in items {
        let extends_run = runs
            .last()
            .and_then(|run| run.last())
            .is_some_and(|last| compare(last, &item) != Ordering::Greater);
        match runs.last_mut() {
            Some(run) if extends_run => run.push(item),
            _ => runs.push(vec![item]),
        }
    }

    while runs.len() > 1 {
        let mut merged_runs = Vec::with_capacity(runs.len().div_ceil(2));
        let mut pairs = runs.into_iter();
        while let Some(left) = pairs.next() {
            match pairs.next() {
                Some(right) => merged_runs.push(merge_runs(left, right, &mut compare)),
                None => merged_runs.push(left),
            }
        }
        runs = merged_runs;
    }
    runs.pop().unwrap_or_default()
}

/// Merges two runs, taking from `left` on ties.
fn merge_runs<E, F>(left: Vec<E>, right: Vec<E>, compare: &mut F) -> Vec<E>
where
    F: FnMut(&E, &E) -> Ordering,
{
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut right = right.into_iter().peekable();
    for item in left {
        while let Some(next) = right.next_if(|candidate| compare(&item, candidate) == Ordering::Greater) {
            merged.push(next);
        }
        merged.push(item);
    }
    merged.extend(right);
    merged
}

/// Returns the first position whose record sorts before its predecessor.
pub(crate) fn first_unsorted_position<Id, T, C>(
    ids: &[Id],
    entities: &EntityMap<Id, T>,
    comparer: &C,
) -> Option<usize>
where
    Id: Eq + Hash,
    C: Fn(&T, &T) -> Ordering,
{
    ids.windows(2)
        .position(|pair| match (entities.get(&pair[0]), entities.get(&pair[1])) {
            (Some(left), Some(right)) => comparer(left, right) == Ordering::Greater,
            _ => false,
        })
        .map(|position| position + 1)
}

// =============================================================================
// Tests
// =============================================================================
