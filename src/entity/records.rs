//! Copy-on-write updates of the identifier-to-record map.
//!
//! Each function first decides whether the map changes at all and hands back
//! the original allocation when it does not. Records that compare equal to
//! the stored ones keep their stored pointer.

use std::hash::Hash;

use smallvec::SmallVec;

use super::{EntityMap, IdBuildHasher, ReferenceCounter};

/// Inline capacity for the change lists collected before copying the map.
const INLINE_CHANGES: usize = 8;

/// Returns `true` if `stored` and `candidate` are the same allocation or hold
/// equal records.
#[inline]
pub(crate) fn is_same_entity<T: PartialEq>(
    stored: &ReferenceCounter<T>,
    candidate: &ReferenceCounter<T>,
) -> bool {
    ReferenceCounter::ptr_eq(stored, candidate) || **stored == **candidate
}

/// Returns a map holding `records` without the keys in `to_remove` and with
/// the entries of `to_upsert` laid over it.
///
/// `to_upsert` must not repeat an identifier, and no identifier may appear in
/// both lists. Returns `records` itself when no entry would change.
pub(crate) fn with_entries<Id, T>(
    records: &ReferenceCounter<EntityMap<Id, T>>,
    to_upsert: &[(Id, ReferenceCounter<T>)],
    to_remove: &[Id],
) -> ReferenceCounter<EntityMap<Id, T>>
where
    Id: Clone + Eq + Hash,
    T: PartialEq,
{
    let upserts: SmallVec<[&(Id, ReferenceCounter<T>); INLINE_CHANGES]> = to_upsert
        .iter()
        .filter(|(id, entity)| {
            !records
                .get(id)
                .is_some_and(|stored| is_same_entity(stored, entity))
        })
        .collect();
    let removals: SmallVec<[&Id; INLINE_CHANGES]> =
        to_remove.iter().filter(|id| records.contains_key(*id)).collect();

    if upserts.is_empty() && removals.is_empty() {
        return ReferenceCounter::clone(records);
    }

    let mut next = EntityMap::clone(records);
    for id in removals {
        next.remove(id);
    }
    for (id, entity) in upserts {
        next.insert(id.clone(), ReferenceCounter::clone(entity));
    }
    ReferenceCounter::new(next)
}

/// Returns a map holding exactly `entries`.
///
/// Entries equal to a stored record reuse the stored pointer, and `records`
/// itself is returned when `entries` describes the same content.
/// `entries` must not repeat an identifier.
pub(crate) fn with_all_entries<Id, T>(
    records: &ReferenceCounter<EntityMap<Id, T>>,
    entries: &[(Id, ReferenceCounter<T>)],
) -> ReferenceCounter<EntityMap<Id, T>>
where
    Id: Clone + Eq + Hash,
    T: PartialEq,
{
    let unchanged = entries.len() == records.len()
        && entries.iter().all(|(id, entity)| {
            records
                .get(id)
                .is_some_and(|stored| is_same_entity(stored, entity))
        });
    if unchanged {
        return ReferenceCounter::clone(records);
    }

    let mut next = EntityMap::with_capacity_and_hasher(entries.len(), IdBuildHasher::default());
    for (id, entity) in entries {
        let shared = match records.get(id) {
            Some(stored) if is_same_entity(stored, entity) => ReferenceCounter::clone(stored),
            _ => ReferenceCounter::clone(entity),
        };
        next.insert(id.clone(), shared);
    }
    ReferenceCounter::new(next)
}

/// Returns `original` when `candidate` lists the same identifiers in the same
/// order, and a new allocation holding `candidate` otherwise.
pub(crate) fn share_ids_if_unchanged<Id: PartialEq>(
    original: &ReferenceCounter<Vec<Id>>,
    candidate: Vec<Id>,
) -> ReferenceCounter<Vec<Id>> {
    if **original == candidate {
        ReferenceCounter::clone(original)
    } else {
        ReferenceCounter::new(candidate)
    }
}

// =============================================================================
// Tests
// =============================================================================
