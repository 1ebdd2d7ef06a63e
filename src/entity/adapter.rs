//! Operations on sorted entity states.
//!
//! [`EntityAdapter`] bundles the two functions that define a collection (how
//! to extract an identifier from a record, and how to order two records) and
//! implements every update operation on top of them.
//!
//! # Operations
//!
//! | Operation                    | Effect                                             |
//! |------------------------------|----------------------------------------------------|
//! | `add_one` / `add_many`       | Insert records whose identifiers are new           |
//! | `set_all`                    | Replace the whole collection                       |
//! | `set_one` / `set_many`       | Insert or wholly replace records                   |
//! | `upsert_one` / `upsert_many` | Same as `set_one` / `set_many`                     |
//! | `update_one` / `update_many` | Patch existing records, possibly renaming them     |
//! | `map`                        | Transform every record and resort                  |
//! | `remove_one` / `remove_many` | Delete records by identifier                       |
//! | `remove_all`                 | Delete every record                                |
//!
//! Within a batch, a later entry for an identifier overrides an earlier one.
//!
//! # Referential Stability
//!
//! An operation that changes nothing returns a state for which
//! [`EntityState::ptr_eq`] holds against its input. An operation that only
//! changes record contents without moving any identifier keeps the input's id
//! list allocation.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;

use super::payload::{Changes, Payload, Replace, Update};
use super::{EntityMap, EntityState, EntityStateError, IdBuildHasher, ReferenceCounter};
use super::{ordering, records};

/// A record type that knows its own identifier.
///
/// Implementing this trait lets [`EntityAdapter::sorted_by`] build an adapter
/// without an explicit identifier selector.
///
/// # Examples
///
/// ```rust
/// use entity_adapter::entity::{Entity, EntityAdapter};
///
/// #[derive(Clone, PartialEq)]
/// struct Book {
///     id: u32,
///     title: String,
/// }
///
/// impl Entity for Book {
///     type Id = u32;
///
///     fn id(&self) -> u32 {
///         self.id
///     }
/// }
///
/// let adapter = EntityAdapter::sorted_by(|left: &Book, right: &Book| left.title.cmp(&right.title));
/// assert_eq!(adapter.select_id(&Book { id: 7, title: String::new() }), 7);
/// ```
pub trait Entity {
    /// The identifier type.
    type Id;

    /// Returns this record's identifier.
    fn id(&self) -> Self::Id;
}

/// How the id list is rebuilt after records were patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resort {
    /// Only patched records that left their neighbors are moved.
    Neighbors,
    /// The whole id list is sorted again.
    Full,
}

/// Where the records touched by a batch of patches sit in the input id list.
struct SlotPlacement<Id> {
    /// Final identifier of each patched record and the slot it takes over.
    slots: HashMap<Id, usize, IdBuildHasher>,
    /// Slots whose records were overwritten by a rename.
    vacated: Vec<usize>,
}

/// Applies insert, replace, patch and remove operations to [`EntityState`]s.
///
/// # Type Parameters
///
/// * `T` - The record type.
/// * `Id` - The identifier type.
/// * `S` - The identifier selector, `Fn(&T) -> Id`.
/// * `C` - The comparator, `Fn(&T, &T) -> Ordering`.
///
/// Both functions must be pure. An inconsistent comparator leaves the order
/// of the id list unspecified but never breaks the id list and the entity
/// map apart.
pub struct EntityAdapter<T, Id, S, C> {
    select_id: S,
    sort_comparer: C,
    marker: PhantomData<fn(&T) -> Id>,
}

impl<T, Id, S, C> EntityAdapter<T, Id, S, C>
where
    S: Fn(&T) -> Id,
    C: Fn(&T, &T) -> Ordering,
{
    /// Creates a new adapter from an identifier selector and a comparator.
    pub const fn new(select_id: S, sort_comparer: C) -> Self {
        Self {
            select_id,
            sort_comparer,
            marker: PhantomData,
        }
    }

    /// Returns the identifier of `entity`.
    #[inline]
    pub fn select_id(&self, entity: &T) -> Id {
        (self.select_id)(entity)
    }

    /// Returns the comparator that orders the collection.
    #[inline]
    pub const fn sort_comparer(&self) -> &C {
        &self.sort_comparer
    }
}

impl<T, C> EntityAdapter<T, T::Id, fn(&T) -> T::Id, C>
where
    T: Entity,
    C: Fn(&T, &T) -> Ordering,
{
    /// Creates a new adapter that identifies records through [`Entity::id`].
    pub fn sorted_by(sort_comparer: C) -> Self {
        Self::new(T::id, sort_comparer)
    }
}

impl<T, Id, S, C> EntityAdapter<T, Id, S, C>
where
    Id: Clone + Eq + Hash,
    T: PartialEq,
    S: Fn(&T) -> Id,
    C: Fn(&T, &T) -> Ordering,
{
    /// Returns an empty state.
    #[must_use]
    pub fn initial_state(&self) -> EntityState<Id, T> {
        EntityState::new()
    }

    /// Returns a state holding `entities`, sorted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use entity_adapter::entity::EntityAdapter;
    ///
    /// let adapter = EntityAdapter::new(|value: &i32| *value, |left: &i32, right: &i32| left.cmp(right));
    /// let state = adapter.initial_state_with([3, 1, 2]);
    /// assert_eq!(state.ids(), &[1, 2, 3]);
    /// ```
    #[must_use]
    pub fn initial_state_with<I>(&self, entities: I) -> EntityState<Id, T>
    where
        I: IntoIterator<Item = T>,
    {
        self.set_all(&EntityState::new(), entities.into_iter().collect::<Vec<_>>())
    }

    /// Checks that the id list of `state` is sorted under this adapter's comparator.
    ///
    /// # Errors
    ///
    /// Returns [`EntityStateError::Unsorted`] with the first position whose
    /// record sorts before its predecessor.
    pub fn check_sorted(&self, state: &EntityState<Id, T>) -> Result<(), EntityStateError> {
        ordering::first_unsorted_position(state.ids(), state.entities(), &self.sort_comparer)
            .map_or(Ok(()), |position| Err(EntityStateError::Unsorted { position }))
    }

    /// Returns `state` with its id list stably sorted under this adapter's
    /// comparator.
    ///
    /// Useful for states built with [`EntityState::from_parts`] or deserialized
    /// from storage. An already sorted state is returned unchanged.
    #[must_use]
    pub fn resort(&self, state: &EntityState<Id, T>) -> EntityState<Id, T> {
        let ids = ordering::sort_ids(state.ids().to_vec(), state.entities(), &self.sort_comparer);
        EntityState::from_shared(
            records::share_ids_if_unchanged(state.shared_ids(), ids),
            ReferenceCounter::clone(state.shared_entities()),
        )
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Adds a record unless its identifier is already present.
    ///
    /// An existing record is never overwritten; re-adding a known identifier
    /// returns the input state unchanged.
    #[must_use]
    pub fn add_one(
        &self,
        state: &EntityState<Id, T>,
        entity: impl Into<Payload<T>>,
    ) -> EntityState<Id, T> {
        self.add_entities(state, std::iter::once(entity.into().into_inner()))
    }

    /// Adds every record whose identifier is not already present.
    ///
    /// The new records are sorted among themselves and merged into the
    /// existing order in a single pass.
    #[must_use]
    pub fn add_many(
        &self,
        state: &EntityState<Id, T>,
        entities: impl Into<Payload<Vec<T>>>,
    ) -> EntityState<Id, T> {
        self.add_entities(state, entities.into().into_inner())
    }

    /// Replaces the whole collection with `entities`.
    ///
    /// Records equal to stored ones keep their allocation, and identical
    /// content returns the input state unchanged.
    #[must_use]
    pub fn set_all(
        &self,
        state: &EntityState<Id, T>,
        entities: impl Into<Payload<Vec<T>>>,
    ) -> EntityState<Id, T> {
        let entries = ordering::stable_sort_by(
            self.to_entries(entities.into().into_inner()),
            |(_, left), (_, right)| (self.sort_comparer)(left, right),
        );

        let entities = records::with_all_entries(state.shared_entities(), &entries);
        let ids = records::share_ids_if_unchanged(
            state.shared_ids(),
            entries.into_iter().map(|(id, _)| id).collect(),
        );
        tracing::trace!(
            operation = "set_all",
            count = ids.len(),
            "replaced all entities"
        );
        EntityState::from_shared(ids, entities)
    }

    // =========================================================================
    // Replace
    // =========================================================================

    /// Inserts a record or wholly replaces the stored one.
    #[must_use]
    pub fn set_one(
        &self,
        state: &EntityState<Id, T>,
        entity: impl Into<Payload<T>>,
    ) -> EntityState<Id, T> {
        self.upsert_entities(state, std::iter::once(entity.into().into_inner()))
    }

    /// Inserts records or wholly replaces the stored ones.
    #[must_use]
    pub fn set_many(
        &self,
        state: &EntityState<Id, T>,
        entities: impl Into<Payload<Vec<T>>>,
    ) -> EntityState<Id, T> {
        self.upsert_entities(state, entities.into().into_inner())
    }

    /// Inserts a record or wholly replaces the stored one.
    ///
    /// A replaced record is removed from its position and reinserted, since a
    /// new record may sort anywhere.
    #[must_use]
    pub fn upsert_one(
        &self,
        state: &EntityState<Id, T>,
        entity: impl Into<Payload<T>>,
    ) -> EntityState<Id, T> {
        self.upsert_entities(state, std::iter::once(entity.into().into_inner()))
    }

    /// Inserts records or wholly replaces the stored ones.
    #[must_use]
    pub fn upsert_many(
        &self,
        state: &EntityState<Id, T>,
        entities: impl Into<Payload<Vec<T>>>,
    ) -> EntityState<Id, T> {
        self.upsert_entities(state, entities.into().into_inner())
    }

    // =========================================================================
    // Patch
    // =========================================================================

    /// Applies a patch to the record stored under `update.id`.
    ///
    /// Absent identifiers and empty patches are ignored. A patched record
    /// that still fits between its neighbors keeps the id list allocation; one
    /// that does not is moved to its new sorted position. A patch may change
    /// the record's identifier, which moves the record to the new key.
    #[must_use]
    pub fn update_one<Ch>(
        &self,
        state: &EntityState<Id, T>,
        update: impl Into<Payload<Update<Id, Ch>>>,
    ) -> EntityState<Id, T>
    where
        Ch: Changes<T>,
    {
        self.apply_updates(state, std::iter::once(update.into().into_inner()), Resort::Neighbors)
    }

    /// Applies patches in order.
    ///
    /// Patches see the effect of earlier patches in the same batch, so two
    /// patches for one identifier compose and the later one wins on conflicting
    /// fields. A rename onto an identifier that is already in use replaces
    /// the record stored there.
    #[must_use]
    pub fn update_many<Ch>(
        &self,
        state: &EntityState<Id, T>,
        updates: impl Into<Payload<Vec<Update<Id, Ch>>>>,
    ) -> EntityState<Id, T>
    where
        Ch: Changes<T>,
    {
        self.apply_updates(state, updates.into().into_inner(), Resort::Neighbors)
    }

    /// Transforms every record and sorts the result again.
    ///
    /// Records for which `transform` returns an equal value keep their
    /// allocation, and the id list allocation is kept when the order does not
    /// change.
    #[must_use]
    pub fn map<F>(&self, state: &EntityState<Id, T>, mut transform: F) -> EntityState<Id, T>
    where
        F: FnMut(&T) -> T,
    {
        let updates: Vec<Update<Id, Replace<T>>> = state
            .iter()
            .map(|(id, entity)| Update::new(id.clone(), Replace(transform(entity))))
            .collect();
        self.apply_updates(state, updates, Resort::Full)
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes the record stored under `id`, if any.
    #[must_use]
    pub fn remove_one(
        &self,
        state: &EntityState<Id, T>,
        id: impl Into<Payload<Id>>,
    ) -> EntityState<Id, T> {
        self.remove_ids(state, std::iter::once(id.into().into_inner()))
    }

    /// Removes the records stored under `ids`; absent identifiers are ignored.
    #[must_use]
    pub fn remove_many(
        &self,
        state: &EntityState<Id, T>,
        ids: impl Into<Payload<Vec<Id>>>,
    ) -> EntityState<Id, T> {
        self.remove_ids(state, ids.into().into_inner())
    }

    /// Removes every record.
    ///
    /// An already empty state is returned unchanged.
    #[must_use]
    pub fn remove_all(&self, state: &EntityState<Id, T>) -> EntityState<Id, T> {
        if state.is_empty() && state.entities().is_empty() {
            return state.clone();
        }
        tracing::trace!(
            operation = "remove_all",
            removed = state.len(),
            "removed all entities"
        );
        EntityState::new()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Pairs each record with its identifier, keeping the first position and
    /// the last record for repeated identifiers.
    fn to_entries<I>(&self, entities: I) -> Vec<(Id, ReferenceCounter<T>)>
    where
        I: IntoIterator<Item = T>,
    {
        let entities = entities.into_iter();
        let mut positions: HashMap<Id, usize, IdBuildHasher> =
            HashMap::with_capacity_and_hasher(entities.size_hint().0, IdBuildHasher::default());
        let mut entries: Vec<(Id, ReferenceCounter<T>)> = Vec::with_capacity(positions.capacity());

        for entity in entities {
            let entity = ReferenceCounter::new(entity);
            match positions.entry(self.select_id(&entity)) {
                Entry::Occupied(slot) => entries[*slot.get()].1 = entity,
                Entry::Vacant(slot) => {
                    entries.push((slot.key().clone(), entity));
                    slot.insert(entries.len() - 1);
                }
            }
        }
        entries
    }

    fn add_entities<I>(&self, state: &EntityState<Id, T>, entities: I) -> EntityState<Id, T>
    where
        I: IntoIterator<Item = T>,
    {
        let added: Vec<(Id, ReferenceCounter<T>)> = self
            .to_entries(entities)
            .into_iter()
            .filter(|(id, _)| !state.contains(id))
            .collect();
        if added.is_empty() {
            return state.clone();
        }

        let entities = records::with_entries(state.shared_entities(), &added, &[]);
        let count = added.len();
        let ids = ordering::merge_insert_many(state.ids(), &entities, &self.sort_comparer, added);
        tracing::trace!(operation = "add", added = count, "added entities");
        EntityState::from_shared(ReferenceCounter::new(ids), entities)
    }

    fn upsert_entities<I>(&self, state: &EntityState<Id, T>, entities: I) -> EntityState<Id, T>
    where
        I: IntoIterator<Item = T>,
    {
        let original = state.shared_entities();
        let changed: Vec<(Id, ReferenceCounter<T>)> = self
            .to_entries(entities)
            .into_iter()
            .filter(|(id, entity)| {
                !original
                    .get(id)
                    .is_some_and(|stored| records::is_same_entity(stored, entity))
            })
            .collect();
        if changed.is_empty() {
            return state.clone();
        }

        let entities = records::with_entries(original, &changed, &[]);
        let (remainder, replaced_count) = {
            let replaced: HashSet<&Id, IdBuildHasher> = changed
                .iter()
                .map(|(id, _)| id)
                .filter(|id| original.contains_key(*id))
                .collect();
            let remainder: Option<Vec<Id>> = (!replaced.is_empty()).then(|| {
                state
                    .ids()
                    .iter()
                    .filter(|id| !replaced.contains(id))
                    .cloned()
                    .collect()
            });
            (remainder, replaced.len())
        };

        // Replaced records leave their slots and are merged back like new ones.
        let ids = ordering::merge_insert_many(
            remainder.as_deref().unwrap_or(state.ids()),
            &entities,
            &self.sort_comparer,
            changed,
        );
        let ids = records::share_ids_if_unchanged(state.shared_ids(), ids);
        tracing::trace!(
            operation = "upsert",
            replaced = replaced_count,
            ids_reused = ReferenceCounter::ptr_eq(&ids, state.shared_ids()),
            "upserted entities"
        );
        EntityState::from_shared(ids, entities)
    }

    fn remove_ids<I>(&self, state: &EntityState<Id, T>, ids: I) -> EntityState<Id, T>
    where
        I: IntoIterator<Item = Id>,
    {
        let removed: Vec<Id> = ids.into_iter().filter(|id| state.contains(id)).collect();
        if removed.is_empty() {
            return state.clone();
        }

        let entities = records::with_entries(state.shared_entities(), &[], &removed);
        let ids: Vec<Id> = state
            .ids()
            .iter()
            .filter(|id| entities.contains_key(*id))
            .cloned()
            .collect();
        tracing::trace!(
            operation = "remove",
            removed = state.len() - ids.len(),
            "removed entities"
        );
        EntityState::from_shared(ReferenceCounter::new(ids), entities)
    }

    fn apply_updates<I, Ch>(
        &self,
        state: &EntityState<Id, T>,
        updates: I,
        resort: Resort,
    ) -> EntityState<Id, T>
    where
        I: IntoIterator<Item = Update<Id, Ch>>,
        Ch: Changes<T>,
    {
        let original = state.shared_entities();

        // Pending writes on top of `original`; `None` marks a removed key.
        let mut overlay: HashMap<Id, Option<ReferenceCounter<T>>, IdBuildHasher> =
            HashMap::with_hasher(IdBuildHasher::default());
        let mut touched: Vec<Id> = Vec::new();
        let mut relocations: Vec<(Id, Id)> = Vec::new();

        let mut stage = |overlay: &mut HashMap<Id, Option<ReferenceCounter<T>>, IdBuildHasher>,
                         id: Id,
                         entity: Option<ReferenceCounter<T>>| {
            if overlay.insert(id.clone(), entity).is_none() {
                touched.push(id);
            }
        };

        for Update { id, changes } in updates {
            if changes.is_empty() {
                continue;
            }
            let current = match overlay.get(&id) {
                Some(pending) => pending.clone(),
                None => original.get(&id).cloned(),
            };
            let Some(current) = current else {
                continue;
            };

            let updated = changes.apply(&current);
            let new_id = self.select_id(&updated);
            if new_id == id && updated == *current {
                continue;
            }
            if new_id != id {
                stage(&mut overlay, id.clone(), None);
            }
            stage(&mut overlay, new_id.clone(), Some(ReferenceCounter::new(updated)));
            relocations.push((id, new_id));
        }

        let mut upserts: Vec<(Id, ReferenceCounter<T>)> = Vec::new();
        let mut removals: Vec<Id> = Vec::new();
        for id in &touched {
            match overlay.get(id) {
                Some(Some(entity)) => upserts.push((id.clone(), ReferenceCounter::clone(entity))),
                Some(None) => removals.push(id.clone()),
                None => {}
            }
        }

        let entities = records::with_entries(original, &upserts, &removals);
        if ReferenceCounter::ptr_eq(&entities, original) {
            return state.clone();
        }

        let ids = match resort {
            Resort::Neighbors => self.relocate(state, &entities, &relocations, &touched),
            Resort::Full => self.sort_all(state, &entities, &upserts),
        };
        EntityState::from_shared(ids, entities)
    }

    /// Rebuilds the id list after patches, moving only the records that no
    /// longer fit between their neighbors.
    ///
    /// Patched records first take over the slots their previous versions
    /// held. Records that still fit there stay put, so ties among them keep
    /// their existing order. The rest are merged back in sorted position.
    fn relocate(
        &self,
        state: &EntityState<Id, T>,
        entities: &EntityMap<Id, T>,
        relocations: &[(Id, Id)],
        touched: &[Id],
    ) -> ReferenceCounter<Vec<Id>> {
        let Some(SlotPlacement { slots, vacated }) = self.track_slots(state, relocations) else {
            return self.merge_touched(state, entities, touched);
        };

        let ids = state.ids();
        let renamed = relocations.iter().any(|(old_id, new_id)| old_id != new_id);
        let candidate: Cow<'_, [Id]> = if renamed {
            let mut placed: Vec<Option<Id>> = ids.iter().cloned().map(Some).collect();
            for slot in &vacated {
                placed[*slot] = None;
            }
            for (id, slot) in &slots {
                placed[*slot] = Some(id.clone());
            }
            Cow::Owned(placed.into_iter().flatten().collect())
        } else {
            Cow::Borrowed(ids)
        };

        let mut moving = self.outliers(&candidate, entities, &slots);
        let mut remainder: Cow<'_, [Id]> = Cow::Borrowed(&candidate);
        // Records kept in their slots must also stay ordered among themselves.
        loop {
            if !moving.is_empty() {
                remainder = Cow::Owned(
                    candidate
                        .iter()
                        .filter(|id| !moving.contains(*id))
                        .cloned()
                        .collect(),
                );
            }
            let misplaced: Vec<Id> = self.misplaced(&remainder, entities, &slots).collect();
            if misplaced.is_empty() {
                break;
            }
            moving.extend(misplaced);
        }

        if moving.is_empty() {
            tracing::trace!(
                operation = "update",
                patched = slots.len(),
                renamed,
                "patched entities kept their positions"
            );
            return match candidate {
                Cow::Borrowed(_) => ReferenceCounter::clone(state.shared_ids()),
                Cow::Owned(renamed_ids) => {
                    records::share_ids_if_unchanged(state.shared_ids(), renamed_ids)
                }
            };
        }

        let incoming: Vec<(Id, ReferenceCounter<T>)> = touched
            .iter()
            .filter(|id| moving.contains(*id))
            .filter_map(|id| {
                entities
                    .get(id)
                    .map(|entity| (id.clone(), ReferenceCounter::clone(entity)))
            })
            .collect();
        tracing::trace!(
            operation = "update",
            patched = slots.len(),
            moved = incoming.len(),
            "patched entities merged into new positions"
        );
        let merged =
            ordering::merge_insert_many(&remainder, entities, &self.sort_comparer, incoming);
        records::share_ids_if_unchanged(state.shared_ids(), merged)
    }

    /// Returns the patched identifiers in `ids` that no longer fit between the
    /// nearest unpatched records around their slot.
    fn outliers(
        &self,
        ids: &[Id],
        entities: &EntityMap<Id, T>,
        slots: &HashMap<Id, usize, IdBuildHasher>,
    ) -> HashSet<Id, IdBuildHasher> {
        let entity_of = |id: &Id| entities.get(id).map(|entity| &**entity);

        let mut after: Vec<Option<&T>> = vec![None; ids.len()];
        let mut next = None;
        for (position, id) in ids.iter().enumerate().rev() {
            after[position] = next;
            if !slots.contains_key(id) {
                next = entity_of(id);
            }
        }

        let mut outliers = HashSet::with_hasher(IdBuildHasher::default());
        let mut before = None;
        for (position, id) in ids.iter().enumerate() {
            if !slots.contains_key(id) {
                before = entity_of(id);
                continue;
            }
            let moved = entity_of(id).is_none_or(|entity| {
                ordering::did_entity_move(&self.sort_comparer, entity, before, after[position])
            });
            if moved {
                outliers.insert(id.clone());
            }
        }
        outliers
    }

    /// Returns the patched identifiers in `ids` that sit out of order.
    fn misplaced<'a>(
        &'a self,
        ids: &'a [Id],
        entities: &'a EntityMap<Id, T>,
        slots: &'a HashMap<Id, usize, IdBuildHasher>,
    ) -> impl Iterator<Item = Id> + 'a {
        ids.iter()
            .enumerate()
            .filter(move |(position, id)| {
                slots.contains_key(*id)
                    && !ordering::is_in_place(ids, entities, &self.sort_comparer, *position)
            })
            .map(|(_, id)| id.clone())
    }

    /// Removes every patched identifier and merges the patched records back.
    ///
    /// Used when the slots of the patched records cannot be recovered.
    fn merge_touched(
        &self,
        state: &EntityState<Id, T>,
        entities: &EntityMap<Id, T>,
        touched: &[Id],
    ) -> ReferenceCounter<Vec<Id>> {
        let touched_set: HashSet<&Id, IdBuildHasher> = touched.iter().collect();
        let remainder: Vec<Id> = state
            .ids()
            .iter()
            .filter(|id| !touched_set.contains(id))
            .cloned()
            .collect();
        let moved: Vec<(Id, ReferenceCounter<T>)> = touched
            .iter()
            .filter_map(|id| {
                entities
                    .get(id)
                    .map(|entity| (id.clone(), ReferenceCounter::clone(entity)))
            })
            .collect();
        tracing::trace!(
            operation = "update",
            moved = moved.len(),
            "patched entities merged without slot tracking"
        );
        let merged =
            ordering::merge_insert_many(&remainder, entities, &self.sort_comparer, moved);
        records::share_ids_if_unchanged(state.shared_ids(), merged)
    }

    /// Follows `relocations` through the input id list.
    ///
    /// Each final identifier is mapped to the slot its record held before the
    /// batch. A rename onto a live identifier vacates that identifier's slot.
    /// Returns `None` if a patched identifier is missing from the input state.
    fn track_slots(
        &self,
        state: &EntityState<Id, T>,
        relocations: &[(Id, Id)],
    ) -> Option<SlotPlacement<Id>> {
        let locate = |id: &Id| {
            ordering::position_of(state.ids(), state.entities(), &self.sort_comparer, id)
        };
        let mut slots: HashMap<Id, usize, IdBuildHasher> =
            HashMap::with_capacity_and_hasher(relocations.len(), IdBuildHasher::default());
        let mut departed: HashSet<Id, IdBuildHasher> =
            HashSet::with_hasher(IdBuildHasher::default());
        let mut vacated: Vec<usize> = Vec::new();

        for (old_id, new_id) in relocations {
            let slot = match slots.remove(old_id) {
                Some(slot) => slot,
                None => locate(old_id)?,
            };
            if old_id != new_id {
                departed.insert(old_id.clone());
                let overwritten = match slots.remove(new_id) {
                    Some(slot) => Some(slot),
                    None if state.contains(new_id) && !departed.contains(new_id) => {
                        Some(locate(new_id)?)
                    }
                    None => None,
                };
                vacated.extend(overwritten);
            }
            slots.insert(new_id.clone(), slot);
        }
        Some(SlotPlacement { slots, vacated })
    }

    /// Sorts the whole id list against the patched records.
    fn sort_all(
        &self,
        state: &EntityState<Id, T>,
        entities: &EntityMap<Id, T>,
        upserts: &[(Id, ReferenceCounter<T>)],
    ) -> ReferenceCounter<Vec<Id>> {
        let mut ids: Vec<Id> = state
            .ids()
            .iter()
            .filter(|id| entities.contains_key(*id))
            .cloned()
            .collect();
        ids.extend(
            upserts
                .iter()
                .filter(|(id, _)| !state.contains(id))
                .map(|(id, _)| id.clone()),
        );
        let ids = records::share_ids_if_unchanged(
            state.shared_ids(),
            ordering::sort_ids(ids, entities, &self.sort_comparer),
        );
        tracing::trace!(
            operation = "map",
            changed = upserts.len(),
            ids_reused = ReferenceCounter::ptr_eq(&ids, state.shared_ids()),
            "resorted all entities"
        );
        ids
    }
}

impl<T, Id, S: Clone, C: Clone> Clone for EntityAdapter<T, Id, S, C> {
    fn clone(&self) -> Self {
        Self {
            select_id: self.select_id.clone(),
            sort_comparer: self.sort_comparer.clone(),
            marker: PhantomData,
        }
    }
}

impl<T, Id, S, C> std::fmt::Debug for EntityAdapter<T, Id, S, C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("EntityAdapter").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        rank: i32,
        revision: u32,
    }

    const fn item(id: u32, rank: i32) -> Item {
        Item {
            id,
            rank,
            revision: 0,
        }
    }

    fn by_rank(left: &Item, right: &Item) -> Ordering {
        left.rank.cmp(&right.rank)
    }

    fn adapter() -> EntityAdapter<Item, u32, fn(&Item) -> u32, fn(&Item, &Item) -> Ordering> {
        EntityAdapter::new(|item: &Item| item.id, by_rank)
    }

    /// Single-field patch for an [`Item`].
    #[derive(Debug, Clone)]
    enum Patch {
        Rank(i32),
        Rename(u32),
        /// Bumps the revision without touching the sort key.
        Touch,
    }

    use Patch::{Rank, Rename, Touch};

    impl Changes<Item> for Patch {
        fn apply(self, entity: &Item) -> Item {
            let mut patched = entity.clone();
            match self {
                Rank(rank) => patched.rank = rank,
                Rename(id) => patched.id = id,
                Touch => patched.revision += 1,
            }
            patched
        }
    }

    struct Nothing;

    impl Changes<Item> for Nothing {
        fn apply(self, entity: &Item) -> Item {
            entity.clone()
        }

        fn is_empty(&self) -> bool {
            true
        }
    }

    fn seeded() -> EntityState<u32, Item> {
        adapter().set_all(
            &EntityState::new(),
            vec![item(1, 10), item(2, 20), item(3, 30), item(4, 40)],
        )
    }

    #[rstest]
    fn test_to_entries_later_record_wins_first_position_kept() {
        let entries = adapter().to_entries(vec![item(1, 10), item(2, 20), item(1, 99)]);
        let flattened: Vec<(u32, i32)> =
            entries.iter().map(|(id, entity)| (*id, entity.rank)).collect();
        assert_eq!(flattened, vec![(1, 99), (2, 20)]);
    }

    #[rstest]
    fn test_add_many_duplicate_in_batch_later_wins() {
        let state = adapter().add_many(&EntityState::new(), vec![item(1, 10), item(1, 5)]);
        assert_eq!(state.get(&1), Some(&item(1, 5)));
        assert_eq!(state.len(), 1);
    }

    #[rstest]
    fn test_update_in_place_keeps_ids_and_other_records() {
        let state = seeded();
        let updated = adapter().update_one(&state, Update::new(2, Rank(25)));

        assert!(updated.shares_ids_with(&state));
        assert!(!updated.shares_entities_with(&state));
        assert_eq!(updated.get(&2), Some(&item(2, 25)));
        assert!(ReferenceCounter::ptr_eq(
            state.get_shared(&1).unwrap(),
            updated.get_shared(&1).unwrap()
        ));
    }

    #[rstest]
    fn test_update_moving_record_relocates_it() {
        let state = seeded();
        let updated = adapter().update_one(&state, Update::new(1, Rank(35)));
        assert_eq!(updated.ids(), &[2, 3, 1, 4]);
        assert_eq!(adapter().check_sorted(&updated), Ok(()));
    }

    #[rstest]
    fn test_update_empty_changes_is_noop() {
        let state = seeded();
        let updated = adapter().update_one(&state, Update::new(1, Nothing));
        assert!(updated.ptr_eq(&state));
    }

    #[rstest]
    fn test_update_equal_content_is_noop() {
        let state = seeded();
        let updated = adapter().update_one(&state, Update::new(3, Rank(30)));
        assert!(updated.ptr_eq(&state));
    }

    #[rstest]
    fn test_update_many_same_id_composes_and_last_wins() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(1, Rank(50)), Update::new(1, Rank(15))],
        );
        assert_eq!(updated.get(&1), Some(&item(1, 15)));
        assert_eq!(updated.ids(), &[1, 2, 3, 4]);
        assert!(updated.shares_ids_with(&state));
    }

    #[rstest]
    fn test_update_many_crossing_records_resorts_correctly() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(1, Rank(50)), Update::new(2, Rank(60))],
        );
        assert_eq!(updated.ids(), &[3, 4, 1, 2]);
        assert_eq!(adapter().check_sorted(&updated), Ok(()));
    }

    #[rstest]
    fn test_update_many_adjacent_records_moving_together() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(1, Rank(50)), Update::new(2, Rank(45))],
        );
        assert_eq!(updated.ids(), &[3, 4, 2, 1]);
        assert_eq!(adapter().check_sorted(&updated), Ok(()));
    }

    #[rstest]
    #[case::tie_before_leaving_record(
        vec![item(1, 20), item(2, 20), item(3, 30)],
        vec![(1, Touch), (3, Rank(0))],
        vec![3, 1, 2]
    )]
    #[case::tie_run_around_leaving_record(
        vec![item(1, 20), item(2, 20), item(3, 20), item(4, 20)],
        vec![(2, Touch), (3, Rank(0))],
        vec![3, 1, 2, 4]
    )]
    #[case::renamed_tie_before_leaving_record(
        vec![item(1, 20), item(2, 20), item(3, 30)],
        vec![(1, Rename(5)), (3, Rank(0))],
        vec![3, 5, 2]
    )]
    fn test_update_many_matches_sequential_updates(
        #[case] entities: Vec<Item>,
        #[case] patches: Vec<(u32, Patch)>,
        #[case] expected: Vec<u32>,
    ) {
        let state = adapter().set_all(&EntityState::new(), entities);
        let batched = adapter().update_many(
            &state,
            patches
                .iter()
                .cloned()
                .map(|(id, patch)| Update::new(id, patch))
                .collect::<Vec<_>>(),
        );
        let sequential = patches.into_iter().fold(state, |current, (id, patch)| {
            adapter().update_one(&current, Update::new(id, patch))
        });

        assert_eq!(batched.ids(), expected.as_slice());
        assert_eq!(batched, sequential);
    }

    #[rstest]
    fn test_update_many_stays_put_when_neighbor_leaves() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(2, Touch), Update::new(3, Rank(5))],
        );
        assert_eq!(updated.ids(), &[3, 1, 2, 4]);
        assert_eq!(adapter().check_sorted(&updated), Ok(()));
    }

    #[rstest]
    fn test_rename_in_place_replaces_slot() {
        let state = seeded();
        let updated = adapter().update_one(&state, Update::new(2, Rename(9)));

        assert_eq!(updated.ids(), &[1, 9, 3, 4]);
        assert!(!updated.contains(&2));
        assert_eq!(updated.get(&9), Some(&item(9, 20)));
    }

    #[rstest]
    fn test_rename_onto_existing_identifier_overwrites_it() {
        let state = seeded();
        let updated = adapter().update_one(&state, Update::new(1, Rename(3)));

        assert_eq!(updated.ids(), &[3, 2, 4]);
        assert_eq!(updated.get(&3), Some(&item(3, 10)));
        assert!(!updated.contains(&1));
        assert_eq!(updated.len(), updated.entities().len());
    }

    #[rstest]
    fn test_rename_chain_in_one_batch() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(1, Rename(7)), Update::new(7, Rename(8))],
        );
        assert_eq!(updated.ids(), &[8, 2, 3, 4]);
        assert_eq!(updated.get(&8), Some(&item(8, 10)));
    }

    #[rstest]
    fn test_rename_back_and_forth_restores_content() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(1, Rename(7)), Update::new(7, Rename(1))],
        );
        assert_eq!(updated, state);
        assert!(updated.ptr_eq(&state));
    }

    #[rstest]
    fn test_update_targeting_renamed_away_identifier_is_ignored() {
        let state = seeded();
        let updated = adapter().update_many(
            &state,
            vec![Update::new(1, Rename(7)), Update::new(1, Rank(99))],
        );
        assert_eq!(updated.get(&7), Some(&item(7, 10)));
        assert_eq!(updated.ids(), &[7, 2, 3, 4]);
    }

    #[rstest]
    fn test_upsert_equal_record_is_noop() {
        let state = seeded();
        let upserted = adapter().upsert_one(&state, item(2, 20));
        assert!(upserted.ptr_eq(&state));
    }

    #[rstest]
    fn test_upsert_replacement_in_same_position_keeps_ids() {
        let state = seeded();
        let upserted = adapter().upsert_one(&state, item(2, 21));
        assert!(upserted.shares_ids_with(&state));
        assert_eq!(upserted.get(&2), Some(&item(2, 21)));
    }

    #[rstest]
    fn test_set_many_replaces_and_inserts() {
        let state = seeded();
        let updated = adapter().set_many(&state, vec![item(4, 5), item(5, 25)]);
        assert_eq!(updated.ids(), &[4, 1, 2, 5, 3]);
    }

    #[rstest]
    fn test_map_resorts_and_keeps_unchanged_records() {
        let state = seeded();
        let mapped = adapter().map(&state, |entity| {
            if entity.id == 1 {
                item(1, 100)
            } else {
                entity.clone()
            }
        });
        assert_eq!(mapped.ids(), &[2, 3, 4, 1]);
        assert!(ReferenceCounter::ptr_eq(
            state.get_shared(&4).unwrap(),
            mapped.get_shared(&4).unwrap()
        ));
    }

    #[rstest]
    fn test_map_identity_is_noop() {
        let state = seeded();
        let mapped = adapter().map(&state, Item::clone);
        assert!(mapped.ptr_eq(&state));
    }

    #[rstest]
    fn test_map_keeping_order_reuses_ids() {
        let state = seeded();
        let mapped = adapter().map(&state, |entity| item(entity.id, entity.rank + 1));
        assert!(mapped.shares_ids_with(&state));
        assert!(!mapped.shares_entities_with(&state));
    }

    #[rstest]
    fn test_remove_all_on_empty_is_noop() {
        let state: EntityState<u32, Item> = EntityState::new();
        assert!(adapter().remove_all(&state).ptr_eq(&state));
    }

    #[rstest]
    fn test_resort_sorts_unsorted_state() {
        let state =
            EntityState::from_parts(vec![2, 1], vec![(1, item(1, 10)), (2, item(2, 20))]).unwrap();
        assert_eq!(
            adapter().check_sorted(&state),
            Err(EntityStateError::Unsorted { position: 1 })
        );

        let sorted = adapter().resort(&state);
        assert_eq!(sorted.ids(), &[1, 2]);
        assert!(sorted.shares_entities_with(&state));
        assert!(adapter().resort(&sorted).ptr_eq(&sorted));
    }

    #[rstest]
    fn test_inconsistent_comparator_never_loses_records() {
        let seed = std::cell::Cell::new(0x9E37_79B9_7F4A_7C15_u64);
        let coin = move |_: &Item, _: &Item| {
            let mut state = seed.get();
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            seed.set(state);
            match state % 3 {
                0 => Ordering::Less,
                1 => Ordering::Equal,
                _ => Ordering::Greater,
            }
        };
        let adapter = EntityAdapter::new(|item: &Item| item.id, coin);
        let items = |offset: u32| (0..64).map(move |id| item(id + offset, 0)).collect::<Vec<_>>();

        let state = adapter.set_all(&EntityState::new(), items(0));
        let state = adapter.add_many(&state, items(32));
        let state = adapter.upsert_many(&state, items(64));
        let state = adapter.map(&state, |entity| item(entity.id, entity.rank + 1));
        let state = adapter.update_many(
            &state,
            (0..16).map(|id| Update::new(id * 8, Rank(-1))).collect::<Vec<_>>(),
        );
        let state = adapter.resort(&state);

        let mut ids = state.ids().to_vec();
        ids.sort_unstable();
        assert_eq!(ids, (0..128).collect::<Vec<u32>>());
        assert_eq!(state.len(), state.entities().len());
    }

    #[rstest]
    #[case::empty(vec![], vec![])]
    #[case::single(vec![item(1, 1)], vec![1])]
    #[case::reversed(vec![item(1, 3), item(2, 2), item(3, 1)], vec![3, 2, 1])]
    #[case::ties_keep_input_order(vec![item(1, 5), item(2, 1), item(3, 5)], vec![2, 1, 3])]
    fn test_initial_state_with_sorts(#[case] entities: Vec<Item>, #[case] expected: Vec<u32>) {
        assert_eq!(adapter().initial_state_with(entities).ids(), expected.as_slice());
    }
}
