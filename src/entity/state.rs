//! The normalized collection value threaded through adapter operations.
//!
//! [`EntityState`] pairs an ordered identifier list with a map from
//! identifier to record. Both halves sit behind a [`ReferenceCounter`], so
//! cloning a state is two reference-count increments and two states can be
//! compared by identity as well as by content.
//!
//! # Invariants
//!
//! - The id list has no duplicates and names exactly the keys of the map.
//! - The id list is sorted under the adapter's comparator.
//!
//! Adapter operations keep both. [`EntityState::from_parts`] checks only the
//! first; the order of a state built from parts is checked with
//! [`EntityAdapter::check_sorted`](super::EntityAdapter::check_sorted).

use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;

use super::{EntityMap, EntityStateError, IdBuildHasher, ReferenceCounter};

/// An immutable sorted collection of uniquely identified records.
///
/// # Type Parameters
///
/// * `Id` - The identifier type extracted from each record.
/// * `T` - The record type.
///
/// # Examples
///
/// ```rust
/// use entity_adapter::entity::EntityState;
///
/// let state = EntityState::from_parts(vec![2, 1], vec![(1, "one"), (2, "two")]).unwrap();
///
/// assert_eq!(state.len(), 2);
/// assert_eq!(state.get(&1), Some(&"one"));
///
/// // Iteration follows the id list
/// let values: Vec<&&str> = state.values().collect();
/// assert_eq!(values, vec![&"two", &"one"]);
/// ```
pub struct EntityState<Id, T> {
    ids: ReferenceCounter<Vec<Id>>,
    entities: ReferenceCounter<EntityMap<Id, T>>,
}

impl<Id, T> EntityState<Id, T> {
    /// Creates a new empty state.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use entity_adapter::entity::EntityState;
    ///
    /// let state: EntityState<u32, String> = EntityState::new();
    /// assert!(state.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: ReferenceCounter::new(Vec::new()),
            entities: ReferenceCounter::new(EntityMap::with_hasher(IdBuildHasher::default())),
        }
    }

    pub(crate) const fn from_shared(
        ids: ReferenceCounter<Vec<Id>>,
        entities: ReferenceCounter<EntityMap<Id, T>>,
    ) -> Self {
        Self { ids, entities }
    }

    pub(crate) const fn shared_ids(&self) -> &ReferenceCounter<Vec<Id>> {
        &self.ids
    }

    pub(crate) const fn shared_entities(&self) -> &ReferenceCounter<EntityMap<Id, T>> {
        &self.entities
    }

    /// Returns the identifiers in sorted order.
    #[inline]
    #[must_use]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    /// Returns the identifier-to-record map.
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &EntityMap<Id, T> {
        &self.entities
    }

    /// Returns the number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the state holds no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `true` if both states share the same id list and the same
    /// entity map allocation.
    ///
    /// Adapter operations that have no effect return a state for which this
    /// holds against their input.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use entity_adapter::entity::EntityState;
    ///
    /// let state: EntityState<u32, String> = EntityState::new();
    /// let copy = state.clone();
    /// assert!(state.ptr_eq(&copy));
    /// assert!(!state.ptr_eq(&EntityState::new()));
    /// ```
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.shares_ids_with(other) && self.shares_entities_with(other)
    }

    /// Returns `true` if both states share the same id list allocation.
    #[inline]
    #[must_use]
    pub fn shares_ids_with(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.ids, &other.ids)
    }

    /// Returns `true` if both states share the same entity map allocation.
    #[inline]
    #[must_use]
    pub fn shares_entities_with(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.entities, &other.entities)
    }

    /// Returns an iterator over `(id, record)` pairs in sorted order.
    #[inline]
    #[must_use]
    pub fn iter(&self) -> EntityStateIterator<'_, Id, T>
    where
        Id: Eq + Hash,
    {
        EntityStateIterator {
            ids: self.ids.iter(),
            entities: &self.entities,
        }
    }

    /// Returns an iterator over the records in sorted order.
    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &T>
    where
        Id: Eq + Hash,
    {
        self.iter().map(|(_, entity)| entity)
    }
}

impl<Id: Eq + Hash, T> EntityState<Id, T> {
    /// Returns the record stored under `id`.
    ///
    /// Supports borrowed forms of the identifier, so an `EntityState<String, _>`
    /// can be queried with a `&str`.
    #[inline]
    #[must_use]
    pub fn get<Q>(&self, id: &Q) -> Option<&T>
    where
        Id: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entities.get(id).map(|entity| &**entity)
    }

    /// Returns the shared pointer to the record stored under `id`.
    ///
    /// Useful for checking whether an operation kept a record's allocation.
    #[inline]
    #[must_use]
    pub fn get_shared<Q>(&self, id: &Q) -> Option<&ReferenceCounter<T>>
    where
        Id: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entities.get(id)
    }

    /// Returns `true` if a record is stored under `id`.
    #[inline]
    #[must_use]
    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        Id: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entities.contains_key(id)
    }
}

impl<Id: Clone + Eq + Hash, T> EntityState<Id, T> {
    /// Builds a state from an id list and its records, validating that they
    /// describe the same set of identifiers.
    ///
    /// The order of `ids` is kept as given; use
    /// [`EntityAdapter::check_sorted`](super::EntityAdapter::check_sorted) to
    /// verify it against a comparator.
    ///
    /// # Errors
    ///
    /// - [`EntityStateError::DuplicateId`] if an identifier repeats in `ids`
    /// - [`EntityStateError::MissingEntity`] if an identifier has no record
    /// - [`EntityStateError::OrphanedEntities`] if records exist for identifiers
    ///   that are not in `ids`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use entity_adapter::entity::{EntityState, EntityStateError};
    ///
    /// let state = EntityState::from_parts(vec!["a"], vec![("a", 1)]).unwrap();
    /// assert_eq!(state.ids(), &["a"]);
    ///
    /// let orphaned = EntityState::from_parts(vec!["a"], vec![("a", 1), ("b", 2)]);
    /// assert_eq!(orphaned.unwrap_err(), EntityStateError::OrphanedEntities { count: 1 });
    /// ```
    pub fn from_parts<I>(ids: Vec<Id>, entities: I) -> Result<Self, EntityStateError>
    where
        I: IntoIterator<Item = (Id, T)>,
    {
        let entities: EntityMap<Id, T> = entities
            .into_iter()
            .map(|(id, entity)| (id, ReferenceCounter::new(entity)))
            .collect();

        {
            let mut seen: HashSet<&Id, IdBuildHasher> =
                HashSet::with_capacity_and_hasher(ids.len(), IdBuildHasher::default());
            for (position, id) in ids.iter().enumerate() {
                if !seen.insert(id) {
                    return Err(EntityStateError::DuplicateId { position });
                }
                if !entities.contains_key(id) {
                    return Err(EntityStateError::MissingEntity { position });
                }
            }
        }

        if entities.len() > ids.len() {
            return Err(EntityStateError::OrphanedEntities {
                count: entities.len() - ids.len(),
            });
        }

        Ok(Self::from_shared(
            ReferenceCounter::new(ids),
            ReferenceCounter::new(entities),
        ))
    }
}

impl<Id, T> Clone for EntityState<Id, T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            ids: ReferenceCounter::clone(&self.ids),
            entities: ReferenceCounter::clone(&self.entities),
        }
    }
}

impl<Id, T> Default for EntityState<Id, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Eq + Hash, T: PartialEq> PartialEq for EntityState<Id, T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.ids == other.ids && self.entities == other.entities)
    }
}

impl<Id: Eq + Hash, T: Eq> Eq for EntityState<Id, T> {}

impl<Id, T> std::fmt::Debug for EntityState<Id, T>
where
    Id: Eq + Hash + std::fmt::Debug,
    T: std::fmt::Debug,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct OrderedEntities<'a, Id, T>(&'a EntityState<Id, T>);

        impl<Id, T> std::fmt::Debug for OrderedEntities<'_, Id, T>
        where
            Id: Eq + Hash + std::fmt::Debug,
            T: std::fmt::Debug,
        {
            fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.debug_map().entries(self.0.iter()).finish()
            }
        }

        formatter
            .debug_struct("EntityState")
            .field("ids", &self.ids)
            .field("entities", &OrderedEntities(self))
            .finish()
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// An iterator over the `(id, record)` pairs of an [`EntityState`] in sorted order.
///
/// Only identifiers present in the id list are visited.
pub struct EntityStateIterator<'a, Id, T> {
    ids: std::slice::Iter<'a, Id>,
    entities: &'a EntityMap<Id, T>,
}

impl<'a, Id: Eq + Hash, T> Iterator for EntityStateIterator<'a, Id, T> {
    type Item = (&'a Id, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let entities = self.entities;
        self.ids
            .by_ref()
            .find_map(|id| entities.get(id).map(|entity| (id, &**entity)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}

impl<'a, Id: Eq + Hash, T> IntoIterator for &'a EntityState<Id, T> {
    type Item = (&'a Id, &'a T);
    type IntoIter = EntityStateIterator<'a, Id, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<Id, T> serde::Serialize for EntityState<Id, T>
where
    Id: serde::Serialize + Eq + Hash,
    T: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        struct OrderedEntities<'a, Id, T>(&'a EntityState<Id, T>);

        impl<Id, T> serde::Serialize for OrderedEntities<'_, Id, T>
        where
            Id: serde::Serialize + Eq + Hash,
            T: serde::Serialize,
        {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (id, entity) in self.0 {
                    map.serialize_entry(id, entity)?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("EntityState", 2)?;
        state.serialize_field("ids", self.ids())?;
        state.serialize_field("entities", &OrderedEntities(self))?;
        state.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, Id, T> serde::Deserialize<'de> for EntityState<Id, T>
where
    Id: serde::Deserialize<'de> + Clone + Eq + Hash,
    T: serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(bound(deserialize = "Id: serde::Deserialize<'de> + Eq + Hash, T: serde::Deserialize<'de>"))]
        struct RawEntityState<Id, T> {
            ids: Vec<Id>,
            entities: std::collections::HashMap<Id, T>,
        }

        let raw = RawEntityState::<Id, T>::deserialize(deserializer)?;
        Self::from_parts(raw.ids, raw.entities).map_err(serde::de::Error::custom)
    }
}

#[cfg(not(feature = "arc"))]
static_assertions::assert_not_impl_any!(EntityState<u32, String>: Send, Sync);

#[cfg(feature = "arc")]
static_assertions::assert_impl_all!(EntityState<u32, String>: Send, Sync);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample() -> EntityState<u32, &'static str> {
        EntityState::from_parts(vec![3, 1, 2], vec![(1, "one"), (2, "two"), (3, "three")])
            .unwrap()
    }

    #[rstest]
    fn test_new_creates_empty() {
        let state: EntityState<u32, &str> = EntityState::new();
        assert!(state.is_empty());
        assert_eq!(state.len(), 0);
        assert!(state.entities().is_empty());
    }

    #[rstest]
    fn test_iter_follows_id_order() {
        let state = sample();
        let pairs: Vec<(&u32, &&str)> = state.iter().collect();
        assert_eq!(pairs, vec![(&3, &"three"), (&1, &"one"), (&2, &"two")]);
    }

    #[rstest]
    fn test_get_and_contains() {
        let state = sample();
        assert_eq!(state.get(&2), Some(&"two"));
        assert_eq!(state.get(&9), None);
        assert!(state.contains(&1));
        assert!(!state.contains(&9));
    }

    #[rstest]
    fn test_get_with_borrowed_key() {
        let state =
            EntityState::from_parts(vec!["a".to_string()], vec![("a".to_string(), 1)]).unwrap();
        assert_eq!(state.get("a"), Some(&1));
    }

    #[rstest]
    fn test_clone_shares_both_halves() {
        let state = sample();
        let copy = state.clone();
        assert!(state.ptr_eq(&copy));
        assert!(state.shares_ids_with(&copy));
        assert!(state.shares_entities_with(&copy));
    }

    #[rstest]
    fn test_equal_content_is_equal_without_sharing() {
        let left = sample();
        let right = sample();
        assert_eq!(left, right);
        assert!(!left.ptr_eq(&right));
    }

    #[rstest]
    fn test_different_order_is_not_equal() {
        let left = sample();
        let right =
            EntityState::from_parts(vec![1, 2, 3], vec![(1, "one"), (2, "two"), (3, "three")])
                .unwrap();
        assert_ne!(left, right);
    }

    #[rstest]
    #[case::duplicate(vec![1, 1], vec![(1, "one")], EntityStateError::DuplicateId { position: 1 })]
    #[case::missing(vec![1, 2], vec![(1, "one")], EntityStateError::MissingEntity { position: 1 })]
    #[case::orphaned(vec![1], vec![(1, "one"), (2, "two"), (3, "three")], EntityStateError::OrphanedEntities { count: 2 })]
    fn test_from_parts_rejects_inconsistent_parts(
        #[case] ids: Vec<u32>,
        #[case] entities: Vec<(u32, &'static str)>,
        #[case] expected: EntityStateError,
    ) {
        assert_eq!(EntityState::from_parts(ids, entities).unwrap_err(), expected);
    }

    #[rstest]
    fn test_debug_lists_entities_in_id_order() {
        let state = EntityState::from_parts(vec![2, 1], vec![(1, "one"), (2, "two")]).unwrap();
        assert_eq!(
            format!("{state:?}"),
            r#"EntityState { ids: [2, 1], entities: {2: "two", 1: "one"} }"#
        );
    }
}
