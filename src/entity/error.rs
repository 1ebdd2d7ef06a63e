//! Error types for entity states.
//!
//! Adapter operations are total and never fail. These errors only come from
//! building a state out of raw parts (for example after deserialization) and
//! from checking that a state is sorted under a comparator.

/// Represents a broken structural invariant of an [`EntityState`](super::EntityState).
///
/// # Examples
///
/// ```rust
/// use entity_adapter::entity::{EntityState, EntityStateError};
///
/// let result = EntityState::from_parts(vec![1, 1], vec![(1, "one")]);
/// assert_eq!(result.unwrap_err(), EntityStateError::DuplicateId { position: 1 });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStateError {
    /// The identifier at `position` already appeared earlier in the id list.
    DuplicateId {
        /// Index of the repeated identifier in the id list.
        position: usize,
    },
    /// The identifier at `position` has no record in the entity map.
    MissingEntity {
        /// Index of the identifier without a record.
        position: usize,
    },
    /// The entity map holds records whose identifiers are not in the id list.
    OrphanedEntities {
        /// Number of records without an identifier in the id list.
        count: usize,
    },
    /// The record at `position` sorts before the record preceding it.
    Unsorted {
        /// Index of the first out-of-order identifier.
        position: usize,
    },
}

impl std::fmt::Display for EntityStateError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId { position } => {
                write!(formatter, "duplicate identifier at position {position}")
            }
            Self::MissingEntity { position } => {
                write!(formatter, "identifier at position {position} has no entity")
            }
            Self::OrphanedEntities { count } => {
                write!(formatter, "{count} entities are missing from the id list")
            }
            Self::Unsorted { position } => {
                write!(formatter, "entity at position {position} is out of order")
            }
        }
    }
}

impl std::error::Error for EntityStateError {}
