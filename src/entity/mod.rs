//! Sorted normalized entity collections.
//!
//! This module provides [`EntityState`], an immutable pair of an ordered
//! identifier list and an identifier-to-record map, and [`EntityAdapter`],
//! which applies insert, replace, patch and remove operations to it.
//!
//! # Structural Sharing
//!
//! Every operation returns a new state and leaves its input untouched. The
//! identifier list, the record map and every individual record live behind
//! a [`ReferenceCounter`], and an operation only allocates the parts whose
//! contents actually change:
//!
//! - a patch that keeps a record between its neighbors reuses the identifier list
//! - a record that is replaced by an equal value keeps its old allocation
//! - an operation with no effect returns a state sharing both halves with its input
//!
//! # Examples
//!
//! ```rust
//! use entity_adapter::entity::{EntityAdapter, Replace, Update};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Book {
//!     id: &'static str,
//!     title: &'static str,
//! }
//!
//! let adapter = EntityAdapter::new(
//!     |book: &Book| book.id,
//!     |left: &Book, right: &Book| left.title.cmp(right.title),
//! );
//!
//! let state = adapter.set_all(
//!     &adapter.initial_state(),
//!     vec![
//!         Book { id: "tgg", title: "The Great Gatsby" },
//!         Book { id: "af", title: "Animal Farm" },
//!     ],
//! );
//! assert_eq!(state.ids(), &["af", "tgg"]);
//!
//! // Sort key unchanged relative to the neighbors: the id list is shared
//! let renamed = adapter.update_one(
//!     &state,
//!     Update::new("tgg", Replace(Book { id: "tgg", title: "The Great Gatsby II" })),
//! );
//! assert!(renamed.shares_ids_with(&state));
//! assert_eq!(renamed.get("tgg").map(|book| book.title), Some("The Great Gatsby II"));
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub type ReferenceCounter<T> = std::sync::Arc<T>;

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(not(feature = "arc"))]
pub type ReferenceCounter<T> = std::rc::Rc<T>;

// =============================================================================
// Identifier Hashing
// =============================================================================

/// Hasher builder used for the identifier-to-record map.
#[cfg(feature = "fxhash")]
pub type IdBuildHasher = rustc_hash::FxBuildHasher;

/// Hasher builder used for the identifier-to-record map.
#[cfg(all(feature = "ahash", not(feature = "fxhash")))]
pub type IdBuildHasher = ahash::RandomState;

/// Hasher builder used for the identifier-to-record map.
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
pub type IdBuildHasher = std::collections::hash_map::RandomState;

/// The identifier-to-record map stored in an [`EntityState`].
pub type EntityMap<Id, T> = std::collections::HashMap<Id, ReferenceCounter<T>, IdBuildHasher>;

mod adapter;
mod error;
mod ordering;
mod payload;
mod records;
mod state;

pub use adapter::Entity;
pub use adapter::EntityAdapter;
pub use error::EntityStateError;
pub use payload::Action;
pub use payload::Changes;
pub use payload::Payload;
pub use payload::Replace;
pub use payload::Update;
pub use state::EntityState;
pub use state::EntityStateIterator;

// =============================================================================
// Tests
// =============================================================================
