//! # entity-adapter
//!
//! Sorted, normalized entity collections for immutable application state.
//!
//! ## Overview
//!
//! An [`EntityState`](entity::EntityState) stores uniquely identified records
//! as an ordered list of identifiers plus a map from identifier to record.
//! An [`EntityAdapter`](entity::EntityAdapter) owns the identifier selector and
//! the comparator and provides the update operations:
//!
//! - **Insert**: `add_one`, `add_many`, `set_all`
//! - **Replace**: `set_one`, `set_many`, `upsert_one`, `upsert_many`
//! - **Patch**: `update_one`, `update_many`, `map`
//! - **Remove**: `remove_one`, `remove_many`, `remove_all`
//!
//! Every operation returns a new state and never touches the old one. Parts
//! of the state whose contents did not change are shared with the input, so
//! pointer equality is a reliable change signal.
//!
//! ## Feature Flags
//!
//! - `arc`: Use `Arc` instead of `Rc` so states can cross threads
//! - `fxhash`: Hash identifiers with `rustc-hash`
//! - `ahash`: Hash identifiers with `ahash`
//! - `serde`: Serialize and deserialize `EntityState`
//! - `full`: Enable all optional integrations
//!
//! ## Example
//!
//! ```rust
//! use entity_adapter::prelude::*;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Book {
//!     id: u32,
//!     title: String,
//! }
//!
//! let adapter = EntityAdapter::new(
//!     |book: &Book| book.id,
//!     |left: &Book, right: &Book| left.title.cmp(&right.title),
//! );
//!
//! let state = adapter.add_many(
//!     &adapter.initial_state(),
//!     vec![
//!         Book { id: 1, title: "Zen".to_string() },
//!         Book { id: 2, title: "Alpha".to_string() },
//!     ],
//! );
//! assert_eq!(state.ids(), &[2, 1]);
//!
//! // Re-adding an existing identifier changes nothing at all
//! let unchanged = adapter.add_one(&state, Book { id: 1, title: "Other".to_string() });
//! assert!(unchanged.ptr_eq(&state));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use entity_adapter::prelude::*;
/// ```
pub mod prelude {
    pub use crate::entity::*;
}

pub mod entity;
