#![cfg(feature = "serde")]

//! Integration tests for serde support of EntityState.
//!
//! States serialize as `{"ids": [...], "entities": {...}}` and are validated
//! on the way back in.

use std::cmp::Ordering;

use entity_adapter::entity::{EntityAdapter, EntityState};
use rstest::rstest;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Book {
    id: u32,
    title: String,
}

fn book(id: u32, title: &str) -> Book {
    Book {
        id,
        title: title.to_string(),
    }
}

type BookAdapter = EntityAdapter<Book, u32, fn(&Book) -> u32, fn(&Book, &Book) -> Ordering>;

fn adapter() -> BookAdapter {
    EntityAdapter::new(|book: &Book| book.id, |left: &Book, right: &Book| {
        left.title.cmp(&right.title)
    })
}

// =============================================================================
// Round Trips
// =============================================================================

#[rstest]
fn test_entity_state_json_roundtrip() {
    let state = adapter().initial_state_with(vec![book(1, "Zen"), book(2, "Alpha")]);

    let json = serde_json::to_string(&state).unwrap();
    let restored: EntityState<u32, Book> = serde_json::from_str(&json).unwrap();

    assert_eq!(restored, state);
    assert_eq!(restored.ids(), &[2, 1]);
    assert_eq!(adapter().check_sorted(&restored), Ok(()));
}

#[rstest]
fn test_entity_state_json_shape() {
    let state = adapter().initial_state_with(vec![book(1, "Zen"), book(2, "Alpha")]);
    let value = serde_json::to_value(&state).unwrap();

    assert_eq!(value["ids"], serde_json::json!([2, 1]));
    assert_eq!(value["entities"]["1"]["title"], "Zen");
    assert_eq!(value["entities"]["2"]["title"], "Alpha");
}

#[rstest]
fn test_empty_entity_state_json_roundtrip() {
    let state: EntityState<u32, Book> = EntityState::new();
    let json = serde_json::to_string(&state).unwrap();
    assert_eq!(json, r#"{"ids":[],"entities":{}}"#);

    let restored: EntityState<u32, Book> = serde_json::from_str(&json).unwrap();
    assert!(restored.is_empty());
}

// =============================================================================
// Validation
// =============================================================================

#[rstest]
#[case::duplicate_id(r#"{"ids":[1,1],"entities":{"1":{"id":1,"title":"A"}}}"#, "duplicate identifier")]
#[case::missing_entity(r#"{"ids":[1,2],"entities":{"1":{"id":1,"title":"A"}}}"#, "has no entity")]
#[case::orphaned_entity(
    r#"{"ids":[1],"entities":{"1":{"id":1,"title":"A"},"2":{"id":2,"title":"B"}}}"#,
    "missing from the id list"
)]
fn test_inconsistent_json_is_rejected(#[case] json: &str, #[case] message: &str) {
    let error = serde_json::from_str::<EntityState<u32, Book>>(json).unwrap_err();
    assert!(error.to_string().contains(message), "unexpected error: {error}");
}

#[rstest]
fn test_unsorted_json_can_be_resorted() {
    let json = r#"{"ids":[1,2],"entities":{"1":{"id":1,"title":"Zen"},"2":{"id":2,"title":"Alpha"}}}"#;
    let restored: EntityState<u32, Book> = serde_json::from_str(json).unwrap();

    assert!(adapter().check_sorted(&restored).is_err());
    assert_eq!(adapter().resort(&restored).ids(), &[2, 1]);
}
