//! Inputs accepted by adapter operations.
//!
//! Operations take their input either bare or wrapped in an [`Action`]
//! envelope. [`Payload`] is the tagged union of the two shapes; it is
//! unwrapped once at the start of every operation so the core logic only
//! ever sees the bare value.
//!
//! Partial updates are described by [`Update`], which pairs the identifier of
//! the record to patch with a [`Changes`] value.

/// A named envelope carrying an operation payload.
///
/// # Examples
///
/// ```rust
/// use entity_adapter::entity::{Action, Payload};
///
/// let action = Action::new("books/add", 42);
/// let payload: Payload<i32> = action.into();
/// assert_eq!(payload.into_inner(), 42);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action<P> {
    /// The action's type tag.
    pub action_type: String,
    /// The wrapped payload.
    pub payload: P,
}

impl<P> Action<P> {
    /// Creates a new action with the given type tag and payload.
    pub fn new(action_type: impl Into<String>, payload: P) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// An operation input, either bare or wrapped in an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<P> {
    /// The payload itself.
    Bare(P),
    /// A payload delivered inside an action envelope.
    Enveloped(Action<P>),
}

impl<P> Payload<P> {
    /// Unwraps the envelope, if any, and returns the payload.
    #[inline]
    pub fn into_inner(self) -> P {
        match self {
            Self::Bare(payload) => payload,
            Self::Enveloped(action) => action.payload,
        }
    }
}

impl<P> From<P> for Payload<P> {
    #[inline]
    fn from(payload: P) -> Self {
        Self::Bare(payload)
    }
}

impl<P> From<Action<P>> for Payload<P> {
    #[inline]
    fn from(action: Action<P>) -> Self {
        Self::Enveloped(action)
    }
}

/// A partial modification of a record.
///
/// `apply` builds the updated record from the stored one. The result may
/// carry a different identifier, in which case the record moves to the new
/// identifier.
///
/// # Examples
///
/// ```rust
/// use entity_adapter::entity::Changes;
///
/// #[derive(Clone)]
/// struct Book {
///     id: u32,
///     title: String,
/// }
///
/// #[derive(Default)]
/// struct BookChanges {
///     title: Option<String>,
/// }
///
/// impl Changes<Book> for BookChanges {
///     fn apply(self, book: &Book) -> Book {
///         Book {
///             id: book.id,
///             title: self.title.unwrap_or_else(|| book.title.clone()),
///         }
///     }
///
///     fn is_empty(&self) -> bool {
///         self.title.is_none()
///     }
/// }
///
/// assert!(BookChanges::default().is_empty());
/// ```
pub trait Changes<T> {
    /// Returns the record produced by overlaying these changes on `entity`.
    fn apply(self, entity: &T) -> T;

    /// Returns `true` if applying these changes cannot modify any record.
    ///
    /// Empty changes are skipped without calling [`Changes::apply`].
    fn is_empty(&self) -> bool {
        false
    }
}

/// Changes that replace the whole record.
///
/// # Examples
///
/// ```rust
/// use entity_adapter::entity::{Changes, Replace};
///
/// assert_eq!(Replace(2).apply(&1), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replace<T>(pub T);

impl<T> Changes<T> for Replace<T> {
    #[inline]
    fn apply(self, _entity: &T) -> T {
        self.0
    }
}

/// A patch addressed to the record stored under `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update<Id, C> {
    /// Identifier of the record to patch.
    pub id: Id,
    /// Changes to overlay on the record.
    pub changes: C,
}

impl<Id, C> Update<Id, C> {
    /// Creates a new update.
    pub const fn new(id: Id, changes: C) -> Self {
        Self { id, changes }
    }
}
