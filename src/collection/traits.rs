//! Abstract document collection interface.
//!
//! The remote database is reached only through this trait, so the store can
//! run against the in-memory backend in tests and embedded use, and against a
//! real service adapter in production.

use std::fmt;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

use crate::error::{SimError, TransportError};

/// A document body: top-level field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// One document as returned by reads and change notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Document id within its collection.
    pub id: String,
    /// Document body.
    pub data: Document,
}

/// How `set` treats an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the whole document.
    #[default]
    Replace,
    /// Merge top-level fields into the existing document (upsert).
    Merge,
}

/// Errors reported by a document collection.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The document does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// A create targeted an id that is already taken.
    #[error("Duplicate key: {collection}/{id}")]
    DuplicateKey {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// The service could not be reached.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The service refused the call.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The service is rate limiting or out of quota.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<CollectionError> for SimError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::NotFound { collection, id } => Self::not_found(collection, id),
            CollectionError::ConnectionError(message) => {
                TransportError::ConnectionFailed { message }.into()
            }
            CollectionError::PermissionDenied(message) => {
                TransportError::PermissionDenied { message }.into()
            }
            CollectionError::QuotaExceeded(message) => TransportError::QuotaExceeded { message }.into(),
            CollectionError::SerializationError(message) => {
                TransportError::SerializationFailed { message }.into()
            }
            other @ (CollectionError::DuplicateKey { .. } | CollectionError::BackendError(_)) => {
                TransportError::ConnectionFailed {
                    message: other.to_string(),
                }
                .into()
            }
        }
    }
}

/// A change notification for one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    /// The full current contents of the collection.
    Snapshot(Vec<DocumentSnapshot>),
    /// The listener failed; no snapshot accompanies this event.
    Failed {
        /// Error text from the service.
        message: String,
    },
}

/// Callback invoked for every change event of a subscribed collection.
pub type ChangeListener = Box<dyn Fn(CollectionEvent) + Send + Sync>;

/// Handle returned by [`DocumentCollection::subscribe`].
///
/// Cancelling is idempotent. Dropping the handle cancels the listener.
pub struct ListenerHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ListenerHandle {
    /// Wraps the backend's cancellation routine.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stops delivery to the listener. Later calls do nothing.
    pub fn cancel(&self) {
        let cancel = match self.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// True once [`cancel`](Self::cancel) has run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self.cancel.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Remote document collection service.
///
/// Every call returns once the service has accepted or rejected it.
/// Implementations must be safe to share between threads.
pub trait DocumentCollection: Send + Sync {
    /// All documents of a collection, ordered by id.
    fn get_all(&self, collection: &str) -> Result<Vec<DocumentSnapshot>, CollectionError>;

    /// One document, or `None` if absent.
    fn get_one(&self, collection: &str, id: &str) -> Result<Option<DocumentSnapshot>, CollectionError>;

    /// Creates a document. Generates an id when `id` is `None`.
    ///
    /// # Errors
    /// - `DuplicateKey`: if `id` is given and already exists
    fn create(&self, collection: &str, id: Option<&str>, data: Document) -> Result<String, CollectionError>;

    /// Merges `patch` into an existing document's top-level fields.
    ///
    /// # Errors
    /// - `NotFound`: if the document does not exist
    fn update(&self, collection: &str, id: &str, patch: Document) -> Result<(), CollectionError>;

    /// Writes a document whether or not it exists.
    fn set(&self, collection: &str, id: &str, data: Document, mode: WriteMode) -> Result<(), CollectionError>;

    /// Registers `listener` for change events on `collection`.
    ///
    /// The listener receives the current contents as soon as they are
    /// available, then one snapshot per committed change.
    fn subscribe(&self, collection: &str, listener: ChangeListener) -> Result<ListenerHandle, CollectionError>;
}
