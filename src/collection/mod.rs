//! Document collection collaborator.
//!
//! The store talks to the remote database only through [`DocumentCollection`].
//! [`InMemoryCollection`] is the embedded backend used by tests and the demo.

mod memory;
mod traits;

pub use memory::InMemoryCollection;
pub use traits::{
    ChangeListener, CollectionError, CollectionEvent, Document, DocumentCollection, DocumentSnapshot,
    ListenerHandle, WriteMode,
};
