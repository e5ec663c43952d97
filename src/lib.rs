//! # SimChart - role-gated simulation records
//!
//! SimChart keeps a live mirror of clinical training simulations stored in a
//! remote document collection and decides, per role, what each viewer may
//! see. Instructors (admins) author records and lock them; students see only
//! the records addressed to them, never the values of locked sections, and
//! cannot open locked records at all.
//!
//! ## Core Concepts
//!
//! - **SimulationRecord**: title, audience, record lock and seven lab/imaging sections
//! - **AccessPolicy**: pure visibility and lock decisions (`policy`)
//! - **SimulationStore**: live mirror of the collection plus the write operations
//! - **Session**: the signed-in user and role, passed explicitly to every check
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use simchart::{InMemoryCollection, Role, SimChartConfig, SimulationStore};
//!
//! let collection = Arc::new(InMemoryCollection::new());
//! let store = SimulationStore::new(collection, SimChartConfig::default());
//! let _sub = store.subscribe(|snapshot| {
//!     for record in snapshot.visible_to(Role::Student) {
//!         println!("{}", record.title);
//!     }
//! })?;
//! let id = store.create_record("Chest pain", "54-year-old male")?;
//! store.toggle_lock(&id, true)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain types
pub mod error;
pub mod record;
pub mod role;

// Access decisions and views
pub mod policy;

// Collaborators
pub mod auth;
pub mod collection;

// Live mirror and consumers
pub mod config;
pub mod dashboard;
pub mod seed;
pub mod store;

pub use auth::{AuthService, CredentialBackend, InMemoryCredentials, Session, UserId, UserProfile};
pub use collection::{
    CollectionError, CollectionEvent, Document, DocumentCollection, DocumentSnapshot,
    InMemoryCollection, ListenerHandle, WriteMode,
};
pub use config::SimChartConfig;
pub use dashboard::{ActionReport, Dashboard, Notice, NoticeKind, PendingGuard, SimulationCard};
pub use error::{ExecutionError, SimError, SimResult, TransportError, ValidationError};
pub use policy::{
    DataIntegrityWarning, IntegrityIssue, LockedNotice, OpenOutcome, RecordView, SectionValue,
    SectionView,
};
pub use record::{
    Attachment, AttachmentKind, RecordPatch, Section, SectionLabel, Sections, SimulationId,
    SimulationRecord,
};
pub use role::{Audience, Role};
pub use seed::{seed_simulations, SeedReport};
pub use store::{SimulationStore, Snapshot, SnapshotStream, Subscription, SubscriptionId};
