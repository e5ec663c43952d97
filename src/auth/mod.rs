//! Identity collaborator.
//!
//! Credentials are verified by a [`CredentialBackend`]; roles are read from
//! the users collection. [`AuthService`] publishes the resulting [`Session`],
//! which callers pass explicitly to dashboards and policy checks.

mod credentials;
mod service;

pub use credentials::{CredentialBackend, InMemoryCredentials, UserId};
pub use service::{AuthService, Session, UserProfile};
