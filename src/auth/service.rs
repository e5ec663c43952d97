//! Identity service: who is signed in and with which role.
//!
//! The session is an explicit value. Callers read it and pass the role into
//! policy checks; nothing here is global.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::collection::{Document, DocumentCollection, WriteMode};
use crate::config::SimChartConfig;
use crate::error::{ExecutionError, SimError, SimResult, ValidationError};
use crate::record::timestamp_value;
use crate::role::Role;
use crate::store::{SubscriberRegistry, Subscription};

use super::credentials::{CredentialBackend, UserId};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

fn email_regex() -> SimResult<&'static Regex> {
    static EMAIL: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN))
        .as_ref()
        .map_err(|e| SimError::internal(format!("email pattern failed to compile: {e}")))
}

/// A signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Account id.
    pub uid: UserId,
    /// Sign-in email.
    pub email: String,
    /// Role from the users collection; `None` if the profile is missing or invalid.
    pub role: Option<Role>,
    /// When the profile was written.
    pub created_at: Option<DateTime<Utc>>,
}

/// Current authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// The signed-in user, if any.
    pub user: Option<UserProfile>,
}

impl Session {
    /// A signed-out session.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self { user: None }
    }

    /// True if someone is signed in.
    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    /// The signed-in user's role, if known.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().and_then(|u| u.role)
    }

    /// The role, or `NotSignedIn` when there is no user or no role.
    pub fn require_role(&self) -> SimResult<Role> {
        self.role().ok_or_else(|| ExecutionError::NotSignedIn.into())
    }
}

struct SessionState {
    sequence: u64,
    session: Arc<Session>,
}

/// Sign-up, sign-in and session notifications.
pub struct AuthService {
    credentials: Arc<dyn CredentialBackend>,
    users: Arc<dyn DocumentCollection>,
    cfg: SimChartConfig,
    state: RwLock<SessionState>,
    listeners: Arc<SubscriberRegistry<Session>>,
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("session", &self.session())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl AuthService {
    /// Creates a signed-out service.
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialBackend>,
        users: Arc<dyn DocumentCollection>,
        cfg: SimChartConfig,
    ) -> Self {
        Self {
            credentials,
            users,
            cfg,
            state: RwLock::new(SessionState {
                sequence: 1,
                session: Arc::new(Session::signed_out()),
            }),
            listeners: SubscriberRegistry::new(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The current session.
    #[must_use]
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.read_state().session)
    }

    /// Notifies `callback` with the current session now and on every change.
    pub fn on_state_change(&self, callback: impl Fn(Arc<Session>) + Send + Sync + 'static) -> Subscription {
        self.listeners.register_with(callback, || {
            let state = self.read_state();
            Some((state.sequence, Arc::clone(&state.session)))
        })
    }

    fn publish(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let sequence = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.sequence += 1;
            state.session = Arc::clone(&session);
            state.sequence
        };
        self.listeners.deliver(sequence, &session);
        session
    }

    fn validate_credentials(&self, email: &str, password: &str) -> SimResult<()> {
        if !email_regex()?.is_match(email.trim()) {
            return Err(ValidationError::InvalidEmail {
                email: email.to_string(),
            }
            .into());
        }
        if password.chars().count() < self.cfg.min_password_len {
            return Err(ValidationError::WeakPassword {
                min_length: self.cfg.min_password_len,
            }
            .into());
        }
        Ok(())
    }

    /// Creates an account and its `users/{uid}` profile, then signs in.
    ///
    /// The account and the profile are separate writes. If the profile write
    /// fails the account is left behind without a profile; a later `login`
    /// succeeds with no role until a profile is written.
    pub fn signup(&self, email: &str, password: &str, role: Role) -> SimResult<Arc<Session>> {
        self.validate_credentials(email, password)?;
        let uid = self.credentials.sign_up(email, password)?;

        let now = Utc::now();
        let mut profile = Document::new();
        profile.insert("email".to_string(), Value::String(email.trim().to_string()));
        profile.insert("role".to_string(), Value::String(role.as_str().to_string()));
        profile.insert("createdAt".to_string(), timestamp_value(now));
        self.users
            .set(&self.cfg.users_collection, uid.as_str(), profile, WriteMode::Replace)
            .map_err(|e| {
                let err = SimError::from(e);
                tracing::error!(
                    uid = %uid,
                    email = %email.trim(),
                    error = %err,
                    "failed to write user profile; account exists without a role"
                );
                err
            })?;

        tracing::info!(uid = %uid, role = %role, "user signed up");
        Ok(self.publish(Session {
            user: Some(UserProfile {
                uid,
                email: email.trim().to_string(),
                role: Some(role),
                created_at: Some(now),
            }),
        }))
    }

    /// Signs in and resolves the role from the users collection.
    ///
    /// A missing profile or an unrecognized role string leaves the user
    /// signed in without a role.
    pub fn login(&self, email: &str, password: &str) -> SimResult<Arc<Session>> {
        let uid = self.credentials.sign_in(email, password)?;
        let profile = self.load_profile(&uid, email)?;
        tracing::info!(uid = %uid, role = ?profile.role, "user signed in");
        Ok(self.publish(Session { user: Some(profile) }))
    }

    /// Signs out.
    pub fn logout(&self) -> Arc<Session> {
        if let Some(user) = &self.session().user {
            tracing::info!(uid = %user.uid, "user signed out");
        }
        self.publish(Session::signed_out())
    }

    fn load_profile(&self, uid: &UserId, email: &str) -> SimResult<UserProfile> {
        let doc = self.users.get_one(&self.cfg.users_collection, uid.as_str())?;
        let Some(doc) = doc else {
            tracing::warn!(uid = %uid, "user profile missing; signed in without a role");
            return Ok(UserProfile {
                uid: uid.clone(),
                email: email.trim().to_string(),
                role: None,
                created_at: None,
            });
        };

        let role = match doc.data.get("role") {
            Some(Value::String(s)) => match s.parse::<Role>() {
                Ok(role) => Some(role),
                Err(_) => {
                    tracing::warn!(uid = %uid, role = %s, "user profile has an unrecognized role");
                    None
                }
            },
            _ => {
                tracing::warn!(uid = %uid, "user profile has no role");
                None
            }
        };
        let stored_email = doc
            .data
            .get("email")
            .and_then(Value::as_str)
            .map_or_else(|| email.trim().to_string(), str::to_string);
        let created_at = doc
            .data
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(UserProfile {
            uid: uid.clone(),
            email: stored_email,
            role,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryCredentials;
    use crate::collection::InMemoryCollection;

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(InMemoryCredentials::new()),
            Arc::new(InMemoryCollection::new()),
            SimChartConfig::default(),
        )
    }

    #[test]
    fn test_signed_out_session_has_no_role() {
        let session = Session::signed_out();
        assert!(!session.is_signed_in());
        assert!(session.require_role().is_err());
    }

    #[test]
    fn test_email_pattern() {
        let re = email_regex().unwrap();
        assert!(re.is_match("a.b@c.org"));
        assert!(!re.is_match("a b@c.org"));
        assert!(!re.is_match("a@b"));
        assert!(!re.is_match("@b.org"));
    }

    #[test]
    fn test_password_length_counts_characters() {
        let auth = service();
        assert!(auth.validate_credentials("a@b.co", "ééééé").is_err());
        assert!(auth.validate_credentials("a@b.co", "éééééé").is_ok());
    }

    #[test]
    fn test_signup_then_session_and_logout() {
        let auth = service();
        let session = auth.signup(" admin@b.co ", "secret1", Role::Admin).unwrap();
        assert_eq!(session.require_role().unwrap(), Role::Admin);
        assert_eq!(session.user.as_ref().unwrap().email, "admin@b.co");
        assert_eq!(auth.session().role(), Some(Role::Admin));

        auth.logout();
        assert_eq!(*auth.session(), Session::signed_out());
    }
}
