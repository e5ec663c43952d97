use std::sync::{Arc, Mutex};

use serde_json::json;

use simchart::collection::{Document, DocumentCollection, WriteMode};
use simchart::{
    AuthService, CredentialBackend, Dashboard, ExecutionError, InMemoryCollection,
    InMemoryCredentials, Role, SimChartConfig, SimError, SimulationStore,
};

struct Fixture {
    credentials: Arc<InMemoryCredentials>,
    users: Arc<InMemoryCollection>,
    auth: AuthService,
}

fn setup() -> Fixture {
    let credentials = Arc::new(InMemoryCredentials::new());
    let users = Arc::new(InMemoryCollection::new());
    let auth = AuthService::new(credentials.clone(), users.clone(), SimChartConfig::default());
    Fixture {
        credentials,
        users,
        auth,
    }
}

#[test]
fn signup_writes_profile_and_signs_in() {
    let fx = setup();
    let session = fx.auth.signup("nurse@example.org", "hunter22", Role::Admin).unwrap();

    let user = session.user.as_ref().expect("signed in");
    assert_eq!(session.role(), Some(Role::Admin));
    assert_eq!(user.email, "nurse@example.org");

    let profile = fx.users.get_one("users", user.uid.as_str()).unwrap().expect("profile");
    assert_eq!(profile.data["email"], json!("nurse@example.org"));
    assert_eq!(profile.data["role"], json!("admin"));
    assert!(profile.data["createdAt"].is_string());
}

#[test]
fn login_resolves_role_from_profile() {
    let fx = setup();
    fx.auth.signup("student@example.org", "secret1", Role::Student).unwrap();
    fx.auth.logout();
    assert!(!fx.auth.session().is_signed_in());

    let session = fx.auth.login("Student@Example.org", "secret1").unwrap();
    assert_eq!(session.role(), Some(Role::Student));
    assert!(session.user.as_ref().unwrap().created_at.is_some());

    let err = fx.auth.login("student@example.org", "wrong-pass").unwrap_err();
    assert!(matches!(
        err,
        SimError::Execution(ExecutionError::AuthenticationFailed { .. })
    ));
}

#[test]
fn missing_profile_leaves_user_without_role() {
    let fx = setup();
    fx.credentials.sign_up("ghost@example.org", "secret1").unwrap();

    let session = fx.auth.login("ghost@example.org", "secret1").unwrap();
    assert!(session.is_signed_in());
    assert_eq!(session.role(), None);

    let store = SimulationStore::new(Arc::new(InMemoryCollection::new()), SimChartConfig::default());
    let err = Dashboard::new(&session, store).unwrap_err();
    assert!(matches!(err, SimError::Execution(ExecutionError::NotSignedIn)));
}

#[test]
fn unrecognized_profile_role_is_ignored() {
    let fx = setup();
    let uid = fx.credentials.sign_up("odd@example.org", "secret1").unwrap();
    let mut profile = Document::new();
    profile.insert("email".to_string(), json!("odd@example.org"));
    profile.insert("role".to_string(), json!("superuser"));
    fx.users.set("users", uid.as_str(), profile, WriteMode::Replace).unwrap();

    let session = fx.auth.login("odd@example.org", "secret1").unwrap();
    assert_eq!(session.role(), None);
}

#[test]
fn invalid_credentials_are_rejected_before_signup() {
    let fx = setup();

    let err = fx.auth.signup("not-an-email", "secret1", Role::Student).unwrap_err();
    assert!(err.is_validation());
    let err = fx.auth.signup("ok@example.org", "123", Role::Student).unwrap_err();
    assert!(err.is_validation());

    assert_eq!(fx.users.write_count(), 0);
    assert!(fx.credentials.sign_in("ok@example.org", "123").is_err());
}

#[test]
fn duplicate_signup_fails() {
    let fx = setup();
    fx.auth.signup("dup@example.org", "secret1", Role::Student).unwrap();
    let err = fx.auth.signup("dup@example.org", "secret2", Role::Admin).unwrap_err();
    assert!(matches!(
        err,
        SimError::Execution(ExecutionError::AuthenticationFailed { .. })
    ));
    assert_eq!(fx.users.write_count(), 1);
}

#[test]
fn state_changes_are_published_in_order() {
    let fx = setup();
    let seen: Arc<Mutex<Vec<Option<Role>>>> = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let sub = fx.auth.on_state_change(move |session| {
        s.lock().unwrap().push(session.role());
    });

    fx.auth.signup("a@example.org", "secret1", Role::Admin).unwrap();
    fx.auth.logout();
    sub.unsubscribe();
    fx.auth.login("a@example.org", "secret1").unwrap();

    assert_eq!(*seen.lock().unwrap(), [None, Some(Role::Admin), None]);
}

#[test]
fn failed_profile_write_surfaces_transport_error() {
    let fx = setup();
    fx.users.set_deny_writes(true);
    let err = fx.auth.signup("late@example.org", "secret1", Role::Student).unwrap_err();
    assert!(err.is_transport());
    assert!(!fx.auth.session().is_signed_in());

    // The account was created before the profile write failed.
    fx.users.set_deny_writes(false);
    let session = fx.auth.login("late@example.org", "secret1").unwrap();
    assert!(session.is_signed_in());
    assert_eq!(session.role(), None);
    let err = fx.auth.signup("late@example.org", "secret1", Role::Student).unwrap_err();
    assert!(matches!(
        err,
        SimError::Execution(ExecutionError::AuthenticationFailed { .. })
    ));
}
