//! Role-scoped dashboard over the simulation store.
//!
//! A dashboard is bound to one role, taken from an explicit [`Session`]. It
//! filters and masks snapshots with the access policy and wraps admin writes
//! so every action ends with a user-facing [`Notice`] and a cleared pending
//! indicator, whatever the outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::auth::Session;
use crate::error::{SimError, SimResult};
use crate::policy::{self, OpenOutcome};
use crate::record::{RecordPatch, SectionLabel, SimulationId};
use crate::role::{Audience, Role};
use crate::store::{SimulationStore, Snapshot};

/// Outcome class of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    #[allow(missing_docs)]
    Success,
    #[allow(missing_docs)]
    Error,
}

/// A message to show the user after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Success or error.
    pub kind: NoticeKind,
    /// Text naming the action and, on failure, the error.
    pub message: String,
}

impl Notice {
    /// A success notice.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    /// An error notice naming the failed action.
    #[must_use]
    pub fn failure(action: &str, err: &SimError) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: format!("Failed to {action}: {err}"),
        }
    }

    /// True for error notices.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == NoticeKind::Error
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of a dashboard action: the notice to show and the typed result.
#[derive(Debug)]
pub struct ActionReport<T> {
    /// What to tell the user.
    pub notice: Notice,
    /// What happened.
    pub result: SimResult<T>,
}

impl<T> ActionReport<T> {
    /// True if the action succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// One entry in the record list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationCard {
    #[allow(missing_docs)]
    pub id: SimulationId,
    #[allow(missing_docs)]
    pub title: String,
    #[allow(missing_docs)]
    pub description: String,
    #[allow(missing_docs)]
    pub assigned_to: Audience,
    /// Stored record lock.
    pub locked: bool,
    /// Render the card greyed out with a lock badge.
    pub show_locked_badge: bool,
    /// Render the lock toggle.
    pub can_toggle_lock: bool,
}

/// Sets a flag for as long as it lives; clears it on drop, including unwinding.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PendingGuard<'a> {
    /// Raises `flag` until the guard is dropped.
    #[must_use]
    pub fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A dashboard for one signed-in role.
#[derive(Debug)]
pub struct Dashboard {
    role: Role,
    store: SimulationStore,
    pending: AtomicBool,
}

impl Dashboard {
    /// Binds a dashboard to the session's role.
    ///
    /// # Errors
    /// - `NotSignedIn` if the session has no user or no role
    pub fn new(session: &Session, store: SimulationStore) -> SimResult<Self> {
        Ok(Self::for_role(session.require_role()?, store))
    }

    /// Binds a dashboard to an explicit role.
    #[must_use]
    pub const fn for_role(role: Role, store: SimulationStore) -> Self {
        Self {
            role,
            store,
            pending: AtomicBool::new(false),
        }
    }

    /// The role this dashboard renders for.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &SimulationStore {
        &self.store
    }

    /// True while an action is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Cards for the records visible to this role, in snapshot order.
    #[must_use]
    pub fn cards(&self, snapshot: &Snapshot) -> Vec<SimulationCard> {
        let admin = self.role.is_admin();
        snapshot
            .visible_to(self.role)
            .into_iter()
            .map(|r| SimulationCard {
                id: r.id.clone(),
                title: r.title.clone(),
                description: r.description.clone(),
                assigned_to: r.assigned_to,
                locked: r.locked,
                show_locked_badge: r.locked && !admin,
                can_toggle_lock: policy::can_toggle_lock(self.role),
            })
            .collect()
    }

    /// Cards for the store's current mirror (empty before the first snapshot).
    #[must_use]
    pub fn current_cards(&self) -> Vec<SimulationCard> {
        self.store
            .snapshot()
            .map(|s| self.cards(&s))
            .unwrap_or_default()
    }

    /// Opens a record from the current mirror.
    ///
    /// # Errors
    /// - `RecordNotFound` if the record is not in the mirror
    pub fn open(&self, id: &SimulationId) -> SimResult<OpenOutcome> {
        let snapshot = self.store.snapshot();
        let Some(record) = snapshot.as_deref().and_then(|s| s.get(id)) else {
            return Err(SimError::not_found(
                self.store.config().simulations_collection.clone(),
                id.as_str(),
            ));
        };
        Ok(policy::open(self.role, record))
    }

    fn run<T>(
        &self,
        action: &str,
        allowed: bool,
        success: impl FnOnce(&T) -> String,
        op: impl FnOnce() -> SimResult<T>,
    ) -> ActionReport<T> {
        let _pending = PendingGuard::engage(&self.pending);
        let result = policy::authorize(self.role, allowed, action).and_then(|()| op());
        let notice = match &result {
            Ok(value) => Notice::success(success(value)),
            Err(err) => {
                tracing::warn!(role = %self.role, action, error = %err, "dashboard action failed");
                Notice::failure(action, err)
            }
        };
        ActionReport { notice, result }
    }

    /// Creates a simulation (admin only).
    pub fn create_simulation(&self, title: &str, description: &str) -> ActionReport<SimulationId> {
        self.run(
            "create simulation",
            policy::can_edit_record(self.role),
            |_| "Simulation created".to_string(),
            || self.store.create_record(title, description),
        )
    }

    /// Saves edits to a simulation (admin only).
    pub fn save_simulation(&self, id: &SimulationId, patch: &RecordPatch) -> ActionReport<()> {
        self.run(
            "update simulation",
            policy::can_edit_record(self.role),
            |()| "Simulation updated".to_string(),
            || self.store.update_record(id, patch),
        )
    }

    /// Saves the notes of a simulation (admin only).
    pub fn save_notes(&self, id: &SimulationId, notes: &str) -> ActionReport<()> {
        let patch = RecordPatch::new().notes(notes);
        self.run(
            "save notes",
            policy::can_edit_record(self.role),
            |()| "Notes saved".to_string(),
            || self.store.update_record(id, &patch),
        )
    }

    /// Replaces one section's value (admin only).
    pub fn set_section_value(&self, id: &SimulationId, label: SectionLabel, value: &str) -> ActionReport<()> {
        self.run(
            "update section",
            policy::can_edit_record(self.role),
            |()| format!("{label} updated"),
            || self.store.update_section_value(id, label, value),
        )
    }

    /// Locks or unlocks a simulation (admin only).
    pub fn set_lock(&self, id: &SimulationId, locked: bool) -> ActionReport<()> {
        let action = if locked { "lock simulation" } else { "unlock simulation" };
        self.run(
            action,
            policy::can_toggle_lock(self.role),
            |()| format!("Simulation {}", if locked { "locked" } else { "unlocked" }),
            || self.store.toggle_lock(id, locked),
        )
    }

    /// Flips one section's lock (admin only).
    pub fn toggle_section_lock(&self, id: &SimulationId, label: SectionLabel) -> ActionReport<()> {
        self.run(
            "toggle section lock",
            policy::can_toggle_lock(self.role),
            |()| format!("{label} lock toggled"),
            || self.store.toggle_section_lock(id, label),
        )
    }
}
