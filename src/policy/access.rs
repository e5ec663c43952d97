//! Access decisions for simulation records.
//!
//! Every function here is pure: the caller passes the role explicitly and the
//! answer depends only on the role and the record.

use crate::error::{ExecutionError, SimResult};
use crate::record::{SectionLabel, SimulationRecord};
use crate::role::Role;

/// True if `record` belongs in `role`'s record list at all.
#[must_use]
pub fn is_visible(role: Role, record: &SimulationRecord) -> bool {
    role.is_admin() || record.assigned_to.includes(role)
}

/// True if `role` may open the detail view of `record`. Admins bypass locks.
#[must_use]
pub fn can_open(role: Role, record: &SimulationRecord) -> bool {
    role.is_admin() || !record.locked
}

/// True if `role` may read the value of one section of `record`.
///
/// Independent of the record-level lock: an unlocked record can still have
/// individual sections withheld.
#[must_use]
pub fn can_read_section_value(role: Role, record: &SimulationRecord, label: SectionLabel) -> bool {
    role.is_admin() || record.section(label).map_or(true, |s| !s.locked)
}

/// True if `role` may change titles, descriptions, notes or section values.
#[must_use]
pub const fn can_edit_record(role: Role) -> bool {
    role.is_admin()
}

/// True if `role` may lock or unlock a record or one of its sections.
#[must_use]
pub const fn can_toggle_lock(role: Role) -> bool {
    role.is_admin()
}

/// Fails with `PermissionDenied` unless `allowed`.
pub fn authorize(role: Role, allowed: bool, action: &str) -> SimResult<()> {
    if allowed {
        return Ok(());
    }
    Err(ExecutionError::PermissionDenied {
        action: action.to_string(),
        role: role.to_string(),
    }
    .into())
}
