//! Role-based visibility and locking.
//!
//! `access` holds the pure decisions, `view` applies them to produce what a
//! role may render, and `integrity` reports documents that had to be read
//! with defaults.

pub mod access;
pub mod integrity;
pub mod view;

pub use access::{
    authorize, can_edit_record, can_open, can_read_section_value, can_toggle_lock, is_visible,
};
pub use integrity::{DataIntegrityWarning, IntegrityIssue};
pub use view::{mask, open, visible_records, LockedNotice, OpenOutcome, RecordView, SectionValue, SectionView};
