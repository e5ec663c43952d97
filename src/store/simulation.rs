//! Live mirror of the simulation collection.
//!
//! The store attaches one listener to the remote collection and rebuilds the
//! full record set on every change event, republishing it to subscribers.
//! Writes go straight to the remote; the mirror only changes when the remote
//! echoes the write back. There is no optimistic local merge.
//!
//! # Section writes
//!
//! `sections` is stored as one aggregate field. Section edits read the whole
//! map, change one entry and write the whole map back, so two concurrent
//! edits of the same record can lose one of the changes (last writer wins).
//! The rewrite works on the stored JSON: entries other than the target are
//! written back exactly as read, and a malformed aggregate is refused rather
//! than normalized.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::collection::{
    CollectionError, CollectionEvent, Document, DocumentCollection, ListenerHandle, WriteMode,
};
use crate::config::SimChartConfig;
use crate::error::{SimError, SimResult};
use crate::policy::{integrity, view};
use crate::record::{
    append_attachment, check_len, edit_sections, timestamp_value, validate_title, Attachment,
    RecordPatch, SectionEdit, SectionLabel, SimulationId, SimulationRecord,
};
use crate::role::Role;

use super::stream::SnapshotStream;
use super::subscribers::{SubscriberRegistry, Subscription};

/// The full record set at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Position in this store's delivery order, starting at 1.
    pub sequence: u64,
    /// When the store received the change event.
    pub received_at: DateTime<Utc>,
    /// Every record in the collection, ordered by id.
    pub records: Vec<SimulationRecord>,
}

impl Snapshot {
    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: &SimulationId) -> Option<&SimulationRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Records that belong in `role`'s list.
    #[must_use]
    pub fn visible_to(&self, role: Role) -> Vec<&SimulationRecord> {
        view::visible_records(role, &self.records)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// State shared with the remote listener.
struct Mirror {
    collection: String,
    subscribers: Arc<SubscriberRegistry<Snapshot>>,
    latest: RwLock<Option<Arc<Snapshot>>>,
    sequence: AtomicU64,
    listener_errors: AtomicU64,
}

impl Mirror {
    fn on_event(&self, event: CollectionEvent) {
        match event {
            CollectionEvent::Snapshot(docs) => {
                let records: Vec<SimulationRecord> =
                    docs.iter().map(SimulationRecord::from_snapshot).collect();
                integrity::report(&records);

                let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
                let snapshot = Arc::new(Snapshot {
                    sequence,
                    received_at: Utc::now(),
                    records,
                });
                *self
                    .latest
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&snapshot));

                let delivered = self.subscribers.deliver(sequence, &snapshot);
                tracing::debug!(
                    collection = %self.collection,
                    sequence,
                    records = snapshot.records.len(),
                    delivered,
                    "snapshot delivered"
                );
            }
            CollectionEvent::Failed { message } => {
                self.listener_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    collection = %self.collection,
                    error = %message,
                    "collection listener failed"
                );
            }
        }
    }

    fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

struct StoreInner {
    collection: Arc<dyn DocumentCollection>,
    cfg: SimChartConfig,
    mirror: Arc<Mirror>,
    remote: Mutex<Option<ListenerHandle>>,
}

/// Live, subscribable mirror of the simulation collection with write access.
///
/// Cloning is cheap; clones share the mirror and the subscriber list.
#[derive(Clone)]
pub struct SimulationStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for SimulationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationStore")
            .field("collection", &self.inner.cfg.simulations_collection)
            .field("subscribers", &self.inner.mirror.subscribers.len())
            .field("sequence", &self.inner.mirror.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SimulationStore {
    /// Creates a store over `collection`. Nothing is read until the first
    /// subscription.
    #[must_use]
    pub fn new(collection: Arc<dyn DocumentCollection>, cfg: SimChartConfig) -> Self {
        let mirror = Arc::new(Mirror {
            collection: cfg.simulations_collection.clone(),
            subscribers: SubscriberRegistry::new(),
            latest: RwLock::new(None),
            sequence: AtomicU64::new(0),
            listener_errors: AtomicU64::new(0),
        });
        Self {
            inner: Arc::new(StoreInner {
                collection,
                cfg,
                mirror,
                remote: Mutex::new(None),
            }),
        }
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &SimChartConfig {
        &self.inner.cfg
    }

    fn name(&self) -> &str {
        &self.inner.cfg.simulations_collection
    }

    fn remote<T>(&self, action: &'static str, record_id: &str, result: Result<T, CollectionError>) -> SimResult<T> {
        result.map_err(|err| {
            let err = SimError::from(err);
            if err.is_transport() {
                tracing::error!(
                    collection = %self.name(),
                    action,
                    record_id,
                    error = %err,
                    "remote call failed"
                );
            }
            err
        })
    }

    fn refused(&self, action: &'static str, id: &SimulationId, err: &SimError) {
        tracing::warn!(
            collection = %self.name(),
            action,
            record_id = %id,
            error = %err,
            "refused to rewrite record"
        );
    }

    fn ensure_attached(&self) -> SimResult<()> {
        let mut remote = self
            .inner
            .remote
            .lock()
            .map_err(|_| SimError::internal("poisoned lock: store.remote"))?;
        if remote.is_some() {
            return Ok(());
        }

        let mirror = Arc::clone(&self.inner.mirror);
        let handle = self.remote(
            "subscribe",
            "",
            self.inner
                .collection
                .subscribe(self.name(), Box::new(move |event| mirror.on_event(event))),
        )?;
        *remote = Some(handle);
        tracing::debug!(collection = %self.name(), "attached to collection");
        Ok(())
    }

    /// Registers `callback` for every snapshot from now on.
    ///
    /// If a snapshot is already mirrored it is delivered right away, otherwise
    /// the first one arrives when the collection reports its contents. Every
    /// subscriber receives the same sequence of snapshots.
    pub fn subscribe(&self, callback: impl Fn(Arc<Snapshot>) + Send + Sync + 'static) -> SimResult<Subscription> {
        self.ensure_attached()?;
        let mirror = Arc::clone(&self.inner.mirror);
        Ok(self
            .inner
            .mirror
            .subscribers
            .register_with(callback, move || mirror.latest().map(|s| (s.sequence, s))))
    }

    /// Subscribes through a buffered channel instead of a callback.
    pub fn stream(&self) -> SimResult<SnapshotStream> {
        self.ensure_attached()?;
        let mirror = Arc::clone(&self.inner.mirror);
        Ok(SnapshotStream::attach(
            &self.inner.mirror.subscribers,
            self.inner.cfg.stream_capacity,
            move || mirror.latest().map(|s| (s.sequence, s)),
        ))
    }

    /// Detaches from the remote collection. Subscribers stay registered but
    /// receive nothing until the next `subscribe` reattaches.
    pub fn detach(&self) {
        let handle = self
            .inner
            .remote
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// The most recently mirrored snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.mirror.latest()
    }

    /// Number of listener failures reported by the collection.
    #[must_use]
    pub fn listener_errors(&self) -> u64 {
        self.inner.mirror.listener_errors.load(Ordering::Relaxed)
    }

    /// Creates a record with the default shape and returns its id.
    ///
    /// The record reaches subscribers only once the collection echoes it.
    ///
    /// # Errors
    /// - `ValidationError::EmptyTitle` if `title` is blank; nothing is written
    pub fn create_record(&self, title: &str, description: &str) -> SimResult<SimulationId> {
        let title = validate_title(title, self.inner.cfg.max_title_len)?;
        let description = description.trim();
        check_len("description", description, self.inner.cfg.max_description_len)?;

        let body = SimulationRecord::draft(title, description, Utc::now()).to_document()?;
        let id = self.remote("create", "", self.inner.collection.create(self.name(), None, body))?;
        tracing::info!(collection = %self.name(), record_id = %id, "simulation created");
        Ok(SimulationId::new(id))
    }

    /// Merges `patch` into an existing record and stamps `updatedAt`.
    ///
    /// # Errors
    /// - `RecordNotFound` if the record does not exist
    pub fn update_record(&self, id: &SimulationId, patch: &RecordPatch) -> SimResult<()> {
        patch.validate(self.inner.cfg.max_title_len, self.inner.cfg.max_description_len)?;
        let mut patch = patch.clone();
        if let Some(title) = patch.title.as_mut() {
            *title = title.trim().to_string();
        }

        let body = patch.to_document(Utc::now())?;
        self.remote(
            "update",
            id.as_str(),
            self.inner.collection.update(self.name(), id.as_str(), body),
        )
    }

    /// Sets the record lock.
    ///
    /// A record that does not exist yet is created as a stub holding only
    /// `locked` and its timestamps.
    pub fn toggle_lock(&self, id: &SimulationId, locked: bool) -> SimResult<()> {
        let action = "toggle lock";
        let existing = self.remote(action, id.as_str(), self.inner.collection.get_one(self.name(), id.as_str()))?;

        let now = timestamp_value(Utc::now());
        let mut body = Document::new();
        body.insert("locked".to_string(), Value::Bool(locked));
        body.insert("updatedAt".to_string(), now.clone());

        if existing.is_some() {
            self.remote(
                action,
                id.as_str(),
                self.inner.collection.update(self.name(), id.as_str(), body),
            )?;
        } else {
            body.insert("createdAt".to_string(), now);
            self.remote(
                action,
                id.as_str(),
                self.inner
                    .collection
                    .set(self.name(), id.as_str(), body, WriteMode::Replace),
            )?;
            tracing::info!(
                collection = %self.name(),
                record_id = %id,
                "created lock stub for missing simulation"
            );
        }

        tracing::info!(collection = %self.name(), record_id = %id, locked, "simulation lock set");
        Ok(())
    }

    /// Flips the lock of one section.
    ///
    /// Read-modify-write of the whole `sections` field; see the module docs.
    pub fn toggle_section_lock(&self, id: &SimulationId, label: SectionLabel) -> SimResult<()> {
        self.rewrite_sections(id, "toggle section lock", label, SectionEdit::ToggleLock)
    }

    /// Replaces the value of one section.
    ///
    /// Read-modify-write of the whole `sections` field; see the module docs.
    pub fn update_section_value(&self, id: &SimulationId, label: SectionLabel, value: impl Into<String>) -> SimResult<()> {
        self.rewrite_sections(id, "update section", label, SectionEdit::SetValue(value.into()))
    }

    fn rewrite_sections(&self, id: &SimulationId, action: &'static str, label: SectionLabel, edit: SectionEdit) -> SimResult<()> {
        let Some(doc) = self.remote(action, id.as_str(), self.inner.collection.get_one(self.name(), id.as_str()))? else {
            return Err(SimError::not_found(self.name(), id.as_str()));
        };

        let sections = edit_sections(&doc.data, label, edit)
            .inspect_err(|err| self.refused(action, id, err))?;

        let mut body = Document::new();
        body.insert("sections".to_string(), sections);
        body.insert("updatedAt".to_string(), timestamp_value(Utc::now()));
        self.remote(
            action,
            id.as_str(),
            self.inner.collection.update(self.name(), id.as_str(), body),
        )
    }

    /// Appends an attachment to a record.
    ///
    /// Legacy `files`/`images` arrays are folded into `attachments` by the
    /// same write. Stored entries are kept as they are.
    pub fn add_attachment(&self, id: &SimulationId, attachment: Attachment) -> SimResult<()> {
        let action = "add attachment";
        let Some(doc) = self.remote(action, id.as_str(), self.inner.collection.get_one(self.name(), id.as_str()))? else {
            return Err(SimError::not_found(self.name(), id.as_str()));
        };

        let mut body = append_attachment(&doc.data, &attachment)
            .inspect_err(|err| self.refused(action, id, err))?;
        body.insert("updatedAt".to_string(), timestamp_value(Utc::now()));
        self.remote(
            action,
            id.as_str(),
            self.inner.collection.update(self.name(), id.as_str(), body),
        )
    }

    /// Reads one record directly from the collection.
    pub fn get_record(&self, id: &SimulationId) -> SimResult<Option<SimulationRecord>> {
        let doc = self.remote("get", id.as_str(), self.inner.collection.get_one(self.name(), id.as_str()))?;
        let record = doc.as_ref().map(SimulationRecord::from_snapshot);
        if let Some(record) = &record {
            integrity::report([record]);
        }
        Ok(record)
    }

    /// Reads every record directly from the collection.
    pub fn list_records(&self) -> SimResult<Vec<SimulationRecord>> {
        let docs = self.remote("list", "", self.inner.collection.get_all(self.name()))?;
        let records: Vec<_> = docs.iter().map(SimulationRecord::from_snapshot).collect();
        integrity::report(&records);
        Ok(records)
    }
}
