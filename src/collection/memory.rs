//! In-memory document collection.
//!
//! Thread-safe reference implementation of [`DocumentCollection`], used for
//! embedded runs and tests. Change events are delivered on a dedicated
//! notification thread, in commit order, never on the writer's thread.
//!
//! Fault injection (`set_offline`, `set_deny_writes`, `emit_failure`) lets
//! tests exercise the transport-failure paths of callers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use super::traits::{
    ChangeListener, CollectionError, CollectionEvent, Document, DocumentCollection, DocumentSnapshot,
    ListenerHandle, WriteMode,
};

fn lock_err(context: &'static str) -> CollectionError {
    CollectionError::BackendError(format!("poisoned lock: {context}"))
}

fn to_snapshots(docs: &BTreeMap<String, Document>) -> Vec<DocumentSnapshot> {
    docs.iter()
        .map(|(id, data)| DocumentSnapshot {
            id: id.clone(),
            data: data.clone(),
        })
        .collect()
}

fn merge_into(target: &mut Document, patch: Document) {
    for (field, value) in patch {
        target.insert(field, value);
    }
}

enum NotifyMsg {
    Register {
        listener_id: u64,
        collection: String,
        listener: ChangeListener,
        active: Arc<AtomicBool>,
        initial: Vec<DocumentSnapshot>,
    },
    Unregister {
        listener_id: u64,
    },
    Changed {
        collection: String,
        docs: Vec<DocumentSnapshot>,
    },
    Failed {
        collection: String,
        message: String,
    },
}

struct ListenerEntry {
    collection: String,
    listener: ChangeListener,
    active: Arc<AtomicBool>,
}

impl ListenerEntry {
    fn deliver(&self, event: CollectionEvent) {
        // Cancellation takes effect before the next event even if the
        // Unregister message is still queued.
        if self.active.load(Ordering::Acquire) {
            (self.listener)(event);
        }
    }
}

#[derive(Debug, Default)]
struct CollectionState {
    docs: HashMap<String, BTreeMap<String, Document>>,
}

/// Thread-safe in-memory document collection.
pub struct InMemoryCollection {
    state: RwLock<CollectionState>,
    notify_tx: Sender<NotifyMsg>,
    next_listener_id: AtomicU64,
    offline: AtomicBool,
    deny_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryCollection {
    /// Creates an empty collection and starts its notification thread.
    #[must_use]
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = unbounded::<NotifyMsg>();
        let join = thread::Builder::new()
            .name("simchart-collection-notify".to_string())
            .spawn(move || notify_loop(notify_rx))
            .expect("failed to spawn simchart collection notifier");
        // The worker exits once every sender (collection and listener handles) is gone.
        drop(join);

        Self {
            state: RwLock::new(CollectionState::default()),
            notify_tx,
            next_listener_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            deny_writes: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// While offline, every call fails with `ConnectionError`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// While set, every write fails with `PermissionDenied`.
    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::Release);
    }

    /// Number of committed writes since creation.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Delivers a `Failed` event to every listener of `collection`.
    pub fn emit_failure(&self, collection: &str, message: impl Into<String>) {
        let failed = NotifyMsg::Failed {
            collection: collection.to_string(),
            message: message.into(),
        };
        if self.notify_tx.send(failed).is_err() {
            tracing::warn!(collection, "collection notifier is gone; failure not delivered");
        }
    }

    fn check_available(&self) -> Result<(), CollectionError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(CollectionError::ConnectionError("collection is offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), CollectionError> {
        self.check_available()?;
        if self.deny_writes.load(Ordering::Acquire) {
            return Err(CollectionError::PermissionDenied("writes are denied".to_string()));
        }
        Ok(())
    }

    /// Applies a mutation and queues the resulting snapshot while still
    /// holding the write lock, so listeners observe commits in order.
    fn commit<T>(
        &self,
        collection: &str,
        context: &'static str,
        mutate: impl FnOnce(&mut BTreeMap<String, Document>) -> Result<T, CollectionError>,
    ) -> Result<T, CollectionError> {
        self.check_writable()?;
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        let docs = state.docs.entry(collection.to_string()).or_default();
        let out = mutate(docs)?;
        self.writes.fetch_add(1, Ordering::AcqRel);

        let changed = NotifyMsg::Changed {
            collection: collection.to_string(),
            docs: to_snapshots(docs),
        };
        if self.notify_tx.send(changed).is_err() {
            tracing::warn!(collection, "collection notifier is gone; change not delivered");
        }
        Ok(out)
    }
}

impl Default for InMemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCollection")
            .field("offline", &self.offline.load(Ordering::Relaxed))
            .field("deny_writes", &self.deny_writes.load(Ordering::Relaxed))
            .field("writes", &self.write_count())
            .finish_non_exhaustive()
    }
}

impl DocumentCollection for InMemoryCollection {
    fn get_all(&self, collection: &str) -> Result<Vec<DocumentSnapshot>, CollectionError> {
        self.check_available()?;
        let state = self.state.read().map_err(|_| lock_err("collection.get_all"))?;
        Ok(state.docs.get(collection).map(to_snapshots).unwrap_or_default())
    }

    fn get_one(&self, collection: &str, id: &str) -> Result<Option<DocumentSnapshot>, CollectionError> {
        self.check_available()?;
        let state = self.state.read().map_err(|_| lock_err("collection.get_one"))?;
        Ok(state
            .docs
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| DocumentSnapshot {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    fn create(&self, collection: &str, id: Option<&str>, data: Document) -> Result<String, CollectionError> {
        let id = id.map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string);
        self.commit(collection, "collection.create", |docs| {
            if docs.contains_key(&id) {
                return Err(CollectionError::DuplicateKey {
                    collection: collection.to_string(),
                    id: id.clone(),
                });
            }
            docs.insert(id.clone(), data);
            Ok(id.clone())
        })
    }

    fn update(&self, collection: &str, id: &str, patch: Document) -> Result<(), CollectionError> {
        self.commit(collection, "collection.update", |docs| {
            let Some(existing) = docs.get_mut(id) else {
                return Err(CollectionError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            };
            merge_into(existing, patch);
            Ok(())
        })
    }

    fn set(&self, collection: &str, id: &str, data: Document, mode: WriteMode) -> Result<(), CollectionError> {
        self.commit(collection, "collection.set", |docs| {
            if mode == WriteMode::Merge {
                if let Some(existing) = docs.get_mut(id) {
                    merge_into(existing, data);
                    return Ok(());
                }
            }
            docs.insert(id.to_string(), data);
            Ok(())
        })
    }

    fn subscribe(&self, collection: &str, listener: ChangeListener) -> Result<ListenerHandle, CollectionError> {
        self.check_available()?;
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::AcqRel);
        let active = Arc::new(AtomicBool::new(true));

        {
            // Queue registration under the read lock so no commit can slip
            // between the initial snapshot and the first change event.
            let state = self.state.read().map_err(|_| lock_err("collection.subscribe"))?;
            let initial = state.docs.get(collection).map(to_snapshots).unwrap_or_default();
            self.notify_tx
                .send(NotifyMsg::Register {
                    listener_id,
                    collection: collection.to_string(),
                    listener,
                    active: Arc::clone(&active),
                    initial,
                })
                .map_err(|_| CollectionError::BackendError("collection notifier is gone".to_string()))?;
        }

        let control_tx = self.notify_tx.clone();
        Ok(ListenerHandle::new(move || {
            active.store(false, Ordering::Release);
            let _ = control_tx.send(NotifyMsg::Unregister { listener_id });
        }))
    }
}

fn notify_loop(rx: Receiver<NotifyMsg>) {
    let mut listeners: BTreeMap<u64, ListenerEntry> = BTreeMap::new();

    for msg in rx {
        match msg {
            NotifyMsg::Register {
                listener_id,
                collection,
                listener,
                active,
                initial,
            } => {
                let entry = ListenerEntry {
                    collection,
                    listener,
                    active,
                };
                entry.deliver(CollectionEvent::Snapshot(initial));
                listeners.insert(listener_id, entry);
            }
            NotifyMsg::Unregister { listener_id } => {
                listeners.remove(&listener_id);
            }
            NotifyMsg::Changed { collection, docs } => {
                for entry in listeners.values().filter(|e| e.collection == collection) {
                    entry.deliver(CollectionEvent::Snapshot(docs.clone()));
                }
            }
            NotifyMsg::Failed { collection, message } => {
                for entry in listeners.values().filter(|e| e.collection == collection) {
                    entry.deliver(CollectionEvent::Failed {
                        message: message.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    fn channel_listener() -> (ChangeListener, crossbeam_channel::Receiver<CollectionEvent>) {
        let (tx, rx) = unbounded();
        let listener: ChangeListener = Box::new(move |event| {
            let _ = tx.send(event);
        });
        (listener, rx)
    }

    fn snapshot_ids(event: CollectionEvent) -> Vec<String> {
        match event {
            CollectionEvent::Snapshot(docs) => docs.into_iter().map(|d| d.id).collect(),
            CollectionEvent::Failed { message } => panic!("unexpected failure: {message}"),
        }
    }

    #[test]
    fn test_create_get_update() {
        let coll = InMemoryCollection::new();
        let id = coll.create("sims", None, doc(json!({"title": "a", "locked": false}))).unwrap();
        assert!(!id.is_empty());

        coll.update("sims", &id, doc(json!({"locked": true}))).unwrap();
        let stored = coll.get_one("sims", &id).unwrap().unwrap();
        assert_eq!(stored.data["title"], json!("a"));
        assert_eq!(stored.data["locked"], json!(true));
        assert_eq!(coll.write_count(), 2);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let coll = InMemoryCollection::new();
        let err = coll.update("sims", "nope", Document::new()).unwrap_err();
        assert!(matches!(err, CollectionError::NotFound { .. }));
        assert_eq!(coll.write_count(), 0);
    }

    #[test]
    fn test_create_duplicate_id_rejected() {
        let coll = InMemoryCollection::new();
        coll.create("sims", Some("1"), Document::new()).unwrap();
        let err = coll.create("sims", Some("1"), Document::new()).unwrap_err();
        assert!(matches!(err, CollectionError::DuplicateKey { .. }));
    }

    #[test]
    fn test_set_merge_and_replace() {
        let coll = InMemoryCollection::new();
        coll.set("sims", "1", doc(json!({"a": 1, "b": 2})), WriteMode::Replace).unwrap();
        coll.set("sims", "1", doc(json!({"b": 3})), WriteMode::Merge).unwrap();
        assert_eq!(coll.get_one("sims", "1").unwrap().unwrap().data, doc(json!({"a": 1, "b": 3})));

        coll.set("sims", "1", doc(json!({"c": 4})), WriteMode::Replace).unwrap();
        assert_eq!(coll.get_one("sims", "1").unwrap().unwrap().data, doc(json!({"c": 4})));

        coll.set("sims", "2", doc(json!({"d": 5})), WriteMode::Merge).unwrap();
        assert_eq!(coll.get_all("sims").unwrap().len(), 2);
    }

    #[test]
    fn test_subscribe_initial_then_changes_in_order() {
        let coll = InMemoryCollection::new();
        coll.create("sims", Some("a"), Document::new()).unwrap();

        let (listener, rx) = channel_listener();
        let _handle = coll.subscribe("sims", listener).unwrap();
        coll.create("sims", Some("b"), Document::new()).unwrap();
        coll.create("other", Some("x"), Document::new()).unwrap();
        coll.create("sims", Some("c"), Document::new()).unwrap();

        let timeout = Duration::from_secs(1);
        assert_eq!(snapshot_ids(rx.recv_timeout(timeout).unwrap()), ["a"]);
        assert_eq!(snapshot_ids(rx.recv_timeout(timeout).unwrap()), ["a", "b"]);
        assert_eq!(snapshot_ids(rx.recv_timeout(timeout).unwrap()), ["a", "b", "c"]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_cancelled_listener_receives_nothing() {
        let coll = InMemoryCollection::new();
        let (listener, rx) = channel_listener();
        let handle = coll.subscribe("sims", listener).unwrap();
        assert_eq!(snapshot_ids(rx.recv_timeout(Duration::from_secs(1)).unwrap()), Vec::<String>::new());

        handle.cancel();
        handle.cancel();
        coll.create("sims", Some("a"), Document::new()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_faults() {
        let coll = InMemoryCollection::new();
        coll.set_offline(true);
        assert!(matches!(coll.get_all("sims"), Err(CollectionError::ConnectionError(_))));
        coll.set_offline(false);

        coll.set_deny_writes(true);
        assert!(matches!(
            coll.create("sims", None, Document::new()),
            Err(CollectionError::PermissionDenied(_))
        ));
        assert!(coll.get_all("sims").is_ok());
        assert_eq!(coll.write_count(), 0);

        let (listener, rx) = channel_listener();
        let _handle = coll.subscribe("sims", listener).unwrap();
        let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        coll.emit_failure("sims", "listener revoked");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            CollectionEvent::Failed {
                message: "listener revoked".to_string()
            }
        );
    }
}
