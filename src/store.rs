//! Path-addressed JSON document store.
//!
//! Documents live under slash-separated paths that alternate collection and
//! document segments (`manage/ini`, `manage/meta/users/A1`). The whole store is
//! one JSON file rewritten on every change, which is plenty for a few hundred
//! documents. Readers that need to follow changes subscribe to a field query
//! and receive a fresh snapshot after every write that touches the collection.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

const STORE_VERSION: u8 = 1;
const SERVER_TIMESTAMP_KEY: &str = "$serverTimestamp";

/// Placeholder resolved to the store clock when the document is written.
pub fn server_timestamp() -> Value {
    json!({ SERVER_TIMESTAMP_KEY: true })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub data: Value,
}

impl Document {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub field: String,
    pub equals: Value,
}

impl Query {
    pub fn field_eq(collection: &str, field: &str, equals: impl Into<Value>) -> Self {
        Self {
            collection: collection.to_string(),
            field: field.to_string(),
            equals: equals.into(),
        }
    }

    fn matches(&self, path: &str, data: &Value) -> bool {
        parent_collection(path) == Some(self.collection.as_str())
            && data.get(self.field.as_str()) == Some(&self.equals)
    }
}

struct Subscriber {
    id: u64,
    query: Query,
    senders: Vec<Sender<Vec<Document>>>,
}

#[derive(Default)]
struct StoreState {
    file: Option<PathBuf>,
    documents: BTreeMap<String, Value>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<Mutex<StoreState>>,
}

impl DocumentStore {
    /// Store without a backing file; used by tests and previews.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    pub fn open(file: impl Into<PathBuf>) -> AppResult<Self> {
        let file = file.into();
        let documents = read_store_file(file.as_path())?;
        debug!(path = %file.display(), documents = documents.len(), "document store opened");
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreState {
                file: Some(file),
                documents,
                ..StoreState::default()
            })),
        })
    }

    pub fn get(&self, path: &str) -> AppResult<Option<Document>> {
        check_document_path(path)?;
        let state = self.lock()?;
        Ok(state
            .documents
            .get(path)
            .map(|data| make_document(path, data)))
    }

    /// Replaces the document wholesale.
    pub fn set(&self, path: &str, data: Value) -> AppResult<()> {
        check_document_path(path)?;
        let data = require_object(data)?;
        self.write(path, |_| Ok(resolve_server_values(data)))
    }

    /// Deep-merges `data` into the document, creating it when absent.
    pub fn set_merge(&self, path: &str, data: Value) -> AppResult<()> {
        check_document_path(path)?;
        let data = require_object(data)?;
        self.write(path, |existing| {
            let mut out = existing.cloned().unwrap_or_else(|| json!({}));
            merge_values(&mut out, resolve_server_values(data));
            Ok(out)
        })
    }

    /// Replaces the value at `field_path` of an existing document. Sibling
    /// fields at every level are kept.
    pub fn update(&self, path: &str, field_path: &[&str], value: Value) -> AppResult<()> {
        check_document_path(path)?;
        if field_path.is_empty() || field_path.iter().any(|part| part.is_empty()) {
            return Err(AppError::invalid("field path", field_path.join(".")));
        }
        self.write(path, |existing| {
            let Some(existing) = existing else {
                return Err(AppError::MissingDocument {
                    path: path.to_string(),
                });
            };
            let mut out = existing.clone();
            let mut cursor = &mut out;
            for part in &field_path[..field_path.len() - 1] {
                if !cursor.get(*part).is_some_and(|v| v.is_object()) {
                    cursor[*part] = json!({});
                }
                cursor = &mut cursor[*part];
            }
            cursor[field_path[field_path.len() - 1]] = resolve_server_values(value);
            Ok(out)
        })
    }

    /// Documents directly inside `collection`, ordered by path.
    pub fn list(&self, collection: &str) -> AppResult<Vec<Document>> {
        check_collection_path(collection)?;
        let state = self.lock()?;
        Ok(state
            .documents
            .iter()
            .filter(|(path, _)| parent_collection(path) == Some(collection))
            .map(|(path, data)| make_document(path, data))
            .collect())
    }

    pub fn query(&self, query: &Query) -> AppResult<Vec<Document>> {
        check_collection_path(query.collection.as_str())?;
        let state = self.lock()?;
        Ok(run_query(&state, query))
    }

    /// Registers a live query. The current result is delivered immediately and
    /// again after every write into the queried collection, until the handle
    /// is dropped or [`DocumentStore::unsubscribe`] is called with its id.
    pub fn subscribe(&self, query: Query) -> AppResult<Subscription> {
        check_collection_path(query.collection.as_str())?;
        let (sender, receiver) = mpsc::channel();
        let mut state = self.lock()?;
        state.next_subscriber += 1;
        let id = state.next_subscriber;
        let _ = sender.send(run_query(&state, &query));
        state.subscribers.push(Subscriber {
            id,
            query,
            senders: vec![sender],
        });
        Ok(Subscription {
            id,
            receiver,
            store: Arc::downgrade(&self.inner),
        })
    }

    pub fn unsubscribe(&self, id: u64) -> AppResult<bool> {
        let mut state = self.lock()?;
        let before = state.subscribers.len();
        state.subscribers.retain(|sub| sub.id != id);
        Ok(state.subscribers.len() != before)
    }

    fn write(
        &self,
        path: &str,
        build: impl FnOnce(Option<&Value>) -> AppResult<Value>,
    ) -> AppResult<()> {
        let mut state = self.lock()?;
        let next = build(state.documents.get(path))?;
        let mut documents = state.documents.clone();
        documents.insert(path.to_string(), next);
        if let Some(file) = state.file.as_deref() {
            write_store_file(file, &documents)?;
        }
        state.documents = documents;
        debug!(path, "document written");
        notify_subscribers(&mut state, path);
        Ok(())
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, StoreState>> {
        self.inner.lock().map_err(|_| AppError::LockPoisoned)
    }
}

pub struct Subscription {
    id: u64,
    receiver: Receiver<Vec<Document>>,
    store: Weak<Mutex<StoreState>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Newest pending snapshot, skipping older ones.
    pub fn latest(&self) -> Option<Vec<Document>> {
        self.receiver.try_iter().last()
    }

    /// Blocks until the next snapshot. `None` once the subscription ended.
    pub fn recv(&self) -> Option<Vec<Document>> {
        self.receiver.recv().ok()
    }

    /// Second receiver on the same live query, fed from the next write on.
    /// It ends together with this handle.
    pub fn tap(&self) -> AppResult<Receiver<Vec<Document>>> {
        let ended = || AppError::invalid("subscription", self.id.to_string());
        let inner = self.store.upgrade().ok_or_else(ended)?;
        let mut state = inner.lock().map_err(|_| AppError::LockPoisoned)?;
        let sub = state
            .subscribers
            .iter_mut()
            .find(|sub| sub.id == self.id)
            .ok_or_else(ended)?;
        let (sender, receiver) = mpsc::channel();
        sub.senders.push(sender);
        Ok(receiver)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            if let Ok(mut state) = inner.lock() {
                state.subscribers.retain(|sub| sub.id != self.id);
            }
        }
    }
}

fn notify_subscribers(state: &mut StoreState, path: &str) {
    let Some(collection) = parent_collection(path) else {
        return;
    };
    let view: &StoreState = state;
    let snapshots: Vec<Option<Vec<Document>>> = view
        .subscribers
        .iter()
        .map(|sub| (sub.query.collection == collection).then(|| run_query(view, &sub.query)))
        .collect();
    for (sub, snapshot) in state.subscribers.iter_mut().zip(snapshots) {
        if let Some(snapshot) = snapshot {
            sub.senders
                .retain(|sender| sender.send(snapshot.clone()).is_ok());
        }
    }
    state.subscribers.retain(|sub| !sub.senders.is_empty());
}

fn run_query(state: &StoreState, query: &Query) -> Vec<Document> {
    state
        .documents
        .iter()
        .filter(|(path, data)| query.matches(path, data))
        .map(|(path, data)| make_document(path, data))
        .collect()
}

fn make_document(path: &str, data: &Value) -> Document {
    let id = path.rsplit('/').next().unwrap_or_default().to_string();
    Document {
        id,
        path: path.to_string(),
        data: data.clone(),
    }
}

fn parent_collection(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn segments(path: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').collect();
    let valid = parts
        .iter()
        .all(|part| !part.is_empty() && *part != "." && *part != ".." && !part.contains('\\'));
    valid.then_some(parts)
}

fn check_document_path(path: &str) -> AppResult<()> {
    match segments(path) {
        Some(parts) if parts.len() % 2 == 0 => Ok(()),
        _ => Err(AppError::InvalidPath {
            path: path.to_string(),
        }),
    }
}

fn check_collection_path(path: &str) -> AppResult<()> {
    match segments(path) {
        Some(parts) if parts.len() % 2 == 1 => Ok(()),
        _ => Err(AppError::InvalidPath {
            path: path.to_string(),
        }),
    }
}

fn require_object(data: Value) -> AppResult<Value> {
    if data.is_object() {
        Ok(data)
    } else {
        Err(AppError::invalid("document", "expected a JSON object"))
    }
}

fn merge_values(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(key.as_str()) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_values(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

fn resolve_server_values(value: Value) -> Value {
    match value {
        Value::Object(map) if is_server_timestamp(&map) => {
            Value::String(chrono::Utc::now().to_rfc3339())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, resolve_server_values(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(resolve_server_values).collect()),
        other => other,
    }
}

fn is_server_timestamp(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true))
}

fn read_store_file(path: &Path) -> AppResult<BTreeMap<String, Value>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: Value = serde_json::from_str(raw.as_str())?;
    let Some(documents) = parsed.get("documents").and_then(|v| v.as_object()) else {
        warn!(path = %path.display(), "store file has no documents map; starting empty");
        return Ok(BTreeMap::new());
    };
    Ok(documents
        .iter()
        .filter(|(path, data)| data.is_object() && check_document_path(path).is_ok())
        .map(|(path, data)| (path.clone(), data.clone()))
        .collect())
}

fn write_store_file(path: &Path, documents: &BTreeMap<String, Value>) -> AppResult<()> {
    let content = serde_json::to_string_pretty(&json!({
        "version": STORE_VERSION,
        "documents": documents,
    }))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_only_the_named_field() {
        let store = DocumentStore::in_memory();
        store
            .set(
                "manage/meta/users/A1",
                json!({ "name": "kim", "answers": { "2024-04-30": { "t": { "0": 1 } } } }),
            )
            .unwrap();
        store
            .update(
                "manage/meta/users/A1",
                &["answers", "2024-05-01"],
                json!({ "t": { "0": 3 } }),
            )
            .unwrap();
        let doc = store.get("manage/meta/users/A1").unwrap().unwrap();
        assert_eq!(doc.data["answers"]["2024-04-30"]["t"]["0"], 1);
        assert_eq!(doc.data["answers"]["2024-05-01"]["t"]["0"], 3);
        assert_eq!(doc.data["name"], "kim");
    }

    #[test]
    fn update_of_missing_document_fails() {
        let store = DocumentStore::in_memory();
        let err = store
            .update("manage/meta/users/nobody", &["answers"], json!({}))
            .unwrap_err();
        assert!(matches!(err, AppError::MissingDocument { .. }));
    }

    #[test]
    fn merge_keeps_existing_map_entries_and_resolves_timestamps() {
        let store = DocumentStore::in_memory();
        store
            .set("manage/ini", json!({ "log": { "GT_1": "earlier" } }))
            .unwrap();
        store
            .set_merge("manage/ini", json!({ "log": { "GT_2": server_timestamp() } }))
            .unwrap();
        let doc = store.get("manage/ini").unwrap().unwrap();
        assert_eq!(doc.data["log"]["GT_1"], "earlier");
        let stamp = doc.data["log"]["GT_2"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn list_returns_direct_children_only() {
        let store = DocumentStore::in_memory();
        store.set("manage/ini", json!({})).unwrap();
        store.set("manage/test_1", json!({})).unwrap();
        store.set("manage/meta/users/A1", json!({})).unwrap();
        let ids: Vec<String> = store
            .list("manage")
            .unwrap()
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        assert_eq!(ids, vec!["ini", "test_1"]);
        assert_eq!(store.list("manage/meta/users").unwrap().len(), 1);
    }

    #[test]
    fn rejects_malformed_paths() {
        let store = DocumentStore::in_memory();
        assert!(store.get("manage").is_err());
        assert!(store.get("manage//ini").is_err());
        assert!(store.list("manage/ini").is_err());
        assert!(store.set("manage/../x", json!({})).is_err());
    }

    #[test]
    fn subscription_sees_initial_and_later_snapshots_until_dropped() {
        let store = DocumentStore::in_memory();
        store
            .set("manage/test_1", json!({ "test_type": "mental_health" }))
            .unwrap();
        let sub = store
            .subscribe(Query::field_eq("manage", "test_type", "mental_health"))
            .unwrap();
        assert_eq!(sub.latest().unwrap().len(), 1);

        store
            .set("manage/test_3", json!({ "test_type": "mental_health" }))
            .unwrap();
        store
            .set("manage/test_2", json!({ "test_type": "physical_health" }))
            .unwrap();
        assert_eq!(sub.latest().unwrap().len(), 2);

        let id = sub.id();
        drop(sub);
        assert!(!store.unsubscribe(id).unwrap());
    }

    #[test]
    fn explicit_unsubscribe_ends_the_stream() {
        let store = DocumentStore::in_memory();
        let sub = store
            .subscribe(Query::field_eq("manage", "test_type", "physical_health"))
            .unwrap();
        assert!(sub.recv().is_some());
        assert!(store.unsubscribe(sub.id()).unwrap());
        assert!(sub.recv().is_none());
    }

    #[test]
    fn tap_shares_one_subscription_and_ends_with_it() {
        let store = DocumentStore::in_memory();
        let sub = store
            .subscribe(Query::field_eq("manage", "test_type", "mental_health"))
            .unwrap();
        let tap = sub.tap().unwrap();
        assert!(tap.try_recv().is_err());

        store
            .set("manage/test_1", json!({ "test_type": "mental_health" }))
            .unwrap();
        assert_eq!(tap.recv().unwrap().len(), 1);
        assert_eq!(sub.latest().unwrap().len(), 1);
        assert_eq!(store.inner.lock().unwrap().subscribers.len(), 1);

        drop(sub);
        assert!(tap.recv().is_err());
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("checklist.json");
        {
            let store = DocumentStore::open(file.as_path()).unwrap();
            store.set("manage/ini", json!({ "year": 2024 })).unwrap();
        }
        let reopened = DocumentStore::open(file.as_path()).unwrap();
        let doc = reopened.get("manage/ini").unwrap().unwrap();
        assert_eq!(doc.data["year"], 2024);
    }
}
