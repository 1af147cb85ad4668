//! In-memory document collection
//!
//! Backs both the draft store (owned by an editing session) and the local
//! mirror of the persisted settings. Reads are synchronous snapshots;
//! mutations are applied under a lock and then dispatched to observers after
//! the lock is released, so observers may freely read this or other
//! collections before the mutating call returns.

pub mod observe;
pub mod query;
pub mod reactive;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::constants::fields;
use crate::error::DocumentError;
use crate::types::{Setting, SettingId};

pub use observe::{ChangeEvent, ObserveHandle};
pub use query::{Condition, FindOptions, Selector, SortOrder, SortSpec};
pub use reactive::Computed;

use observe::{Mutation, Registry};

#[derive(Debug, Clone, PartialEq)]
enum FieldOp {
    Set(String, Value),
    Unset(String),
}

/// Set/unset patch applied atomically to each matched document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<FieldOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(FieldOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(FieldOp::Unset(field.into()));
        self
    }

    /// Set `changed: true`, or remove the marker when false
    pub fn mark_changed(self, changed: bool) -> Self {
        if changed {
            self.set(fields::CHANGED, true)
        } else {
            self.unset(fields::CHANGED)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn apply(&self, document: &Setting) -> Result<Setting, DocumentError> {
        let mut map: Map<String, Value> = document.to_document();
        for op in &self.ops {
            match op {
                FieldOp::Set(field, value) => {
                    if field == fields::ID && value.as_str() != Some(document.id.as_str()) {
                        return Err(DocumentError::ImmutableId(document.id.clone()));
                    }
                    map.insert(field.clone(), value.clone());
                }
                FieldOp::Unset(field) => {
                    if field == fields::ID {
                        return Err(DocumentError::ImmutableId(document.id.clone()));
                    }
                    map.remove(field);
                }
            }
        }
        Setting::from_document(map).map_err(|source| DocumentError::Malformed {
            id: document.id.clone(),
            source,
        })
    }
}

/// Snapshot of a query result
#[derive(Debug, Clone)]
pub struct Cursor {
    documents: Vec<Setting>,
    fields: Option<Vec<String>>,
}

impl Cursor {
    pub fn fetch(self) -> Vec<Setting> {
        self.documents
    }

    /// Documents reduced to the projected fields (`_id` plus `FindOptions::fields`)
    pub fn project(self) -> Vec<Map<String, Value>> {
        match &self.fields {
            Some(keep) => self.documents.iter().map(|doc| query::project(doc, keep)).collect(),
            None => self.documents.iter().map(Setting::to_document).collect(),
        }
    }

    pub fn ids(&self) -> Vec<SettingId> {
        self.documents.iter().map(|doc| doc.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl IntoIterator for Cursor {
    type Item = Setting;
    type IntoIter = std::vec::IntoIter<Setting>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

/// Shared handle to a document collection; clones refer to the same documents
#[derive(Clone)]
pub struct Collection {
    name: Arc<str>,
    documents: Arc<Mutex<Vec<Setting>>>,
    registry: Registry,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            documents: Arc::new(Mutex::new(Vec::new())),
            registry: Registry::default(),
        }
    }

    /// Seed a collection; later duplicates of an id replace earlier ones
    pub fn from_documents(name: &str, documents: impl IntoIterator<Item = Setting>) -> Self {
        let collection = Self::new(name);
        {
            let mut docs = collection.documents.lock();
            for doc in documents {
                match docs.iter_mut().find(|d| d.id == doc.id) {
                    Some(existing) => *existing = doc,
                    None => docs.push(doc),
                }
            }
        }
        collection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    /// Matching documents, sorted by `options.sort` (insertion order otherwise)
    pub fn find(&self, selector: &Selector, options: FindOptions) -> Cursor {
        let mut documents: Vec<Setting> = self
            .documents
            .lock()
            .iter()
            .filter(|doc| selector.matches(doc))
            .cloned()
            .collect();
        if !options.sort.is_empty() {
            // stable sort keeps insertion order for ties
            documents.sort_by(|a, b| options.sort.compare(a, b));
        }
        Cursor {
            documents,
            fields: options.fields,
        }
    }

    pub fn find_one(&self, selector: &Selector) -> Option<Setting> {
        self.documents.lock().iter().find(|doc| selector.matches(doc)).cloned()
    }

    pub fn get(&self, id: &SettingId) -> Option<Setting> {
        self.documents.lock().iter().find(|doc| &doc.id == id).cloned()
    }

    pub fn count(&self, selector: &Selector) -> usize {
        self.documents.lock().iter().filter(|doc| selector.matches(doc)).count()
    }

    pub fn insert(&self, document: Setting) -> Result<(), DocumentError> {
        {
            let mut docs = self.documents.lock();
            if docs.iter().any(|d| d.id == document.id) {
                return Err(DocumentError::Duplicate(document.id));
            }
            docs.push(document.clone());
        }
        debug!(collection = %self.name, id = %document.id, "Document inserted");
        self.registry.dispatch(&[Mutation::Inserted(document)]);
        Ok(())
    }

    /// Apply `update` to every matching document. Either all matches are
    /// updated or, if any would become malformed, none are.
    pub fn update(&self, selector: &Selector, update: &Update) -> Result<usize, DocumentError> {
        let mutations = {
            let mut docs = self.documents.lock();
            let mut staged = Vec::new();
            for (index, doc) in docs.iter().enumerate() {
                if selector.matches(doc) {
                    staged.push((index, update.apply(doc)?));
                }
            }

            let mut mutations = Vec::with_capacity(staged.len());
            for (index, new) in staged {
                if docs[index] != new {
                    let old = std::mem::replace(&mut docs[index], new.clone());
                    mutations.push(Mutation::Updated { old, new });
                }
            }
            mutations
        };

        let touched = mutations.len();
        self.registry.dispatch(&mutations);
        Ok(touched)
    }

    pub fn update_one(&self, id: &SettingId, update: &Update) -> Result<usize, DocumentError> {
        self.update(&Selector::id(id), update)
    }

    /// Replace a document with `f(current)` under a single lock acquisition.
    /// Returns false when no document has that id.
    pub fn modify<F>(&self, id: &SettingId, f: F) -> bool
    where
        F: FnOnce(&Setting) -> Setting,
    {
        let mutation = {
            let mut docs = self.documents.lock();
            let Some(slot) = docs.iter_mut().find(|d| &d.id == id) else {
                return false;
            };
            let mut new = f(slot);
            new.id = id.clone();
            if *slot == new {
                return true;
            }
            let old = std::mem::replace(slot, new.clone());
            Mutation::Updated { old, new }
        };
        self.registry.dispatch(&[mutation]);
        true
    }

    pub fn remove(&self, selector: &Selector) -> usize {
        let removed: Vec<Mutation> = {
            let mut docs = self.documents.lock();
            let mut removed = Vec::new();
            docs.retain(|doc| {
                if selector.matches(doc) {
                    removed.push(Mutation::Removed(doc.clone()));
                    false
                } else {
                    true
                }
            });
            removed
        };
        let count = removed.len();
        self.registry.dispatch(&removed);
        count
    }

    /// Observe matching documents: current matches are replayed as `Added`,
    /// then every later change is delivered
    pub fn observe<F>(&self, selector: Selector, callback: F) -> ObserveHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let callback: observe::Callback = Arc::new(callback);
        let (handle, initial) = {
            let docs = self.documents.lock();
            let initial: Vec<Setting> =
                docs.iter().filter(|d| selector.matches(d)).cloned().collect();
            (self.registry.register(selector, Arc::clone(&callback)), initial)
        };
        for doc in initial {
            if !handle.is_active() {
                break;
            }
            callback(&ChangeEvent::Added(doc));
        }
        handle
    }

    /// Like `observe` without replaying current documents
    pub fn watch<F>(&self, selector: Selector, callback: F) -> ObserveHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.registry.register(selector, Arc::new(callback))
    }

    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("documents", &self.len())
            .field("observers", &self.observer_count())
            .finish()
    }
}
