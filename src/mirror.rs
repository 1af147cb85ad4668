//! Persisted settings mirror and its synchronization into the draft store
//!
//! `PersistedMirror` is the local read replica of the authoritative settings
//! collection. Editing code only reads it; the replication side (see
//! `persistence`) feeds it through `apply_remote`.
//!
//! `MirrorSync` observes the mirror for the lifetime of an editing session and
//! copies every addition, update and removal into the draft store. A persisted
//! update replaces the draft's fields but keeps the draft's `changed` marker,
//! so an unsaved local edit racing a remote update stays flagged; the field
//! values themselves are last-writer-wins.

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::DocumentError;
use crate::store::{ChangeEvent, Collection, Cursor, FindOptions, ObserveHandle, Selector};
use crate::types::{Setting, SettingId};

/// Change pushed by the replication layer
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    Added(Setting),
    Changed(Setting),
    Removed(SettingId),
}

/// Read-only view of the persisted settings replica
#[derive(Clone, Debug)]
pub struct PersistedMirror {
    collection: Collection,
}

impl PersistedMirror {
    pub fn new() -> Self {
        Self {
            collection: Collection::new("persisted"),
        }
    }

    pub fn from_documents(documents: impl IntoIterator<Item = Setting>) -> Self {
        Self {
            collection: Collection::from_documents("persisted", documents),
        }
    }

    pub fn find(&self, selector: &Selector, options: FindOptions) -> Cursor {
        self.collection.find(selector, options)
    }

    pub fn find_one(&self, id: &SettingId) -> Option<Setting> {
        self.collection.get(id)
    }

    /// Point lookup reduced to `_id` plus the requested fields
    pub fn find_one_projected(
        &self,
        id: &SettingId,
        fields: &[&str],
    ) -> Option<Map<String, Value>> {
        let options = FindOptions::default().with_fields(fields.iter().copied());
        self.collection
            .find(&Selector::id(id), options)
            .project()
            .into_iter()
            .next()
    }

    pub fn observe<F>(&self, selector: Selector, callback: F) -> ObserveHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.collection.observe(selector, callback)
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// Apply a change received from the authoritative store
    pub fn apply_remote(&self, change: RemoteChange) -> Result<(), DocumentError> {
        match change {
            RemoteChange::Added(doc) => self.collection.insert(doc),
            RemoteChange::Changed(doc) => {
                let id = doc.id.clone();
                if !self.collection.modify(&id, |_| doc.clone()) {
                    debug!(id = %id, "Remote change for unknown setting, inserting");
                    self.collection.insert(doc)?;
                }
                Ok(())
            }
            RemoteChange::Removed(id) => {
                self.collection.remove(&Selector::id(&id));
                Ok(())
            }
        }
    }
}

impl Default for PersistedMirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Running mirror → draft observation; stops exactly once, on `stop` or drop
#[derive(Debug)]
pub struct MirrorSync {
    handle: ObserveHandle,
}

impl MirrorSync {
    /// Seed `draft` from every persisted document and keep following changes
    pub fn start(mirror: &PersistedMirror, draft: &Collection) -> Self {
        let target = draft.clone();
        let handle = mirror.observe(Selector::All, move |event| mirror_event(&target, event));
        info!(documents = mirror.len(), draft = draft.name(), "Mirror observation started");
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_active()
    }

    /// Stop observing; later calls are no-ops
    pub fn stop(&self) {
        if self.handle.stop() {
            info!("Mirror observation stopped");
        }
    }
}

impl Drop for MirrorSync {
    fn drop(&mut self) {
        self.stop();
    }
}

fn mirror_event(draft: &Collection, event: &ChangeEvent) {
    match event {
        ChangeEvent::Added(doc) => {
            if let Err(err) = draft.insert(doc.clone()) {
                warn!(
                    id = %doc.id,
                    error = %err,
                    "Draft already holds mirrored setting, replacing"
                );
                keep_changed_marker(draft, doc);
            }
        }
        ChangeEvent::Changed { new, .. } => {
            if !keep_changed_marker(draft, new) {
                error!(id = %new.id, "Persisted update for a setting missing from the draft store");
            }
        }
        ChangeEvent::Removed(doc) => {
            draft.remove(&Selector::id(&doc.id));
        }
    }
}

fn keep_changed_marker(draft: &Collection, persisted: &Setting) -> bool {
    draft.modify(&persisted.id, |current| Setting {
        changed: current.changed,
        ..persisted.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Update;
    use serde_json::json;

    fn persisted() -> PersistedMirror {
        PersistedMirror::from_documents(vec![
            Setting::group_record("G", "G_Label"),
            Setting::new("A", "G", json!(1)),
            Setting::new("B", "G", json!(2)),
        ])
    }

    #[test]
    fn test_start_seeds_draft() {
        let mirror = persisted();
        let draft = Collection::new("draft");
        let _sync = MirrorSync::start(&mirror, &draft);
        assert_eq!(draft.len(), 3);
        assert_eq!(draft.get(&SettingId::from("A")), mirror.find_one(&SettingId::from("A")));
    }

    #[test]
    fn test_follows_add_change_remove() {
        let mirror = persisted();
        let draft = Collection::new("draft");
        let _sync = MirrorSync::start(&mirror, &draft);

        mirror.apply_remote(RemoteChange::Added(Setting::new("C", "G", json!(3)))).unwrap();
        assert!(draft.get(&SettingId::from("C")).is_some());

        mirror.apply_remote(RemoteChange::Changed(Setting::new("A", "G", json!(10)))).unwrap();
        assert_eq!(draft.get(&SettingId::from("A")).unwrap().value, Some(json!(10)));

        mirror.apply_remote(RemoteChange::Removed(SettingId::from("B"))).unwrap();
        assert!(draft.get(&SettingId::from("B")).is_none());
    }

    #[test]
    fn test_remote_update_keeps_local_changed_marker() {
        let mirror = persisted();
        let draft = Collection::new("draft");
        let _sync = MirrorSync::start(&mirror, &draft);
        let id = SettingId::from("A");

        draft.update_one(&id, &Update::new().set("value", 5).mark_changed(true)).unwrap();
        mirror.apply_remote(RemoteChange::Changed(Setting::new("A", "G", json!(7)))).unwrap();

        let doc = draft.get(&id).unwrap();
        assert_eq!(doc.value, Some(json!(7)));
        assert!(doc.changed);
    }

    #[test]
    fn test_stop_ends_observation() {
        let mirror = persisted();
        let draft = Collection::new("draft");
        let sync = MirrorSync::start(&mirror, &draft);
        sync.stop();
        sync.stop();
        assert!(!sync.is_running());

        mirror.apply_remote(RemoteChange::Added(Setting::new("C", "G", json!(3)))).unwrap();
        assert!(draft.get(&SettingId::from("C")).is_none());
    }

    #[test]
    fn test_drop_stops_observation() {
        let mirror = persisted();
        let draft = Collection::new("draft");
        drop(MirrorSync::start(&mirror, &draft));
        mirror.apply_remote(RemoteChange::Removed(SettingId::from("A"))).unwrap();
        assert!(draft.get(&SettingId::from("A")).is_some());
    }

    #[test]
    fn test_projected_lookup() {
        let mirror = persisted();
        let projected = mirror
            .find_one_projected(&SettingId::from("A"), &["value", "editor"])
            .unwrap();
        assert_eq!(Value::Object(projected), json!({"_id": "A", "value": 1}));
        assert!(mirror.find_one_projected(&SettingId::from("Z"), &["value"]).is_none());
    }
}
