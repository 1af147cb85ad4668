//! Editing session for one group page
//!
//! The session owns the draft store for its lifetime, keeps it in sync with
//! the persisted mirror, and exposes the derived values the group page
//! renders: the group record with its `changed` flag, the ordered sections,
//! and one `SettingView` per edited setting. Mirror observation stops exactly
//! once when the session is closed or dropped.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::constants::{editing, fields, kinds};
use crate::dirty::{in_group, DirtyTracker};
use crate::error::{EditingError, SaveError};
use crate::mirror::{MirrorSync, PersistedMirror};
use crate::reconciler::{Reconciler, RemoteSettings, SaveOutcome};
use crate::sections::{group_sections, watch_sections, Section};
use crate::setting_view::SettingView;
use crate::store::{Collection, Computed, Selector};
use crate::types::{GroupId, SettingId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Delay before an edit is written to the draft store
    pub debounce: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(editing::DEBOUNCE_MS),
        }
    }
}

/// Group record as shown in the page header
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    pub id: GroupId,
    pub label: Option<String>,
    pub description: Option<String>,
    pub changed: bool,
}

/// One section of the page with its live `changed` flag
#[derive(Debug)]
pub struct SectionView {
    pub name: String,
    pub settings: Vec<SettingId>,
    pub changed: Computed<bool>,
}

fn group_record(group: &GroupId) -> Selector {
    Selector::id(group).and(Selector::eq(fields::TYPE, kinds::GROUP))
}

fn read_group(draft: &Collection, group: &GroupId) -> Option<GroupView> {
    let record = draft.find_one(&group_record(group))?;
    let text = |name: &str| match record.field(name) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    };
    Some(GroupView {
        id: group.clone(),
        label: text(fields::LABEL),
        description: text(fields::DESCRIPTION),
        changed: DirtyTracker::new(draft).group_changed(group),
    })
}

pub struct EditingSession<R> {
    group_id: GroupId,
    options: SessionOptions,
    persisted: PersistedMirror,
    draft: Collection,
    tracker: DirtyTracker,
    reconciler: Reconciler<R>,
    group: Computed<Option<GroupView>>,
    sections: Computed<Vec<Section>>,
    views: Mutex<HashMap<SettingId, Weak<SettingView>>>,
    mirror: MirrorSync,
}

impl<R: RemoteSettings> EditingSession<R> {
    /// Create the draft store, seed it from the mirror and start following it
    pub fn open(
        persisted: &PersistedMirror,
        remote: R,
        group: impl Into<GroupId>,
        options: SessionOptions,
    ) -> Self {
        let group_id = group.into();
        let draft = Collection::new("draft");
        let mirror = MirrorSync::start(persisted, &draft);

        let group_view = {
            let id = group_id.clone();
            let dependency = Selector::any(vec![group_record(&group_id), in_group(&group_id)]);
            Computed::new(&draft, dependency, move |draft| read_group(draft, &id))
        };

        info!(
            group = %group_id,
            settings = draft.count(&in_group(&group_id)),
            debounce_ms = options.debounce.as_millis() as u64,
            "Editing session opened"
        );

        Self {
            tracker: DirtyTracker::new(&draft),
            reconciler: Reconciler::new(&draft, persisted, remote),
            sections: watch_sections(&draft, &group_id),
            group: group_view,
            views: Mutex::new(HashMap::new()),
            persisted: persisted.clone(),
            group_id,
            options,
            draft,
            mirror,
        }
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// `None` when the mirror holds no record for this group
    pub fn group(&self) -> Option<GroupView> {
        self.group.get()
    }

    pub fn watch_group(&self) -> watch::Receiver<Option<GroupView>> {
        self.group.subscribe()
    }

    pub fn sections(&self) -> Vec<Section> {
        self.sections.get()
    }

    pub fn watch_sections(&self) -> watch::Receiver<Vec<Section>> {
        self.sections.subscribe()
    }

    pub fn section(&self, name: &str) -> SectionView {
        let settings = group_sections(&self.draft, &self.group_id)
            .into_iter()
            .find(|section| section.name == name)
            .map(|section| section.settings.into_iter().map(|s| s.id).collect())
            .unwrap_or_default();
        SectionView {
            name: name.to_string(),
            settings,
            changed: self.tracker.watch_section(&self.group_id, name),
        }
    }

    /// View for one setting. Views are shared while alive so edits to the
    /// same setting go through one debouncer.
    pub fn setting(&self, id: &SettingId) -> Result<Arc<SettingView>, EditingError> {
        let mut views = self.views.lock();
        if let Some(view) = views.get(id).and_then(Weak::upgrade) {
            return Ok(view);
        }

        let setting = self
            .draft
            .get(id)
            .ok_or_else(|| EditingError::UnknownSetting(id.clone()))?;
        let view = Arc::new(SettingView::new(
            &setting,
            &self.draft,
            &self.persisted,
            self.options.debounce,
        )?);
        views.retain(|_, view| view.strong_count() > 0);
        views.insert(id.clone(), Arc::downgrade(&view));
        Ok(view)
    }

    /// Write all debounced edits to the draft store now
    pub fn flush(&self) -> usize {
        let live: Vec<Arc<SettingView>> =
            self.views.lock().values().filter_map(Weak::upgrade).collect();
        let flushed = live.iter().filter(|view| view.flush()).count();
        if flushed > 0 {
            debug!(group = %self.group_id, flushed, "Flushed pending edits");
        }
        flushed
    }

    pub fn reset_group(&self) -> Result<usize, EditingError> {
        self.flush();
        self.reconciler.reset_group(&self.group_id)
    }

    pub fn reset_section(&self, section: &str) -> Result<usize, EditingError> {
        self.flush();
        self.reconciler.reset_section(&self.group_id, section)
    }

    pub async fn save_group(&self) -> Result<SaveOutcome, SaveError> {
        self.flush();
        self.reconciler.save_group(&self.group_id).await
    }

    pub fn tracker(&self) -> &DirtyTracker {
        &self.tracker
    }

    pub fn draft(&self) -> &Collection {
        &self.draft
    }

    pub fn is_mirroring(&self) -> bool {
        self.mirror.is_running()
    }

    /// End the session; the draft store goes away with it
    pub fn close(self) {}
}

impl<R> Drop for EditingSession<R> {
    fn drop(&mut self) {
        self.mirror.stop();
        info!(group = %self.group_id, "Editing session closed");
    }
}

impl<R> std::fmt::Debug for EditingSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditingSession")
            .field("group_id", &self.group_id)
            .field("draft", &self.draft)
            .field("mirroring", &self.mirror.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchSetError;
    use crate::mirror::RemoteChange;
    use crate::types::{Setting, SettingChange, SettingUpdate};
    use serde_json::json;

    const DELAY: Duration = Duration::from_millis(70);

    /// Accepts everything except `reject` and echoes accepted writes into the mirror
    struct EchoRemote {
        mirror: PersistedMirror,
        reject: Vec<SettingId>,
    }

    impl RemoteSettings for EchoRemote {
        async fn batch_set(&self, settings: Vec<SettingUpdate>) -> Result<(), BatchSetError> {
            let mut failed = Vec::new();
            for update in settings {
                if self.reject.contains(&update.id) {
                    failed.push(update.id);
                    continue;
                }
                if let Some(mut current) = self.mirror.find_one(&update.id) {
                    current.value = update.value;
                    current.editor = update.editor;
                    self.mirror
                        .apply_remote(RemoteChange::Changed(current))
                        .map_err(|err| BatchSetError::new(err.to_string(), vec![]))?;
                }
            }
            if failed.is_empty() {
                Ok(())
            } else {
                Err(BatchSetError::new("rejected", failed))
            }
        }
    }

    fn persisted() -> PersistedMirror {
        PersistedMirror::from_documents(vec![
            Setting::group_record("General", "General_Label"),
            Setting::new("Site_Name", "General", json!("Chat")),
            Setting::new("Site_Url", "General", json!("http://localhost")),
            Setting::new("Force_SSL", "General", json!(false)).with_section("Security"),
            Setting::new("Other", "Layout", json!(1)),
        ])
    }

    fn open(persisted: &PersistedMirror, reject: &[&str]) -> EditingSession<EchoRemote> {
        let remote = EchoRemote {
            mirror: persisted.clone(),
            reject: reject.iter().map(|id| SettingId::from(*id)).collect(),
        };
        EditingSession::open(persisted, remote, "General", SessionOptions { debounce: DELAY })
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_marks_group_and_section() {
        let persisted = persisted();
        let session = open(&persisted, &[]);
        let group = session.group().unwrap();
        assert_eq!(group.label.as_deref(), Some("General_Label"));
        assert!(!group.changed);

        let security = session.section("Security");
        assert_eq!(security.settings, vec![SettingId::from("Force_SSL")]);
        let view = session.setting(&SettingId::from("Force_SSL")).unwrap();
        view.on_change(SettingChange::value(json!(true))).unwrap();

        // local state is immediate, the draft follows after the debounce
        assert!(view.state().changed);
        assert!(!security.changed.get());
        tokio::time::sleep(DELAY * 2).await;

        assert!(security.changed.get());
        assert!(session.group().unwrap().changed);
        let sections = session.sections();
        assert_eq!(sections.len(), 2);
        assert!(!sections[0].changed);
        assert!(sections[1].changed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_flushes_pending_edits() {
        let persisted = persisted();
        let session = open(&persisted, &[]);
        let view = session.setting(&SettingId::from("Site_Name")).unwrap();
        view.on_change(SettingChange::value(json!("Rocket"))).unwrap();

        let outcome = session.save_group().await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved(vec![SettingId::from("Site_Name")]));
        assert_eq!(
            persisted.find_one(&SettingId::from("Site_Name")).unwrap().value,
            Some(json!("Rocket"))
        );
        assert!(!session.group().unwrap().changed);
        assert!(!view.state().changed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_edit_saved_after_editor_reverted() {
        let persisted = PersistedMirror::from_documents(vec![
            Setting::new("Accent", "General", json!(5)).with_editor(json!("plain")),
        ]);
        let session = open(&persisted, &[]);
        let id = SettingId::from("Accent");
        let view = session.setting(&id).unwrap();

        view.on_change(SettingChange::value(json!(6))).unwrap();
        view.flush();
        view.on_change(SettingChange::editor(json!("plain"))).unwrap();
        view.flush();
        assert!(session.tracker().setting_changed(&id));

        let outcome = session.save_group().await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved(vec![id.clone()]));
        assert_eq!(persisted.find_one(&id).unwrap().value, Some(json!(6)));
        assert!(!view.state().changed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_failed_dirty() {
        let persisted = persisted();
        let session = open(&persisted, &["Site_Url"]);
        for (id, value) in [("Site_Name", json!("Rocket")), ("Site_Url", json!("https://x"))] {
            session
                .setting(&SettingId::from(id))
                .unwrap()
                .on_change(SettingChange::value(value))
                .unwrap();
        }

        let err = session.save_group().await.unwrap_err();
        assert_eq!(err.failed_ids(), &[SettingId::from("Site_Url")]);
        assert_eq!(
            session.tracker().changed_ids(session.group_id()),
            vec![SettingId::from("Site_Url")]
        );
        assert!(session.group().unwrap().changed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_section_and_group() {
        let persisted = persisted();
        let session = open(&persisted, &[]);
        for (id, value) in [("Site_Name", json!("Rocket")), ("Force_SSL", json!(true))] {
            session
                .setting(&SettingId::from(id))
                .unwrap()
                .on_change(SettingChange::value(value))
                .unwrap();
        }

        assert_eq!(session.reset_section("Security").unwrap(), 1);
        assert!(!session.tracker().section_changed(session.group_id(), "Security"));
        assert!(session.group().unwrap().changed);

        assert_eq!(session.reset_group().unwrap(), 1);
        let view = session.setting(&SettingId::from("Site_Name")).unwrap();
        assert_eq!(view.state().value, Some(json!("Chat")));
        assert!(!view.state().changed);
        assert!(!session.group().unwrap().changed);
    }

    #[test]
    fn test_views_are_shared_while_alive() {
        let persisted = persisted();
        let session = open(&persisted, &[]);
        let id = SettingId::from("Site_Name");
        let first = session.setting(&id).unwrap();
        let second = session.setting(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(matches!(
            session.setting(&SettingId::from("Nope")),
            Err(EditingError::UnknownSetting(_))
        ));
    }

    #[test]
    fn test_remote_update_reaches_open_session() {
        let persisted = persisted();
        let session = open(&persisted, &[]);
        persisted
            .apply_remote(RemoteChange::Added(Setting::new("Site_Logo", "General", json!(null))))
            .unwrap();
        assert_eq!(session.sections()[0].settings.len(), 3);
    }

    #[test]
    fn test_drop_stops_mirroring() {
        let persisted = persisted();
        let session = open(&persisted, &[]);
        assert!(session.is_mirroring());
        let draft = session.draft().clone();
        session.close();

        persisted
            .apply_remote(RemoteChange::Changed(Setting::new("Other", "Layout", json!(2))))
            .unwrap();
        assert_eq!(draft.get(&SettingId::from("Other")).unwrap().value, Some(json!(1)));
    }

    #[test]
    fn test_missing_group_record() {
        let persisted = persisted();
        let session = EditingSession::open(
            &persisted,
            EchoRemote {
                mirror: persisted.clone(),
                reject: vec![],
            },
            "Layout",
            SessionOptions::default(),
        );
        assert!(session.group().is_none());
        assert_eq!(session.sections().len(), 1);
    }
}
