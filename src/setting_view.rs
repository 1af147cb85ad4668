//! Per-setting editing view
//!
//! Holds what an input widget for one setting needs: the current value and
//! editor, the `changed` and `disabled` flags, and the `on_change` /
//! `on_reset` operations. Local state updates immediately; the draft store
//! write is debounced so rapid keystrokes coalesce into one update.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::debounce::Debouncer;
use crate::error::{EditingError, QueryError};
use crate::mirror::PersistedMirror;
use crate::store::{ChangeEvent, Collection, Computed, ObserveHandle, Selector, Update};
use crate::types::{Setting, SettingChange, SettingId};

/// Parse an `enableQuery`: a selector object, an array of them, or a JSON
/// string encoding either
pub fn parse_enable_query(raw: &Value) -> Result<Vec<Selector>, QueryError> {
    let decoded;
    let value = match raw {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text)?;
            &decoded
        }
        other => other,
    };

    match value {
        Value::Array(items) => items.iter().map(Selector::from_json).collect(),
        single => Ok(vec![Selector::from_json(single)?]),
    }
}

/// Value/editor/changed as shown by the widget
#[derive(Debug, Clone, PartialEq)]
pub struct SettingState {
    pub value: Option<Value>,
    pub editor: Option<Value>,
    pub changed: bool,
}

impl SettingState {
    fn from_setting(setting: &Setting) -> Self {
        Self {
            value: setting.value.clone(),
            editor: setting.editor.clone(),
            changed: setting.changed,
        }
    }

    fn apply(&mut self, change: &SettingChange) {
        if let Some(value) = &change.value {
            self.value = Some(value.clone());
        }
        if let Some(editor) = &change.editor {
            self.editor = Some(editor.clone());
        }
    }

    /// Whether value or editor differs from the persisted record
    fn differs_from(&self, persisted: &Setting) -> bool {
        let null = Value::Null;
        differs(persisted.value.clone(), self.value.as_ref().unwrap_or(&null))
            || differs(persisted.editor.clone(), self.editor.as_ref().unwrap_or(&null))
    }
}

/// Widget state plus the edits not yet written to the draft store
#[derive(Debug)]
struct Local {
    state: SettingState,
    unwritten: SettingChange,
}

/// Snapshot handed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct SettingProps {
    pub id: SettingId,
    pub value: Option<Value>,
    pub editor: Option<Value>,
    pub changed: bool,
    pub disabled: bool,
}

#[derive(Debug)]
struct DraftWrite {
    change: SettingChange,
    changed: bool,
}

/// Absent fields compare as `null`; numbers compare by value
fn differs(persisted: Option<Value>, edited: &Value) -> bool {
    let persisted = persisted.unwrap_or(Value::Null);
    match (&persisted, edited) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() != b.as_f64(),
        _ => persisted != *edited,
    }
}

pub struct SettingView {
    id: SettingId,
    blocked: bool,
    persisted: PersistedMirror,
    local: Arc<Mutex<Local>>,
    enabled: Option<Computed<bool>>,
    writer: Debouncer<DraftWrite>,
    _follow: ObserveHandle,
}

impl SettingView {
    pub fn new(
        setting: &Setting,
        draft: &Collection,
        persisted: &PersistedMirror,
        delay: Duration,
    ) -> Result<Self, EditingError> {
        let id = setting.id.clone();

        let initial = draft
            .get(&id)
            .or_else(|| persisted.find_one(&id))
            .ok_or_else(|| EditingError::UnknownSetting(id.clone()))?;
        let local = Arc::new(Mutex::new(Local {
            state: SettingState::from_setting(&initial),
            unwritten: SettingChange::default(),
        }));

        let enabled = match &setting.enable_query {
            Some(raw) if !setting.blocked => {
                let queries = parse_enable_query(raw)?;
                let dependency = Selector::any(queries.clone());
                Some(Computed::new(draft, dependency, move |draft| {
                    queries.iter().all(|query| draft.find_one(query).is_some())
                }))
            }
            _ => None,
        };

        let follow = {
            let local = Arc::clone(&local);
            draft.watch(Selector::id(&id), move |event| {
                if let ChangeEvent::Added(doc) | ChangeEvent::Changed { new: doc, .. } = event {
                    let mut local = local.lock();
                    let mut next = SettingState::from_setting(doc);
                    // edits still waiting on the debounce stay on top of the draft
                    if !local.unwritten.is_empty() {
                        next.apply(&local.unwritten);
                        next.changed = local.state.changed;
                    }
                    local.state = next;
                }
            })
        };

        let writer = {
            let draft = draft.clone();
            let id = id.clone();
            let local = Arc::clone(&local);
            Debouncer::new(delay, move |write: DraftWrite| {
                {
                    let mut local = local.lock();
                    if local.unwritten == write.change {
                        local.unwritten = SettingChange::default();
                    }
                }
                let update = write
                    .change
                    .fields()
                    .fold(Update::new(), |update, (field, value)| update.set(field, value.clone()))
                    .mark_changed(write.changed);
                match draft.update_one(&id, &update) {
                    Ok(_) => debug!(id = %id, changed = write.changed, "Draft updated"),
                    Err(err) => error!(id = %id, error = %err, "Failed to write draft"),
                }
            })
        };

        Ok(Self {
            id,
            blocked: setting.blocked,
            persisted: persisted.clone(),
            local,
            enabled,
            writer,
            _follow: follow,
        })
    }

    pub fn id(&self) -> &SettingId {
        &self.id
    }

    pub fn state(&self) -> SettingState {
        self.local.lock().state.clone()
    }

    /// Blocked settings are always disabled; otherwise every enable query
    /// must match at least one draft document
    pub fn disabled(&self) -> bool {
        self.blocked || self.enabled.as_ref().is_some_and(|enabled| !enabled.get())
    }

    pub fn props(&self) -> SettingProps {
        let state = self.state();
        SettingProps {
            id: self.id.clone(),
            value: state.value,
            editor: state.editor,
            changed: state.changed,
            disabled: self.disabled(),
        }
    }

    /// Record an edit. The change is merged into the current value/editor
    /// pair, and `changed` is true iff that pair differs from the persisted
    /// record. Edits made within one debounce window are written together.
    pub fn on_change(&self, change: SettingChange) -> Result<(), EditingError> {
        let persisted = self
            .persisted
            .find_one(&self.id)
            .ok_or_else(|| EditingError::MissingPersisted(self.id.clone()))?;

        let write = {
            let mut local = self.local.lock();
            local.state.apply(&change);
            local.unwritten.merge(change);
            let changed = local.state.differs_from(&persisted);
            local.state.changed = changed;
            DraftWrite {
                change: local.unwritten.clone(),
                changed,
            }
        };

        self.writer.call(write);
        Ok(())
    }

    /// Restore the persisted value and editor
    pub fn on_reset(&self) -> Result<(), EditingError> {
        let persisted = self
            .persisted
            .find_one(&self.id)
            .ok_or_else(|| EditingError::MissingPersisted(self.id.clone()))?;
        self.on_change(SettingChange::from_setting(&persisted))
    }

    /// Write any debounced edit to the draft store now
    pub fn flush(&self) -> bool {
        self.writer.flush()
    }

    pub fn has_pending_write(&self) -> bool {
        self.writer.is_pending()
    }
}

impl std::fmt::Debug for SettingView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingView")
            .field("id", &self.id)
            .field("state", &self.local.lock().state)
            .field("disabled", &self.disabled())
            .finish()
    }
}
