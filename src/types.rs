//! Setting documents and the small value types passed between layers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

use crate::constants::{fields, kinds};

/// Unique document identifier (`_id`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingId(String);

/// Groups are documents too, so a group id is a document id
pub type GroupId = SettingId;

impl SettingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SettingId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SettingId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for SettingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SettingId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SettingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// A settings document as replicated from the backend
///
/// Group records share the collection with settings and are told apart by
/// `type == "group"`. Fields this layer does not interpret are kept in `extra`
/// so documents round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(rename = "_id")]
    pub id: SettingId,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,

    /// Missing or empty means the default section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Editor metadata (e.g. color vs. expression input)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorter: Option<i64>,

    #[serde(rename = "i18nLabel", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(rename = "i18nDescription", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Administratively locked; always rendered disabled
    #[serde(default, skip_serializing_if = "is_false")]
    pub blocked: bool,

    /// One selector, a list of selectors, or a JSON string encoding either
    #[serde(rename = "enableQuery", default, skip_serializing_if = "Option::is_none")]
    pub enable_query: Option<Value>,

    /// Draft-only dirty marker, serialized only when true
    #[serde(default, skip_serializing_if = "is_false")]
    pub changed: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Setting {
    /// Minimal setting belonging to `group`
    pub fn new(id: impl Into<SettingId>, group: impl Into<GroupId>, value: Value) -> Self {
        Self {
            id: id.into(),
            kind: None,
            group: Some(group.into()),
            section: None,
            value: Some(value),
            editor: None,
            sorter: None,
            label: None,
            description: None,
            blocked: false,
            enable_query: None,
            changed: false,
            extra: Map::new(),
        }
    }

    /// Group record with the given label key
    pub fn group_record(id: impl Into<GroupId>, label: impl Into<String>) -> Self {
        Self {
            kind: Some(kinds::GROUP.to_string()),
            group: None,
            value: None,
            label: Some(label.into()),
            ..Self::new(id, "", Value::Null)
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_sorter(mut self, sorter: i64) -> Self {
        self.sorter = Some(sorter);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_editor(mut self, editor: Value) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn with_enable_query(mut self, query: Value) -> Self {
        self.enable_query = Some(query);
        self
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }

    pub fn is_group(&self) -> bool {
        self.kind.as_deref() == Some(kinds::GROUP)
    }

    /// Section name with the missing case folded into the default section
    pub fn section_name(&self) -> &str {
        self.section.as_deref().unwrap_or_default()
    }

    /// Read a field by its document name; `None` means the field is absent
    pub fn field(&self, name: &str) -> Option<Value> {
        let string = |s: &Option<String>| s.as_ref().map(|s| Value::String(s.clone()));
        match name {
            fields::ID => Some(Value::String(self.id.to_string())),
            fields::TYPE => string(&self.kind),
            fields::GROUP => self.group.as_ref().map(|g| Value::String(g.to_string())),
            fields::SECTION => string(&self.section),
            fields::VALUE => self.value.clone(),
            fields::EDITOR => self.editor.clone(),
            fields::SORTER => self.sorter.map(Value::from),
            fields::LABEL => string(&self.label),
            fields::DESCRIPTION => string(&self.description),
            fields::BLOCKED => self.blocked.then_some(Value::Bool(true)),
            fields::ENABLE_QUERY => self.enable_query.clone(),
            fields::CHANGED => self.changed.then_some(Value::Bool(true)),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Serialize into a plain JSON object
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct with named fields always serializes to an object
            _ => Map::new(),
        }
    }

    pub fn from_document(document: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document))
    }

    /// The value/editor pair submitted on save
    pub fn to_update(&self) -> SettingUpdate {
        SettingUpdate {
            id: self.id.clone(),
            value: self.value.clone(),
            editor: self.editor.clone(),
        }
    }
}

/// One entry of a batch write to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingUpdate {
    #[serde(rename = "_id")]
    pub id: SettingId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<Value>,
}

/// Partial edit coming from an input widget
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingChange {
    pub value: Option<Value>,
    pub editor: Option<Value>,
}

impl SettingChange {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            editor: None,
        }
    }

    pub fn editor(editor: Value) -> Self {
        Self {
            value: None,
            editor: Some(editor),
        }
    }

    /// Full value/editor pair of a record, used to reset to it
    pub fn from_setting(setting: &Setting) -> Self {
        Self {
            value: Some(setting.value.clone().unwrap_or(Value::Null)),
            editor: Some(setting.editor.clone().unwrap_or(Value::Null)),
        }
    }

    /// Fields carried by this change, by document name
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        [(fields::VALUE, self.value.as_ref()), (fields::EDITOR, self.editor.as_ref())]
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.editor.is_none()
    }

    /// Fold a later change into this one; fields present in `later` win
    pub fn merge(&mut self, later: SettingChange) {
        if later.value.is_some() {
            self.value = later.value;
        }
        if later.editor.is_some() {
            self.editor = later.editor;
        }
    }
}
