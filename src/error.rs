//! Error types for the settings editing core
//!
//! Application code (CLI, config loading, file persistence) uses `anyhow`;
//! the library surfaces typed errors so callers can match on the failed ids
//! of a partially rejected save.

use crate::types::SettingId;

/// Errors raised while parsing a selector or an `enableQuery`
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// String-encoded query is not valid JSON
    #[error("invalid query JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Selector must be a JSON object
    #[error("selector must be an object, got {0}")]
    NotAnObject(String),

    /// Unsupported `$` operator
    #[error("unknown query operator: '{0}'")]
    UnknownOperator(String),

    /// Operator was given an operand of the wrong shape
    #[error("invalid operand for {operator}: {message}")]
    InvalidOperand { operator: String, message: String },
}

impl QueryError {
    pub fn invalid_operand(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperand {
            operator: operator.into(),
            message: message.into(),
        }
    }
}

/// Errors applying a field update to a stored document
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The update produced a document that no longer deserializes
    #[error("update left document '{id}' malformed: {source}")]
    Malformed {
        id: SettingId,
        #[source]
        source: serde_json::Error,
    },

    /// `_id` is immutable
    #[error("cannot modify '_id' of document '{0}'")]
    ImmutableId(SettingId),

    /// Insert with an id that already exists
    #[error("duplicate document id: '{0}'")]
    Duplicate(SettingId),
}

/// Error reported by the remote persistence layer for a batch write
///
/// `setting_ids` lists exactly the identifiers that were not written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch write rejected {} setting(s): {message}", setting_ids.len())]
pub struct BatchSetError {
    pub message: String,
    pub setting_ids: Vec<SettingId>,
}

impl BatchSetError {
    pub fn new(message: impl Into<String>, setting_ids: Vec<SettingId>) -> Self {
        Self {
            message: message.into(),
            setting_ids,
        }
    }
}

/// Local editing failures
#[derive(Debug, thiserror::Error)]
pub enum EditingError {
    /// Draft store references a setting the persisted mirror does not have
    #[error("persisted mirror has no setting '{0}'")]
    MissingPersisted(SettingId),

    /// Setting is not present in the draft store
    #[error("unknown setting: '{0}'")]
    UnknownSetting(SettingId),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

/// Failures of `save_group`
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// Remote rejected some settings; those remain marked changed
    #[error("save rejected: {0}")]
    Rejected(#[from] BatchSetError),

    #[error("editing error: {0}")]
    Editing(#[from] EditingError),
}

impl SaveError {
    /// Identifiers that failed to save (empty for local errors)
    pub fn failed_ids(&self) -> &[SettingId] {
        match self {
            SaveError::Rejected(err) => &err.setting_ids,
            SaveError::Editing(_) => &[],
        }
    }
}

impl From<DocumentError> for SaveError {
    fn from(err: DocumentError) -> Self {
        SaveError::Editing(EditingError::Document(err))
    }
}
