//! Commits or discards the staged edits of a group
//!
//! `save_group` sends every changed setting of a group to the remote store in
//! one batch. When the remote rejects part of the batch, only the settings it
//! did accept lose their `changed` marker; the rejected ones stay dirty so
//! they can be retried and remain visible as unsaved.

use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::fields;
use crate::dirty::{changed_in_group, changed_in_section};
use crate::error::{BatchSetError, EditingError, SaveError};
use crate::mirror::PersistedMirror;
use crate::store::{Collection, FindOptions, Selector, Update};
use crate::types::{GroupId, SettingId, SettingUpdate};

/// Remote persistence collaborator
pub trait RemoteSettings: Send + Sync {
    /// Write all `settings` at once. On failure the error lists exactly the
    /// identifiers that were not written.
    fn batch_set(
        &self,
        settings: Vec<SettingUpdate>,
    ) -> impl Future<Output = Result<(), BatchSetError>> + Send;
}

impl<R: RemoteSettings> RemoteSettings for Arc<R> {
    fn batch_set(
        &self,
        settings: Vec<SettingUpdate>,
    ) -> impl Future<Output = Result<(), BatchSetError>> + Send {
        (**self).batch_set(settings)
    }
}

/// Result of a successful `save_group`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No setting in the group was changed; nothing was sent
    NothingToSave,
    Saved(Vec<SettingId>),
}

pub struct Reconciler<R> {
    draft: Collection,
    persisted: PersistedMirror,
    remote: R,
}

impl<R: RemoteSettings> Reconciler<R> {
    pub fn new(draft: &Collection, persisted: &PersistedMirror, remote: R) -> Self {
        Self {
            draft: draft.clone(),
            persisted: persisted.clone(),
            remote,
        }
    }

    /// Copy persisted value/editor over every changed draft of the group and
    /// clear `changed`. Returns how many settings were reset.
    pub fn reset_group(&self, group: &GroupId) -> Result<usize, EditingError> {
        let count = self.reset_matching(&changed_in_group(group))?;
        info!(group = %group, count, "Group reset to persisted values");
        Ok(count)
    }

    /// Same as `reset_group`, limited to one section
    pub fn reset_section(&self, group: &GroupId, section: &str) -> Result<usize, EditingError> {
        let count = self.reset_matching(&changed_in_section(group, section))?;
        info!(group = %group, section, count, "Section reset to persisted values");
        Ok(count)
    }

    fn reset_matching(&self, selector: &Selector) -> Result<usize, EditingError> {
        let ids = self.draft.find(selector, FindOptions::default()).ids();

        // Resolve every persisted record first so an inconsistent mirror
        // leaves the draft untouched
        let restores = ids
            .into_iter()
            .map(|id| {
                let persisted = self
                    .persisted
                    .find_one_projected(&id, &[fields::VALUE, fields::EDITOR])
                    .ok_or_else(|| EditingError::MissingPersisted(id.clone()))?;
                let update = [fields::VALUE, fields::EDITOR]
                    .into_iter()
                    .fold(Update::new(), |update, field| match persisted.get(field) {
                        Some(value) => update.set(field, value.clone()),
                        None => update.unset(field),
                    })
                    .mark_changed(false);
                Ok((id, update))
            })
            .collect::<Result<Vec<_>, EditingError>>()?;

        for (id, update) in &restores {
            self.draft.update_one(id, update)?;
        }
        Ok(restores.len())
    }

    /// Send every changed setting of the group in one batch
    pub async fn save_group(&self, group: &GroupId) -> Result<SaveOutcome, SaveError> {
        let submitted: Vec<SettingUpdate> = self
            .draft
            .find(&changed_in_group(group), FindOptions::default())
            .into_iter()
            .map(|setting| setting.to_update())
            .collect();

        if submitted.is_empty() {
            debug!(group = %group, "No changed settings to save");
            return Ok(SaveOutcome::NothingToSave);
        }

        let ids: Vec<SettingId> = submitted.iter().map(|s| s.id.clone()).collect();
        info!(group = %group, count = ids.len(), "Saving changed settings");

        match self.remote.batch_set(submitted.clone()).await {
            Ok(()) => {
                self.clear_changed(&submitted)?;
                info!(group = %group, count = ids.len(), "Settings saved");
                Ok(SaveOutcome::Saved(ids))
            }
            Err(err) => {
                let failed: HashSet<&SettingId> = err.setting_ids.iter().collect();
                let succeeded: Vec<SettingUpdate> = submitted
                    .into_iter()
                    .filter(|update| !failed.contains(&update.id))
                    .collect();
                self.clear_changed(&succeeded)?;
                warn!(
                    group = %group,
                    saved = succeeded.len(),
                    failed = err.setting_ids.len(),
                    error = %err.message,
                    "Batch save partially rejected"
                );
                Err(SaveError::Rejected(err))
            }
        }
    }

    /// Clear `changed` on written settings whose draft still holds the
    /// submitted value/editor; a re-edit made while the save was in flight
    /// stays dirty
    fn clear_changed(&self, written: &[SettingUpdate]) -> Result<(), SaveError> {
        let update = Update::new().mark_changed(false);
        for setting in written {
            let unchanged_since = Selector::id(&setting.id)
                .and(Selector::eq(fields::VALUE, setting.value.clone().unwrap_or(Value::Null)))
                .and(Selector::eq(fields::EDITOR, setting.editor.clone().unwrap_or(Value::Null)));
            if self.draft.update(&unchanged_since, &update)? == 0 {
                debug!(id = %setting.id, "Draft edited during save, keeping it dirty");
            }
        }
        Ok(())
    }
}
