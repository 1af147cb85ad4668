//! JSON file backed settings store
//!
//! Stands in for the remote settings backend when the editor runs locally.
//! The file holds a JSON array of setting documents. Batch writes are
//! validated per setting; the accepted subset is written back atomically and
//! echoed into the `PersistedMirror` the way a subscription feed would.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::{fields, kinds};
use crate::error::BatchSetError;
use crate::mirror::{PersistedMirror, RemoteChange};
use crate::reconciler::RemoteSettings;
use crate::store::{FindOptions, Selector, SortSpec};
use crate::types::{Setting, SettingId, SettingUpdate};

/// Why a single update was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownSetting,
    Blocked,
    GroupRecord,
    TypeMismatch { expected: &'static str },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::UnknownSetting => write!(f, "unknown setting"),
            Rejection::Blocked => write!(f, "setting is blocked"),
            Rejection::GroupRecord => write!(f, "group records are not editable"),
            Rejection::TypeMismatch { expected } => write!(f, "value must be {expected}"),
        }
    }
}

/// Check an update against the stored document
pub fn validate(current: Option<&Setting>, update: &SettingUpdate) -> Result<(), Rejection> {
    let current = current.ok_or(Rejection::UnknownSetting)?;
    if current.is_group() {
        return Err(Rejection::GroupRecord);
    }
    if current.blocked {
        return Err(Rejection::Blocked);
    }

    let Some(value) = &update.value else {
        return Ok(());
    };
    let expected = match current.kind.as_deref() {
        Some(kinds::BOOLEAN) if !value.is_boolean() => "a boolean",
        Some(kinds::INT) if !(value.is_i64() || value.is_u64()) => "an integer",
        Some(kinds::STRING) if !value.is_string() => "a string",
        Some(kinds::SELECT) if !(value.is_string() || value.is_number()) => "a string or number",
        _ => return Ok(()),
    };
    Err(Rejection::TypeMismatch { expected })
}

pub struct JsonFileRemote {
    path: PathBuf,
    mirror: PersistedMirror,
    documents: Mutex<Vec<Setting>>,
}

impl JsonFileRemote {
    /// Load the store and seed a mirror from it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings store {:?}", path))?;
        let documents: Vec<Setting> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings store {:?}", path))?;

        info!(path = ?path, documents = documents.len(), "Loaded settings store");
        Ok(Self {
            mirror: PersistedMirror::from_documents(documents.clone()),
            documents: Mutex::new(documents),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mirror(&self) -> &PersistedMirror {
        &self.mirror
    }

    /// Group records ordered by `sorter`, then id
    pub fn groups(&self) -> Vec<Setting> {
        let order = SortSpec::new().asc(fields::SORTER).asc(fields::ID);
        self.mirror
            .find(&Selector::eq(fields::TYPE, kinds::GROUP), FindOptions::sorted(order))
            .fetch()
    }

    /// Apply the valid updates and persist them; returns the rejected ids
    fn commit(&self, updates: Vec<SettingUpdate>) -> Result<(), BatchSetError> {
        let mut documents = self.documents.lock();
        let mut staged = documents.clone();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for update in updates {
            let position = staged.iter().position(|doc| doc.id == update.id);
            match validate(position.map(|i| &staged[i]), &update) {
                Ok(()) => {
                    if let Some(i) = position {
                        let doc = &mut staged[i];
                        doc.value = update.value;
                        doc.editor = update.editor;
                        accepted.push(doc.clone());
                    }
                }
                Err(reason) => {
                    warn!(id = %update.id, reason = %reason, "Rejected setting update");
                    rejected.push((update.id, reason));
                }
            }
        }

        if !accepted.is_empty() {
            if let Err(err) = write_atomic(&self.path, &staged) {
                let mut failed: Vec<SettingId> = accepted.into_iter().map(|doc| doc.id).collect();
                failed.extend(rejected.into_iter().map(|(id, _)| id));
                return Err(BatchSetError::new(format!("{:#}", err), failed));
            }
            *documents = staged;
        }
        drop(documents);

        for doc in accepted {
            debug!(id = %doc.id, "Setting written");
            if let Err(err) = self.mirror.apply_remote(RemoteChange::Changed(doc)) {
                warn!(error = %err, "Failed to update mirror after write");
            }
        }

        if rejected.is_empty() {
            return Ok(());
        }
        let message = rejected
            .iter()
            .map(|(id, reason)| format!("{id}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(BatchSetError::new(message, rejected.into_iter().map(|(id, _)| id).collect()))
    }
}

impl RemoteSettings for JsonFileRemote {
    async fn batch_set(&self, settings: Vec<SettingUpdate>) -> Result<(), BatchSetError> {
        self.commit(settings)
    }
}

impl std::fmt::Debug for JsonFileRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileRemote")
            .field("path", &self.path)
            .field("documents", &self.documents.lock().len())
            .finish()
    }
}

/// Write through a sibling temp file and rename over the target
fn write_atomic(path: &Path, documents: &[Setting]) -> Result<()> {
    let json = serde_json::to_string_pretty(documents)
        .context("Failed to serialize settings store")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace settings store {:?}", path))?;
    Ok(())
}

/// Parse a `--set` value: JSON if it parses, otherwise the raw text as a string
pub fn parse_cli_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("settings.json");
        let documents = json!([
            {"_id": "General", "type": "group", "sorter": 2, "i18nLabel": "General"},
            {"_id": "Accounts", "type": "group", "sorter": 1},
            {"_id": "Layout", "type": "group", "sorter": 1},
            {
                "_id": "Site_Name", "type": "string", "group": "General",
                "value": "Chat", "public": true
            },
            {"_id": "Port", "type": "int", "group": "General", "value": 3000},
            {
                "_id": "Force_SSL", "type": "boolean", "group": "General",
                "value": false, "blocked": true
            },
            {"_id": "Theme", "type": "select", "group": "Layout", "value": "dark"}
        ]);
        fs::write(&path, serde_json::to_string(&documents).unwrap()).unwrap();
        path
    }

    fn update(id: &str, value: Value) -> SettingUpdate {
        SettingUpdate {
            id: SettingId::from(id),
            value: Some(value),
            editor: None,
        }
    }

    #[test]
    fn test_groups_sorted_by_sorter_then_id() {
        let dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::open(store(&dir)).unwrap();
        let ids: Vec<String> = remote.groups().into_iter().map(|g| g.id.to_string()).collect();
        assert_eq!(ids, vec!["Accounts", "Layout", "General"]);
    }

    #[test]
    fn test_validate_rules() {
        let string = Setting::new("S", "G", json!("x")).with_kind(kinds::STRING);
        let int = Setting::new("I", "G", json!(1)).with_kind(kinds::INT);
        let untyped = Setting::new("U", "G", json!(1));

        assert_eq!(validate(None, &update("S", json!(1))), Err(Rejection::UnknownSetting));
        assert_eq!(
            validate(Some(&string), &update("S", json!(1))),
            Err(Rejection::TypeMismatch { expected: "a string" })
        );
        assert_eq!(
            validate(Some(&int), &update("I", json!(1.5))),
            Err(Rejection::TypeMismatch { expected: "an integer" })
        );
        assert_eq!(validate(Some(&int), &update("I", json!(-4))), Ok(()));
        assert_eq!(validate(Some(&untyped), &update("U", json!([1, 2]))), Ok(()));
        assert_eq!(
            validate(Some(&Setting::group_record("G", "G")), &update("G", json!(1))),
            Err(Rejection::GroupRecord)
        );
    }

    #[tokio::test]
    async fn test_batch_set_persists_and_updates_mirror() {
        let dir = TempDir::new().unwrap();
        let path = store(&dir);
        let remote = JsonFileRemote::open(&path).unwrap();

        remote
            .batch_set(vec![update("Site_Name", json!("Rocket")), update("Port", json!(8080))])
            .await
            .unwrap();

        let mirrored = remote.mirror().find_one(&SettingId::from("Site_Name")).unwrap();
        assert_eq!(mirrored.value, Some(json!("Rocket")));

        let reopened = JsonFileRemote::open(&path).unwrap();
        let port = reopened.mirror().find_one(&SettingId::from("Port")).unwrap();
        assert_eq!(port.value, Some(json!(8080)));
        // unknown fields survive the rewrite
        let name = reopened.mirror().find_one(&SettingId::from("Site_Name")).unwrap();
        assert_eq!(name.extra.get("public"), Some(&json!(true)));
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_partial_rejection_writes_valid_subset() {
        let dir = TempDir::new().unwrap();
        let path = store(&dir);
        let remote = JsonFileRemote::open(&path).unwrap();

        let err = remote
            .batch_set(vec![
                update("Site_Name", json!("Rocket")),
                update("Force_SSL", json!(true)),
                update("Port", json!("eighty")),
                update("Missing", json!(1)),
            ])
            .await
            .unwrap_err();

        assert_eq!(
            err.setting_ids,
            vec![SettingId::from("Force_SSL"), SettingId::from("Port"), SettingId::from("Missing")]
        );
        assert!(err.message.contains("Force_SSL: setting is blocked"));

        let reopened = JsonFileRemote::open(&path).unwrap();
        let mirror = reopened.mirror();
        assert_eq!(
            mirror.find_one(&SettingId::from("Site_Name")).unwrap().value,
            Some(json!("Rocket"))
        );
        assert_eq!(mirror.find_one(&SettingId::from("Port")).unwrap().value, Some(json!(3000)));
    }

    #[tokio::test]
    async fn test_write_failure_reports_every_id() {
        let dir = TempDir::new().unwrap();
        let path = store(&dir);
        let remote = JsonFileRemote::open(&path).unwrap();
        fs::remove_dir_all(dir.path()).unwrap();

        let err = remote.batch_set(vec![update("Site_Name", json!("Rocket"))]).await.unwrap_err();
        assert_eq!(err.setting_ids, vec![SettingId::from("Site_Name")]);
        assert_eq!(
            remote.mirror().find_one(&SettingId::from("Site_Name")).unwrap().value,
            Some(json!("Chat"))
        );
    }

    #[test]
    fn test_open_missing_file_has_context() {
        let dir = TempDir::new().unwrap();
        let err = JsonFileRemote::open(dir.path().join("absent.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read settings store"));
    }

    #[test]
    fn test_parse_cli_value() {
        assert_eq!(parse_cli_value("true"), json!(true));
        assert_eq!(parse_cli_value("42"), json!(42));
        assert_eq!(parse_cli_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_cli_value("plain text"), json!("plain text"));
    }
}
