#![forbid(unsafe_code)]

//! Draft-and-commit editing core for an admin settings page
//!
//! Edits are staged in a session-scoped draft store that mirrors the
//! persisted settings. Dirty flags are derived per setting, section and
//! group, and a group's changes are committed in one batch or discarded.

pub mod config;
pub mod constants;
pub mod debounce;
pub mod dirty;
pub mod error;
pub mod mirror;
pub mod persistence;
pub mod reconciler;
pub mod sections;
pub mod session;
pub mod setting_view;
pub mod store;
pub mod types;

pub use error::{BatchSetError, EditingError, QueryError, SaveError};
pub use mirror::{PersistedMirror, RemoteChange};
pub use reconciler::{RemoteSettings, SaveOutcome};
pub use session::{EditingSession, SessionOptions};
pub use types::{GroupId, Setting, SettingChange, SettingId, SettingUpdate};
