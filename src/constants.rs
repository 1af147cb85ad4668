//! Application-wide constants
//!
//! This module contains the fixed values and string literals used throughout
//! the editor, providing a single source of truth for constant values.

/// Editing session constants
pub mod editing {
    /// Delay used to coalesce rapid input events before writing to the draft store
    pub const DEBOUNCE_MS: u64 = 70;

    /// Upper bound accepted for a configured debounce delay
    pub const MAX_DEBOUNCE_MS: u64 = 5_000;

    /// Section name meaning "no section" (also matches a missing `section` field)
    pub const DEFAULT_SECTION: &str = "";
}

/// Document field names as sent by the settings backend
pub mod fields {
    pub const ID: &str = "_id";
    pub const TYPE: &str = "type";
    pub const GROUP: &str = "group";
    pub const SECTION: &str = "section";
    pub const VALUE: &str = "value";
    pub const EDITOR: &str = "editor";
    pub const SORTER: &str = "sorter";
    pub const LABEL: &str = "i18nLabel";
    pub const DESCRIPTION: &str = "i18nDescription";
    pub const BLOCKED: &str = "blocked";
    pub const ENABLE_QUERY: &str = "enableQuery";
    pub const CHANGED: &str = "changed";
}

/// Setting kinds (`type` field) with special handling
pub mod kinds {
    /// Documents of this type describe a group page, not an editable setting
    pub const GROUP: &str = "group";
    pub const BOOLEAN: &str = "boolean";
    pub const INT: &str = "int";
    pub const STRING: &str = "string";
    pub const SELECT: &str = "select";
}

/// Configuration file locations
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "settings-editor";

    /// Editor configuration file name
    pub const FILENAME: &str = "config.json";

    /// Default settings store file name (inside APP_DIR)
    pub const STORE_FILENAME: &str = "settings.json";
}
