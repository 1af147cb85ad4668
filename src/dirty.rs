//! Dirty tracking over the draft store
//!
//! A setting is dirty when its draft carries `changed: true`. Group and
//! section flags are derived: a group is changed when any of its settings is,
//! and a section when any setting of that group and section is. The default
//! section (`""`) also covers settings with no `section` field at all.

use crate::constants::{editing::DEFAULT_SECTION, fields};
use crate::store::{Collection, Computed, Selector};
use crate::types::{GroupId, SettingId};

/// Settings of `group`
pub fn in_group(group: &GroupId) -> Selector {
    Selector::eq(fields::GROUP, group.as_str())
}

/// Settings of `group` within `section`, folding a missing section into the default one
pub fn in_section(group: &GroupId, section: &str) -> Selector {
    let section_match = if section == DEFAULT_SECTION {
        Selector::any(vec![
            Selector::eq(fields::SECTION, DEFAULT_SECTION),
            Selector::exists(fields::SECTION, false),
        ])
    } else {
        Selector::eq(fields::SECTION, section)
    };
    in_group(group).and(section_match)
}

pub fn is_changed() -> Selector {
    Selector::eq(fields::CHANGED, true)
}

/// Changed settings of `group`
pub fn changed_in_group(group: &GroupId) -> Selector {
    in_group(group).and(is_changed())
}

/// Changed settings of `group` within `section`
pub fn changed_in_section(group: &GroupId, section: &str) -> Selector {
    in_section(group, section).and(is_changed())
}

/// Derives changed flags from the draft store
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    draft: Collection,
}

impl DirtyTracker {
    pub fn new(draft: &Collection) -> Self {
        Self { draft: draft.clone() }
    }

    pub fn setting_changed(&self, id: &SettingId) -> bool {
        self.draft.get(id).is_some_and(|doc| doc.changed)
    }

    pub fn group_changed(&self, group: &GroupId) -> bool {
        self.draft.find_one(&changed_in_group(group)).is_some()
    }

    pub fn section_changed(&self, group: &GroupId, section: &str) -> bool {
        self.draft.find_one(&changed_in_section(group, section)).is_some()
    }

    /// Ids of every changed setting in `group`
    pub fn changed_ids(&self, group: &GroupId) -> Vec<SettingId> {
        self.draft.find(&changed_in_group(group), Default::default()).ids()
    }

    /// Live group flag, recomputed whenever a setting of the group changes
    pub fn watch_group(&self, group: &GroupId) -> Computed<bool> {
        let selector = changed_in_group(group);
        Computed::new(&self.draft, in_group(group), move |draft| {
            draft.find_one(&selector).is_some()
        })
    }

    /// Live section flag
    pub fn watch_section(&self, group: &GroupId, section: &str) -> Computed<bool> {
        let selector = changed_in_section(group, section);
        Computed::new(&self.draft, in_section(group, section), move |draft| {
            draft.find_one(&selector).is_some()
        })
    }
}
