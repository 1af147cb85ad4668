//! Groups the settings of one group page into ordered sections

use crate::constants::fields;
use crate::dirty::in_group;
use crate::store::{Collection, Computed, FindOptions, SortSpec};
use crate::types::{GroupId, Setting};

/// Settings sharing a section name within a group
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// `""` is the default (unnamed) section
    pub name: String,
    pub changed: bool,
    pub settings: Vec<Setting>,
}

/// Presentation order: section, then explicit sorter, then label key
pub fn presentation_order() -> SortSpec {
    SortSpec::new()
        .asc(fields::SECTION)
        .asc(fields::SORTER)
        .asc(fields::LABEL)
}

/// Fold already-sorted settings into sections, in first-appearance order
pub fn fold_sections(settings: impl IntoIterator<Item = Setting>) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for setting in settings {
        let name = setting.section_name();
        let index = match sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                sections.push(Section {
                    name: name.to_string(),
                    changed: false,
                    settings: Vec::new(),
                });
                sections.len() - 1
            }
        };
        let section = &mut sections[index];
        section.changed |= setting.changed;
        section.settings.push(setting);
    }
    sections
}

/// Sections of `group` as currently held in the draft store
pub fn group_sections(draft: &Collection, group: &GroupId) -> Vec<Section> {
    let cursor = draft.find(&in_group(group), FindOptions::sorted(presentation_order()));
    fold_sections(cursor)
}

/// Live sections list for a group page
pub fn watch_sections(draft: &Collection, group: &GroupId) -> Computed<Vec<Section>> {
    let group_id = group.clone();
    Computed::new(draft, in_group(group), move |draft| group_sections(draft, &group_id))
}
