use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::error::CoreError;
use crate::ids::ItemId;
use crate::slices::*;

/// A user intent against trip state. Each action touches exactly one slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    AddGearItem {
        id: ItemId,
        label: String,
    },
    SetGearChecked {
        id: ItemId,
        checked: bool,
    },
    RemoveGearItem {
        id: ItemId,
    },
    SetPill {
        date: String,
        person: String,
        taken: bool,
    },
    AddUserItem {
        id: ItemId,
        text: String,
        day: Option<String>,
        time_of_day: Option<TimeOfDay>,
    },
    EditUserItem {
        id: ItemId,
        text: String,
    },
    RemoveUserItem {
        id: ItemId,
    },
    SetChecklistItem {
        key: String,
        done: bool,
    },
    AddCopyPhrase {
        id: ItemId,
        text: String,
        category: Option<String>,
    },
    RemoveCopyPhrase {
        id: ItemId,
    },
    SetBigText {
        enabled: bool,
    },
}

impl Action {
    pub fn add_gear(label: impl Into<String>) -> Self {
        Self::AddGearItem {
            id: ItemId::new(),
            label: label.into(),
        }
    }

    pub fn add_user_item(text: impl Into<String>, day: Option<&str>, time_of_day: Option<TimeOfDay>) -> Self {
        Self::AddUserItem {
            id: ItemId::new(),
            text: text.into(),
            day: day.map(str::to_string),
            time_of_day,
        }
    }

    pub fn add_copy_phrase(text: impl Into<String>, category: Option<&str>) -> Self {
        Self::AddCopyPhrase {
            id: ItemId::new(),
            text: text.into(),
            category: category.map(str::to_string),
        }
    }

    pub fn slice(&self) -> SliceName {
        match self {
            Self::AddGearItem { .. } | Self::SetGearChecked { .. } | Self::RemoveGearItem { .. } => {
                SliceName::Gear
            }
            Self::SetPill { .. } => SliceName::Pills,
            Self::AddUserItem { .. } | Self::EditUserItem { .. } | Self::RemoveUserItem { .. } => {
                SliceName::UserItems
            }
            Self::SetChecklistItem { .. } => SliceName::Checklist,
            Self::AddCopyPhrase { .. } | Self::RemoveCopyPhrase { .. } => SliceName::CopyPhrases,
            Self::SetBigText { .. } => SliceName::Ui,
        }
    }

    /// Compute the new content of the affected slice. Entities touched by the
    /// action carry `stamp` as their own `updatedAt`.
    pub fn apply(&self, state: &TripState, stamp: Millis) -> Result<SliceData, CoreError> {
        let data = match self {
            Self::AddGearItem { id, label } => {
                let mut items = state.gear.data.clone();
                insert_new(&mut items, GearItem {
                    id: id.clone(),
                    label: label.clone(),
                    checked: false,
                    deleted: false,
                    updated_at: Some(stamp),
                })?;
                SliceData::Gear(items)
            }
            Self::SetGearChecked { id, checked } => {
                let mut items = state.gear.data.clone();
                let item = find_live(&mut items, id)?;
                item.checked = *checked;
                item.updated_at = Some(stamp);
                SliceData::Gear(items)
            }
            Self::RemoveGearItem { id } => {
                let mut items = state.gear.data.clone();
                let item = find_live(&mut items, id)?;
                item.deleted = true;
                item.updated_at = Some(stamp);
                SliceData::Gear(items)
            }
            Self::SetPill { date, person, taken } => {
                let mut log = state.pills.data.clone();
                log.entry(date.clone())
                    .or_default()
                    .insert(person.clone(), *taken);
                SliceData::Pills(log)
            }
            Self::AddUserItem {
                id,
                text,
                day,
                time_of_day,
            } => {
                let mut items = state.user_items.data.clone();
                insert_new(&mut items, UserItem {
                    id: id.clone(),
                    text: text.clone(),
                    day: day.clone(),
                    time_of_day: *time_of_day,
                    deleted: false,
                    updated_at: Some(stamp),
                })?;
                SliceData::UserItems(items)
            }
            Self::EditUserItem { id, text } => {
                let mut items = state.user_items.data.clone();
                let item = find_live(&mut items, id)?;
                item.text = text.clone();
                item.updated_at = Some(stamp);
                SliceData::UserItems(items)
            }
            Self::RemoveUserItem { id } => {
                let mut items = state.user_items.data.clone();
                let item = find_live(&mut items, id)?;
                item.deleted = true;
                item.updated_at = Some(stamp);
                SliceData::UserItems(items)
            }
            Self::SetChecklistItem { key, done } => {
                let mut checklist = state.checklist.data.clone();
                checklist.insert(key.clone(), *done);
                SliceData::Checklist(checklist)
            }
            Self::AddCopyPhrase { id, text, category } => {
                let mut items = state.copy_phrases.data.clone();
                insert_new(&mut items, CopyPhrase {
                    id: id.clone(),
                    text: text.clone(),
                    category: category.clone(),
                    deleted: false,
                    updated_at: Some(stamp),
                })?;
                SliceData::CopyPhrases(items)
            }
            Self::RemoveCopyPhrase { id } => {
                let mut items = state.copy_phrases.data.clone();
                let item = find_live(&mut items, id)?;
                item.deleted = true;
                item.updated_at = Some(stamp);
                SliceData::CopyPhrases(items)
            }
            Self::SetBigText { enabled } => SliceData::Ui(UiPrefs { big_text: *enabled }),
        };
        Ok(data)
    }
}

/// Ids are never reused, tombstoned ones included.
fn insert_new<E: Entity>(items: &mut Vec<E>, entity: E) -> Result<(), CoreError> {
    if items.iter().any(|existing| existing.id() == entity.id()) {
        return Err(CoreError::InvalidOperation(format!(
            "id already in use: {}",
            entity.id()
        )));
    }
    items.push(entity);
    Ok(())
}

fn find_live<'a, E: Entity>(items: &'a mut [E], id: &ItemId) -> Result<&'a mut E, CoreError> {
    items
        .iter_mut()
        .find(|item| item.id() == id && !item.is_deleted())
        .ok_or_else(|| CoreError::InvalidOperation(format!("no live item with id {id}")))
}
