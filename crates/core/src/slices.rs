use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::error::CoreError;
use crate::ids::ItemId;

/// The independently versioned pieces of trip state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SliceName {
    Gear,
    Pills,
    UserItems,
    Checklist,
    CopyPhrases,
    Ui,
}

impl SliceName {
    pub const ALL: [SliceName; 6] = [
        SliceName::Gear,
        SliceName::Pills,
        SliceName::UserItems,
        SliceName::Checklist,
        SliceName::CopyPhrases,
        SliceName::Ui,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gear => "gear",
            Self::Pills => "pills",
            Self::UserItems => "userItems",
            Self::Checklist => "checklist",
            Self::CopyPhrases => "copyPhrases",
            Self::Ui => "ui",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CoreError::InvalidData(format!("unknown slice: {s}")))
    }

    /// List slices hold id-keyed entities and merge element-wise.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::Gear | Self::UserItems | Self::CopyPhrases)
    }
}

impl fmt::Display for SliceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An element of a list slice. Never physically removed once synced;
/// deletion sets the tombstone.
pub trait Entity: Clone + PartialEq {
    fn id(&self) -> &ItemId;
    fn updated_at(&self) -> Option<Millis>;
    fn is_deleted(&self) -> bool;
}

macro_rules! impl_entity {
    ($ty:ty) => {
        impl Entity for $ty {
            fn id(&self) -> &ItemId {
                &self.id
            }

            fn updated_at(&self) -> Option<Millis> {
                self.updated_at
            }

            fn is_deleted(&self) -> bool {
                self.deleted
            }
        }
    };
}

/// Entities that are not tombstoned.
pub fn live<E: Entity>(items: &[E]) -> impl Iterator<Item = &E> {
    items.iter().filter(|item| !item.is_deleted())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GearItem {
    pub id: ItemId,
    pub label: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Millis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Some(Self::Morning),
            "afternoon" => Some(Self::Afternoon),
            "evening" => Some(Self::Evening),
            "night" => Some(Self::Night),
            _ => None,
        }
    }
}

/// A user-added itinerary entry. Without a `day` it is an undated note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserItem {
    pub id: ItemId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Millis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPhrase {
    pub id: ItemId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Millis>,
}

impl_entity!(GearItem);
impl_entity!(UserItem);
impl_entity!(CopyPhrase);

/// date ("2026-01-20") -> person -> taken.
pub type PillsLog = BTreeMap<String, BTreeMap<String, bool>>;

/// checklist key -> done.
pub type ChecklistState = BTreeMap<String, bool>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPrefs {
    #[serde(default)]
    pub big_text: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slice<T> {
    pub data: T,
    pub updated_at: Millis,
}

impl<T> Slice<T> {
    pub fn new(data: T, updated_at: Millis) -> Self {
        Self { data, updated_at }
    }
}

/// The content of exactly one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceData {
    Gear(Vec<GearItem>),
    Pills(PillsLog),
    UserItems(Vec<UserItem>),
    Checklist(ChecklistState),
    CopyPhrases(Vec<CopyPhrase>),
    Ui(UiPrefs),
}

impl SliceData {
    pub fn name(&self) -> SliceName {
        match self {
            Self::Gear(_) => SliceName::Gear,
            Self::Pills(_) => SliceName::Pills,
            Self::UserItems(_) => SliceName::UserItems,
            Self::Checklist(_) => SliceName::Checklist,
            Self::CopyPhrases(_) => SliceName::CopyPhrases,
            Self::Ui(_) => SliceName::Ui,
        }
    }

    pub fn default_for(name: SliceName) -> Self {
        match name {
            SliceName::Gear => Self::Gear(Vec::new()),
            SliceName::Pills => Self::Pills(PillsLog::new()),
            SliceName::UserItems => Self::UserItems(Vec::new()),
            SliceName::Checklist => Self::Checklist(ChecklistState::new()),
            SliceName::CopyPhrases => Self::CopyPhrases(Vec::new()),
            SliceName::Ui => Self::Ui(UiPrefs::default()),
        }
    }

    /// The slice content in its JSON shape, as stored locally.
    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        let value = match self {
            Self::Gear(items) => serde_json::to_value(items),
            Self::Pills(log) => serde_json::to_value(log),
            Self::UserItems(items) => serde_json::to_value(items),
            Self::Checklist(state) => serde_json::to_value(state),
            Self::CopyPhrases(items) => serde_json::to_value(items),
            Self::Ui(prefs) => serde_json::to_value(prefs),
        };
        value.map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// All slices of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripState {
    pub gear: Slice<Vec<GearItem>>,
    pub pills: Slice<PillsLog>,
    pub user_items: Slice<Vec<UserItem>>,
    pub checklist: Slice<ChecklistState>,
    pub copy_phrases: Slice<Vec<CopyPhrase>>,
    pub ui: Slice<UiPrefs>,
}

impl TripState {
    pub fn updated_at(&self, name: SliceName) -> Millis {
        match name {
            SliceName::Gear => self.gear.updated_at,
            SliceName::Pills => self.pills.updated_at,
            SliceName::UserItems => self.user_items.updated_at,
            SliceName::Checklist => self.checklist.updated_at,
            SliceName::CopyPhrases => self.copy_phrases.updated_at,
            SliceName::Ui => self.ui.updated_at,
        }
    }

    /// Owned copy of one slice's content.
    pub fn data(&self, name: SliceName) -> SliceData {
        match name {
            SliceName::Gear => SliceData::Gear(self.gear.data.clone()),
            SliceName::Pills => SliceData::Pills(self.pills.data.clone()),
            SliceName::UserItems => SliceData::UserItems(self.user_items.data.clone()),
            SliceName::Checklist => SliceData::Checklist(self.checklist.data.clone()),
            SliceName::CopyPhrases => SliceData::CopyPhrases(self.copy_phrases.data.clone()),
            SliceName::Ui => SliceData::Ui(self.ui.data.clone()),
        }
    }

    /// Replace one slice's content and stamp.
    pub fn set(&mut self, data: SliceData, updated_at: Millis) {
        match data {
            SliceData::Gear(items) => self.gear = Slice::new(items, updated_at),
            SliceData::Pills(log) => self.pills = Slice::new(log, updated_at),
            SliceData::UserItems(items) => self.user_items = Slice::new(items, updated_at),
            SliceData::Checklist(state) => self.checklist = Slice::new(state, updated_at),
            SliceData::CopyPhrases(items) => self.copy_phrases = Slice::new(items, updated_at),
            SliceData::Ui(prefs) => self.ui = Slice::new(prefs, updated_at),
        }
    }

    /// Re-stamp a slice without touching its content.
    pub fn touch(&mut self, name: SliceName, updated_at: Millis) {
        match name {
            SliceName::Gear => self.gear.updated_at = updated_at,
            SliceName::Pills => self.pills.updated_at = updated_at,
            SliceName::UserItems => self.user_items.updated_at = updated_at,
            SliceName::Checklist => self.checklist.updated_at = updated_at,
            SliceName::CopyPhrases => self.copy_phrases.updated_at = updated_at,
            SliceName::Ui => self.ui.updated_at = updated_at,
        }
    }

    pub fn max_updated_at(&self) -> Millis {
        SliceName::ALL
            .into_iter()
            .map(|name| self.updated_at(name))
            .max()
            .unwrap_or(0)
    }
}
