//! Wire shape of the shared per-trip state document.
//!
//! One top-level field per slice, each carrying its own `updatedAt`, plus a
//! document-level `updatedAt`:
//!
//! ```text
//! gear        { items: [...],                 updatedAt }
//! pills       { entries: {date: {who: bool}}, updatedAt }
//! userItems   { notes: [...], days: {date: [...]}, updatedAt }
//! checklist   { state: {key: bool},           updatedAt }
//! copyPhrases { items: [...],                 updatedAt }
//! ui          { bigText: bool,                updatedAt }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::clock::Millis;
use crate::error::CoreError;
use crate::normalize::{self, MissingId};
use crate::slices::*;

const UPDATED_AT: &str = "updatedAt";

/// One slice as read back from a remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSlice {
    pub data: SliceData,
    pub updated_at: Millis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripDocument {
    fields: Map<String, Value>,
}

impl TripDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Build a partial document holding only `slices`, stamped at `now`.
    pub fn from_state(
        state: &TripState,
        slices: impl IntoIterator<Item = SliceName>,
        now: Millis,
    ) -> Result<Self, CoreError> {
        let mut doc = Self::new();
        for name in slices {
            let payload = encode_slice(&state.data(name), state.updated_at(name))?;
            doc.fields.insert(name.as_str().to_string(), payload);
        }
        doc.fields.insert(UPDATED_AT.to_string(), json!(now));
        Ok(doc)
    }

    /// Slices carried by this document.
    pub fn slice_names(&self) -> BTreeSet<SliceName> {
        SliceName::ALL
            .into_iter()
            .filter(|name| self.fields.contains_key(name.as_str()))
            .collect()
    }

    /// True if the document carries no slice at all.
    pub fn is_empty(&self) -> bool {
        self.slice_names().is_empty()
    }

    pub fn updated_at(&self) -> Option<Millis> {
        normalize::millis(self.fields.get(UPDATED_AT))
    }

    /// Apply a partial write: top-level fields present in `update` replace
    /// ours, everything else is kept.
    pub fn merge_from(&mut self, update: &TripDocument) {
        for (key, value) in &update.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Normalize one slice. A slice without its own `updatedAt` inherits
    /// the document-level one.
    pub fn decode_slice(&self, name: SliceName) -> Option<RemoteSlice> {
        let raw = self.fields.get(name.as_str())?;
        let updated_at = normalize::millis(raw.get(UPDATED_AT))
            .or_else(|| self.updated_at())
            .unwrap_or(0);
        let empty = Value::Null;
        let field = |key: &str| raw.get(key).unwrap_or(&empty);
        let data = match name {
            SliceName::Gear => SliceData::Gear(normalize::gear_items(field("items"), MissingId::Drop)),
            SliceName::Pills => SliceData::Pills(normalize::pills(field("entries"))),
            SliceName::UserItems => SliceData::UserItems(flatten_user_items(raw)),
            SliceName::Checklist => SliceData::Checklist(normalize::checklist(field("state"))),
            SliceName::CopyPhrases => {
                SliceData::CopyPhrases(normalize::copy_phrases(field("items"), MissingId::Drop))
            }
            SliceName::Ui => SliceData::Ui(normalize::ui(raw)),
        };
        Some(RemoteSlice { data, updated_at })
    }

    /// Normalize every slice present.
    pub fn decode(&self) -> Vec<RemoteSlice> {
        SliceName::ALL
            .into_iter()
            .filter_map(|name| self.decode_slice(name))
            .collect()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Encode one slice in its document shape.
pub fn encode_slice(data: &SliceData, updated_at: Millis) -> Result<Value, CoreError> {
    let mut obj = match data {
        SliceData::Gear(items) => json!({ "items": to_json(items)? }),
        SliceData::Pills(log) => json!({ "entries": to_json(log)? }),
        SliceData::UserItems(items) => split_user_items(items)?,
        SliceData::Checklist(state) => json!({ "state": to_json(state)? }),
        SliceData::CopyPhrases(items) => json!({ "items": to_json(items)? }),
        SliceData::Ui(prefs) => json!({ "bigText": prefs.big_text }),
    };
    if let Value::Object(map) = &mut obj {
        map.insert(UPDATED_AT.to_string(), json!(updated_at));
    }
    Ok(obj)
}

/// Undated notes go to `notes`, dated items are grouped under `days`.
fn split_user_items(items: &[UserItem]) -> Result<Value, CoreError> {
    let mut notes = Vec::new();
    let mut days: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for item in items {
        let mut payload = to_json(item)?;
        if let Value::Object(map) = &mut payload {
            map.remove("day");
        }
        match &item.day {
            Some(day) => days.entry(day.clone()).or_default().push(payload),
            None => notes.push(payload),
        }
    }
    Ok(json!({ "notes": notes, "days": days }))
}

fn flatten_user_items(raw: &Value) -> Vec<UserItem> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    let notes = raw.get("notes").unwrap_or(&Value::Null);
    for mut item in normalize::user_items(notes, MissingId::Drop) {
        item.day = None;
        if seen.insert(item.id.clone()) {
            out.push(item);
        }
    }

    if let Some(days) = raw.get("days").and_then(Value::as_object) {
        for (day, entries) in days {
            for mut item in normalize::user_items(entries, MissingId::Drop) {
                item.day = Some(day.clone());
                if seen.insert(item.id.clone()) {
                    out.push(item);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ItemId;

    fn user_item(id: &str, day: Option<&str>) -> UserItem {
        UserItem {
            id: ItemId::from(id),
            text: format!("item {id}"),
            day: day.map(str::to_string),
            time_of_day: Some(TimeOfDay::Night),
            deleted: false,
            updated_at: Some(10),
        }
    }

    #[test]
    fn user_items_split_and_flatten() {
        let mut state = TripState::default();
        let items = vec![
            user_item("n1", None),
            user_item("d1", Some("2026-01-20")),
            user_item("d2", Some("2026-01-21")),
        ];
        state.set(SliceData::UserItems(items), 500);

        let doc = TripDocument::from_state(&state, [SliceName::UserItems], 600).unwrap();
        let raw = &doc.fields()["userItems"];
        assert_eq!(raw["notes"].as_array().unwrap().len(), 1);
        assert!(raw["notes"][0].get("day").is_none());
        assert_eq!(raw["days"]["2026-01-20"][0]["id"], "d1");

        let decoded = doc.decode_slice(SliceName::UserItems).unwrap();
        assert_eq!(decoded.updated_at, 500);
        let SliceData::UserItems(flat) = decoded.data else {
            panic!("expected user items");
        };
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].day, None);
        assert_eq!(flat[1].day.as_deref(), Some("2026-01-20"));
        assert_eq!(flat[2].time_of_day, Some(TimeOfDay::Night));
    }

    #[test]
    fn from_state_only_includes_requested_slices() {
        let state = TripState::default();
        let doc = TripDocument::from_state(&state, [SliceName::Gear, SliceName::Ui], 7).unwrap();
        let names: Vec<SliceName> = doc.slice_names().into_iter().collect();
        assert_eq!(names, vec![SliceName::Gear, SliceName::Ui]);
        assert_eq!(doc.updated_at(), Some(7));
    }

    #[test]
    fn merge_from_replaces_only_written_fields() {
        let mut state = TripState::default();
        state.set(SliceData::Ui(UiPrefs { big_text: true }), 100);
        let mut doc = TripDocument::from_state(&state, SliceName::ALL, 100).unwrap();

        state.set(SliceData::Checklist([("passport".to_string(), true)].into()), 200);
        let update = TripDocument::from_state(&state, [SliceName::Checklist], 200).unwrap();
        doc.merge_from(&update);

        assert_eq!(doc.updated_at(), Some(200));
        assert_eq!(doc.decode_slice(SliceName::Ui).unwrap().updated_at, 100);
        assert_eq!(doc.decode_slice(SliceName::Checklist).unwrap().updated_at, 200);
    }

    #[test]
    fn slice_without_timestamp_inherits_document_timestamp() {
        let doc = TripDocument::from_fields(
            json!({
                "updatedAt": 900,
                "ui": {"bigText": true},
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let ui = doc.decode_slice(SliceName::Ui).unwrap();
        assert_eq!(ui.updated_at, 900);
        assert_eq!(ui.data, SliceData::Ui(UiPrefs { big_text: true }));
    }

    #[test]
    fn malformed_slice_decodes_to_default() {
        let doc = TripDocument::from_fields(
            json!({ "gear": {"items": "nope", "updatedAt": 5} })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let gear = doc.decode_slice(SliceName::Gear).unwrap();
        assert_eq!(gear.data, SliceData::Gear(Vec::new()));
        assert_eq!(gear.updated_at, 5);
        assert!(doc.decode_slice(SliceName::Pills).is_none());
    }
}
