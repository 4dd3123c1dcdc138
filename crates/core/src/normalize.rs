//! Validate-and-normalize raw slice payloads.
//!
//! Payloads come from local persistence or from the shared remote document
//! and are never trusted. Every function here is total: malformed input
//! degrades to the slice default instead of failing.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::clock::{MAX_MILLIS, Millis};
use crate::ids::ItemId;
use crate::slices::*;

/// What to do with a list entity that has no usable `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingId {
    /// Assign a fresh id. Used for locally persisted data.
    Backfill,
    /// Discard the entity. Used for remote payloads.
    Drop,
}

/// Truthiness of a loosely typed flag.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        Some(Value::Null) | None => false,
    }
}

/// Millisecond timestamp from a number or numeric string. Values above
/// [`MAX_MILLIS`] are rejected.
pub fn millis(value: Option<&Value>) -> Option<Millis> {
    let ms = match value? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= MAX_MILLIS as f64)
                .map(|f| f as Millis)
        }),
        Value::String(s) => s.trim().parse::<Millis>().ok(),
        _ => None,
    }?;
    (ms <= MAX_MILLIS).then_some(ms)
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    text(obj, key).filter(|s| !s.trim().is_empty())
}

fn entity_id(obj: &Map<String, Value>, missing: MissingId) -> Option<ItemId> {
    match non_empty_text(obj, "id") {
        Some(id) => Some(ItemId::from(id)),
        None => match missing {
            MissingId::Backfill => Some(ItemId::new()),
            MissingId::Drop => None,
        },
    }
}

/// Walk an entity array, keeping objects with a usable id. First occurrence
/// of a duplicated id wins.
fn entities<E, F>(value: &Value, missing: MissingId, build: F) -> Vec<E>
where
    E: Entity,
    F: Fn(ItemId, &Map<String, Value>) -> E,
{
    let Some(array) = value.as_array() else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(array.len());
    for element in array {
        let Some(obj) = element.as_object() else {
            continue;
        };
        let Some(id) = entity_id(obj, missing) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        out.push(build(id, obj));
    }
    out
}

pub fn gear_items(value: &Value, missing: MissingId) -> Vec<GearItem> {
    entities(value, missing, |id, obj| GearItem {
        id,
        label: text(obj, "label").unwrap_or_default(),
        checked: truthy(obj.get("checked")),
        deleted: truthy(obj.get("deleted")),
        updated_at: millis(obj.get("updatedAt")),
    })
}

pub fn user_items(value: &Value, missing: MissingId) -> Vec<UserItem> {
    entities(value, missing, |id, obj| UserItem {
        id,
        text: text(obj, "text").unwrap_or_default(),
        day: non_empty_text(obj, "day"),
        time_of_day: obj
            .get("timeOfDay")
            .and_then(Value::as_str)
            .and_then(TimeOfDay::parse),
        deleted: truthy(obj.get("deleted")),
        updated_at: millis(obj.get("updatedAt")),
    })
}

pub fn copy_phrases(value: &Value, missing: MissingId) -> Vec<CopyPhrase> {
    entities(value, missing, |id, obj| CopyPhrase {
        id,
        text: text(obj, "text").unwrap_or_default(),
        category: non_empty_text(obj, "category"),
        deleted: truthy(obj.get("deleted")),
        updated_at: millis(obj.get("updatedAt")),
    })
}

pub fn pills(value: &Value) -> PillsLog {
    let Some(days) = value.as_object() else {
        return PillsLog::new();
    };
    days.iter()
        .filter_map(|(date, people)| {
            let people = people.as_object()?;
            let taken = people
                .iter()
                .map(|(person, flag)| (person.clone(), truthy(Some(flag))))
                .collect();
            Some((date.clone(), taken))
        })
        .collect()
}

pub fn checklist(value: &Value) -> ChecklistState {
    let Some(entries) = value.as_object() else {
        return ChecklistState::new();
    };
    entries
        .iter()
        .map(|(key, done)| (key.clone(), truthy(Some(done))))
        .collect()
}

pub fn ui(value: &Value) -> UiPrefs {
    UiPrefs {
        big_text: value
            .as_object()
            .is_some_and(|obj| truthy(obj.get("bigText"))),
    }
}

/// Normalize the JSON content of one slice.
pub fn slice_data(name: SliceName, value: &Value, missing: MissingId) -> SliceData {
    match name {
        SliceName::Gear => SliceData::Gear(gear_items(value, missing)),
        SliceName::Pills => SliceData::Pills(pills(value)),
        SliceName::UserItems => SliceData::UserItems(user_items(value, missing)),
        SliceName::Checklist => SliceData::Checklist(checklist(value)),
        SliceName::CopyPhrases => SliceData::CopyPhrases(copy_phrases(value, missing)),
        SliceName::Ui => SliceData::Ui(ui(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drop_mode_discards_entities_without_id() {
        let raw = json!([
            {"id": "g1", "label": "Gloves"},
            {"label": "no id"},
            {"id": "", "label": "blank id"},
            "not an object",
        ]);
        let items = gear_items(&raw, MissingId::Drop);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_str(), "g1");
    }

    #[test]
    fn backfill_mode_assigns_fresh_ids() {
        let raw = json!([{"label": "Boots"}, {"label": "Hat"}]);
        let items = gear_items(&raw, MissingId::Backfill);
        assert_eq!(items.len(), 2);
        assert_ne!(items[0].id, items[1].id);
        assert_eq!(items[1].label, "Hat");
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let raw = json!([
            {"id": "p1", "text": "first"},
            {"id": "p1", "text": "second"},
        ]);
        let phrases = copy_phrases(&raw, MissingId::Drop);
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].text, "first");
    }

    #[test]
    fn lenient_flags_and_timestamps() {
        let raw = json!([{
            "id": "u1",
            "text": "Husky ride",
            "day": "2026-01-21",
            "timeOfDay": "Evening",
            "deleted": 1,
            "updatedAt": "1700",
        }]);
        let items = user_items(&raw, MissingId::Drop);
        assert_eq!(items[0].day.as_deref(), Some("2026-01-21"));
        assert_eq!(items[0].time_of_day, Some(TimeOfDay::Evening));
        assert!(items[0].deleted);
        assert_eq!(items[0].updated_at, Some(1700));
    }

    #[test]
    fn unknown_time_of_day_becomes_none() {
        let raw = json!([{"id": "u1", "text": "x", "timeOfDay": "brunch", "day": ""}]);
        let items = user_items(&raw, MissingId::Drop);
        assert_eq!(items[0].time_of_day, None);
        assert_eq!(items[0].day, None);
    }

    #[test]
    fn wrong_top_level_shapes_fall_back_to_defaults() {
        assert!(gear_items(&json!({"items": []}), MissingId::Backfill).is_empty());
        assert!(pills(&json!([1, 2, 3])).is_empty());
        assert!(checklist(&json!("done")).is_empty());
        assert_eq!(ui(&json!(null)), UiPrefs::default());
    }

    #[test]
    fn pills_skip_malformed_days() {
        let raw = json!({
            "2026-01-20": {"daniel": true, "jaime": 0},
            "2026-01-21": "garbage",
        });
        let log = pills(&raw);
        assert_eq!(log.len(), 1);
        assert_eq!(log["2026-01-20"]["daniel"], true);
        assert_eq!(log["2026-01-20"]["jaime"], false);
    }

    #[test]
    fn negative_or_non_numeric_timestamps_are_ignored() {
        assert_eq!(millis(Some(&json!(-5))), None);
        assert_eq!(millis(Some(&json!("soon"))), None);
        assert_eq!(millis(Some(&json!(12.9))), Some(12));
        assert_eq!(millis(None), None);
    }

    #[test]
    fn out_of_range_timestamps_are_ignored() {
        assert_eq!(millis(Some(&json!(1e30))), None);
        assert_eq!(millis(Some(&json!(u64::MAX))), None);
        assert_eq!(millis(Some(&json!("18446744073709551615"))), None);
        assert_eq!(millis(Some(&json!(MAX_MILLIS))), Some(MAX_MILLIS));
    }
}
