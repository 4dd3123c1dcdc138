use std::collections::BTreeMap;

use tripsync_core::merge::{merge_entities, merge_lww, merge_slice};
use tripsync_core::{ChecklistState, GearItem, ItemId, Millis, Slice, SliceData, UiPrefs};

fn item(id: &str, label: &str, at: Millis, deleted: bool) -> GearItem {
    GearItem {
        id: ItemId::from(id),
        label: label.into(),
        checked: false,
        deleted,
        updated_at: Some(at),
    }
}

fn by_id(items: &[GearItem]) -> BTreeMap<String, GearItem> {
    items
        .iter()
        .map(|g| (g.id.as_str().to_string(), g.clone()))
        .collect()
}

fn fixtures() -> Vec<Slice<Vec<GearItem>>> {
    vec![
        Slice::new(Vec::new(), 0),
        Slice::new(vec![item("a", "Gloves", 10, false), item("b", "Boots", 11, false)], 11),
        Slice::new(vec![item("b", "Boots v2", 20, false), item("c", "Crampons", 21, false)], 21),
        Slice::new(vec![item("a", "Gloves", 30, true)], 30),
        Slice::new(vec![item("c", "Crampons", 5, false), item("d", "Down jacket", 6, false)], 6),
    ]
}

#[test]
fn list_merge_is_commutative_as_a_set() {
    let fixtures = fixtures();
    for left in &fixtures {
        for right in &fixtures {
            let lr = merge_entities(left, right);
            let rl = merge_entities(right, left);
            assert_eq!(by_id(&lr.data), by_id(&rl.data));
            assert_eq!(lr.updated_at, rl.updated_at);
        }
    }
}

#[test]
fn list_merge_is_idempotent() {
    for slice in fixtures() {
        let merged = merge_entities(&slice, &slice);
        assert_eq!(merged, slice);
    }
}

#[test]
fn merging_a_result_with_either_input_again_changes_nothing() {
    let fixtures = fixtures();
    for a in &fixtures {
        for b in &fixtures {
            let merged = merge_entities(a, b);
            for input in [a, b] {
                let again = merge_entities(&merged, input);
                assert_eq!(by_id(&again.data), by_id(&merged.data));
                assert_eq!(again.updated_at, merged.updated_at);
                let again = merge_entities(input, &merged);
                assert_eq!(by_id(&again.data), by_id(&merged.data));
            }
        }
    }
}

#[test]
fn list_merge_is_associative_as_a_set() {
    let fixtures = fixtures();
    for a in &fixtures {
        for b in &fixtures {
            for c in &fixtures {
                let left = merge_entities(&merge_entities(a, b), c);
                let right = merge_entities(a, &merge_entities(b, c));
                assert_eq!(by_id(&left.data), by_id(&right.data));
            }
        }
    }
}

#[test]
fn exchange_in_both_directions_converges() -> Result<(), Box<dyn std::error::Error>> {
    let local = SliceData::Gear(vec![item("g1", "Gloves", 100, false)]);
    let remote = SliceData::Gear(vec![item("g2", "Goggles", 150, false)]);

    // Device A receives B's copy, then B receives A's merged result.
    let at_a = merge_slice(&local, 100, &remote, 150)?;
    assert!(at_a.local_changed);
    assert!(at_a.remote_stale);

    let at_b = merge_slice(&remote, 150, &at_a.data, at_a.updated_at)?;
    assert!(!at_b.remote_stale);

    let SliceData::Gear(a_items) = &at_a.data else {
        panic!("expected gear");
    };
    let SliceData::Gear(b_items) = &at_b.data else {
        panic!("expected gear");
    };
    assert_eq!(by_id(a_items), by_id(b_items));
    assert_eq!(a_items.len(), 2);
    assert_eq!(at_b.updated_at, 150);
    Ok(())
}

#[test]
fn newer_tombstone_beats_older_edit_and_older_tombstone_loses() {
    let edited = Slice::new(vec![item("g1", "Gloves (wool)", 200, false)], 200);
    let removed_later = Slice::new(vec![item("g1", "Gloves", 300, true)], 300);
    let removed_earlier = Slice::new(vec![item("g1", "Gloves", 100, true)], 100);

    assert!(merge_entities(&edited, &removed_later).data[0].deleted);
    assert!(!merge_entities(&edited, &removed_earlier).data[0].deleted);
    assert!(!merge_entities(&removed_earlier, &edited).data[0].deleted);
}

#[test]
fn map_slice_edits_to_different_keys_do_not_combine() -> Result<(), Box<dyn std::error::Error>> {
    let day = |person: &str| {
        SliceData::Pills(BTreeMap::from([(
            "2026-01-20".to_string(),
            BTreeMap::from([(person.to_string(), true)]),
        )]))
    };
    let merged = merge_slice(&day("jaime"), 180, &day("daniel"), 200)?;
    assert_eq!(merged.data, day("daniel"));
    assert_eq!(merged.updated_at, 200);
    Ok(())
}

fn checklist(entries: &[(&str, bool)]) -> ChecklistState {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn map_merge_is_commutative_unless_timestamps_tie() -> Result<(), Box<dyn std::error::Error>> {
    let fixtures = vec![
        Slice::new(ChecklistState::new(), 0),
        Slice::new(checklist(&[("passport", true)]), 100),
        Slice::new(checklist(&[("passport", false), ("charger", true)]), 250),
        Slice::new(checklist(&[("charger", true)]), 400),
    ];
    for left in &fixtures {
        for right in &fixtures {
            if left.updated_at == right.updated_at {
                continue;
            }
            assert_eq!(merge_lww(left, right), merge_lww(right, left));

            let lr = merge_slice(
                &SliceData::Checklist(left.data.clone()),
                left.updated_at,
                &SliceData::Checklist(right.data.clone()),
                right.updated_at,
            )?;
            let rl = merge_slice(
                &SliceData::Checklist(right.data.clone()),
                right.updated_at,
                &SliceData::Checklist(left.data.clone()),
                left.updated_at,
            )?;
            assert_eq!(lr.data, rl.data);
            assert_eq!(lr.updated_at, rl.updated_at);
        }
    }

    let small = SliceData::Ui(UiPrefs { big_text: false });
    let big = SliceData::Ui(UiPrefs { big_text: true });
    assert_eq!(merge_slice(&small, 10, &big, 20)?.data, merge_slice(&big, 20, &small, 10)?.data);
    Ok(())
}
