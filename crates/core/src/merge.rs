//! Reconciliation of a local and a remote copy of one slice.
//!
//! Map-shaped slices (pills, checklist, ui) are last-write-wins on the whole
//! slice: concurrent edits to different keys of the same slice do not
//! combine, the newer slice replaces the older one wholesale.
//!
//! List-shaped slices (gear, userItems, copyPhrases) are an id-keyed union.
//! For an id present on both sides the entity with the greater timestamp
//! wins; at equal timestamps a tombstone beats a live entity, otherwise the
//! remote copy wins. All functions here are pure.

use std::collections::{HashMap, HashSet};

use crate::clock::Millis;
use crate::error::CoreError;
use crate::ids::ItemId;
use crate::slices::{Entity, Slice, SliceData};

/// Whole-slice last-write-wins. Equal timestamps resolve to `remote`.
pub fn merge_lww<T: Clone>(local: &Slice<T>, remote: &Slice<T>) -> Slice<T> {
    if local.updated_at > remote.updated_at {
        local.clone()
    } else {
        remote.clone()
    }
}

fn entity_time<E: Entity>(entity: &E, slice_updated_at: Millis) -> Millis {
    entity.updated_at().unwrap_or(slice_updated_at)
}

/// True if `candidate` (from remote) should replace `current` (from local).
fn remote_wins<E: Entity>(current: &E, current_at: Millis, candidate: &E, candidate_at: Millis) -> bool {
    if candidate_at != current_at {
        return candidate_at > current_at;
    }
    // Equal timestamps: a live copy never revives a tombstone.
    !(current.is_deleted() && !candidate.is_deleted())
}

/// Element-level union of two entity lists.
///
/// Output order is remote order followed by local-only entities in local
/// order. The merged slice carries the greater of the two slice timestamps.
pub fn merge_entities<E: Entity>(local: &Slice<Vec<E>>, remote: &Slice<Vec<E>>) -> Slice<Vec<E>> {
    let local_by_id: HashMap<&ItemId, &E> = local.data.iter().map(|e| (e.id(), e)).collect();
    let remote_ids: HashSet<&ItemId> = remote.data.iter().map(|e| e.id()).collect();

    let mut merged = Vec::with_capacity(local.data.len().max(remote.data.len()));
    for theirs in &remote.data {
        let chosen = match local_by_id.get(theirs.id()) {
            Some(ours) => {
                let ours_at = entity_time(*ours, local.updated_at);
                let theirs_at = entity_time(theirs, remote.updated_at);
                if remote_wins(*ours, ours_at, theirs, theirs_at) {
                    theirs.clone()
                } else {
                    (*ours).clone()
                }
            }
            None => theirs.clone(),
        };
        merged.push(chosen);
    }
    merged.extend(
        local
            .data
            .iter()
            .filter(|ours| !remote_ids.contains(ours.id()))
            .cloned(),
    );

    Slice::new(merged, local.updated_at.max(remote.updated_at))
}

/// Result of reconciling one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSlice {
    pub data: SliceData,
    pub updated_at: Millis,
    /// The result differs from the local copy and must be applied locally.
    pub local_changed: bool,
    /// The result differs from the remote copy: local holds something the
    /// remote lacks and must be pushed again.
    pub remote_stale: bool,
}

fn lww_data<T: Clone>(local: &T, local_at: Millis, remote: &T, remote_at: Millis) -> (T, Millis) {
    let merged = merge_lww(
        &Slice::new(local.clone(), local_at),
        &Slice::new(remote.clone(), remote_at),
    );
    (merged.data, merged.updated_at)
}

fn entity_data<E: Entity>(local: &[E], local_at: Millis, remote: &[E], remote_at: Millis) -> (Vec<E>, Millis) {
    let merged = merge_entities(
        &Slice::new(local.to_vec(), local_at),
        &Slice::new(remote.to_vec(), remote_at),
    );
    (merged.data, merged.updated_at)
}

/// Reconcile two copies of the same slice.
pub fn merge_slice(
    local: &SliceData,
    local_at: Millis,
    remote: &SliceData,
    remote_at: Millis,
) -> Result<MergedSlice, CoreError> {
    let (data, updated_at) = match (local, remote) {
        (SliceData::Gear(l), SliceData::Gear(r)) => {
            let (d, at) = entity_data(l, local_at, r, remote_at);
            (SliceData::Gear(d), at)
        }
        (SliceData::UserItems(l), SliceData::UserItems(r)) => {
            let (d, at) = entity_data(l, local_at, r, remote_at);
            (SliceData::UserItems(d), at)
        }
        (SliceData::CopyPhrases(l), SliceData::CopyPhrases(r)) => {
            let (d, at) = entity_data(l, local_at, r, remote_at);
            (SliceData::CopyPhrases(d), at)
        }
        (SliceData::Pills(l), SliceData::Pills(r)) => {
            let (d, at) = lww_data(l, local_at, r, remote_at);
            (SliceData::Pills(d), at)
        }
        (SliceData::Checklist(l), SliceData::Checklist(r)) => {
            let (d, at) = lww_data(l, local_at, r, remote_at);
            (SliceData::Checklist(d), at)
        }
        (SliceData::Ui(l), SliceData::Ui(r)) => {
            let (d, at) = lww_data(l, local_at, r, remote_at);
            (SliceData::Ui(d), at)
        }
        (l, r) => {
            return Err(CoreError::SliceMismatch {
                expected: l.name().as_str(),
                actual: r.name().as_str(),
            });
        }
    };

    Ok(MergedSlice {
        local_changed: data != *local || updated_at != local_at,
        remote_stale: data != *remote || updated_at != remote_at,
        data,
        updated_at,
    })
}
