//! Persisted form of a slice: msgpack of `{ data, updatedAt }`.

use serde_json::{Value, json};
use tracing::{debug, warn};
use tripsync_core::{
    Millis, SliceData, SliceName, TripState,
    normalize::{self, MissingId},
};

use crate::error::StorageError;
use crate::traits::{LocalStore, slice_key};

pub fn encode_slice(data: &SliceData, updated_at: Millis) -> Result<Vec<u8>, StorageError> {
    let value = json!({
        "data": data.to_json()?,
        "updatedAt": updated_at,
    });
    rmp_serde::to_vec(&value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Decode and normalize one persisted slice. Only an envelope that cannot
/// be read at all is an error; a malformed `data` normalizes to defaults.
pub fn decode_slice(name: SliceName, bytes: &[u8]) -> Result<(SliceData, Millis), StorageError> {
    let value: Value =
        rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let Some(envelope) = value.as_object() else {
        return Err(StorageError::Serialization(format!(
            "{name}: expected an object envelope"
        )));
    };
    let data = envelope.get("data").unwrap_or(&Value::Null);
    let updated_at = normalize::millis(envelope.get("updatedAt")).unwrap_or(0);
    Ok((normalize::slice_data(name, data, MissingId::Backfill), updated_at))
}

/// Load every slice independently. A missing or corrupt slice falls back to
/// its default and never blocks the others.
pub fn load_state<S: LocalStore + ?Sized>(store: &S) -> TripState {
    let mut state = TripState::default();
    for name in SliceName::ALL {
        let bytes = match store.read(&slice_key(name)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(slice = %name, "no persisted copy, using default");
                continue;
            }
            Err(e) => {
                warn!(slice = %name, error = %e, "failed to read slice, using default");
                continue;
            }
        };
        match decode_slice(name, &bytes) {
            Ok((data, updated_at)) => state.set(data, updated_at),
            Err(e) => warn!(slice = %name, error = %e, "corrupt slice, using default"),
        }
    }
    state
}
