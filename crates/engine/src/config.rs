use serde::{Deserialize, Serialize};
use tracing::warn;
use tripsync_core::{JoinToken, Millis, TripCode, DEFAULT_JOIN_TOKEN_LEN, DEFAULT_TRIP_CODE_LEN};
use tripsync_storage::{LocalStore, SETTINGS_KEY};

use crate::container::StateContainer;

/// Tunables of a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last local edit before a push.
    pub debounce_ms: Millis,
    pub trip_code_len: usize,
    pub join_token_len: usize,
    /// Trip-code generation attempts before creation gives up.
    pub max_code_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 800,
            trip_code_len: DEFAULT_TRIP_CODE_LEN,
            join_token_len: DEFAULT_JOIN_TOKEN_LEN,
            max_code_attempts: 5,
        }
    }
}

/// Persisted sync preferences of this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub enabled: bool,
    pub trip_code: Option<TripCode>,
    pub join_token: Option<JoinToken>,
}

impl SyncSettings {
    /// Missing or unreadable settings read as sync disabled.
    pub fn load<S: LocalStore>(container: &StateContainer<S>) -> Self {
        let Some(bytes) = container.read_raw(SETTINGS_KEY) else {
            return Self::default();
        };
        match rmp_serde::from_slice(&bytes) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "unreadable sync settings, treating sync as disabled");
                Self::default()
            }
        }
    }

    pub fn save<S: LocalStore>(&self, container: &mut StateContainer<S>) -> bool {
        match rmp_serde::to_vec_named(self) {
            Ok(bytes) => container.write_raw(SETTINGS_KEY, &bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode sync settings");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsync_core::ManualClock;
    use tripsync_storage::SqliteStore;

    #[derive(Serialize)]
    struct PartialConfig {
        debounce_ms: Millis,
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let bytes = rmp_serde::to_vec_named(&PartialConfig { debounce_ms: 250 }).unwrap();
        let config: SyncConfig = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.trip_code_len, 8);
        assert_eq!(config.join_token_len, 6);
        assert_eq!(config.max_code_attempts, 5);
    }

    #[test]
    fn settings_round_trip_through_store() -> Result<(), Box<dyn std::error::Error>> {
        let mut container =
            StateContainer::open(SqliteStore::open_in_memory()?, Box::new(ManualClock::new(1)));
        assert_eq!(SyncSettings::load(&container), SyncSettings::default());

        let settings = SyncSettings {
            enabled: true,
            trip_code: Some(TripCode::parse("abcd 2345")?),
            join_token: Some(JoinToken::parse("XY7Q9K")?),
        };
        assert!(settings.save(&mut container));
        assert_eq!(SyncSettings::load(&container), settings);
        Ok(())
    }

    #[test]
    fn garbage_settings_read_as_disabled() -> Result<(), Box<dyn std::error::Error>> {
        let mut container =
            StateContainer::open(SqliteStore::open_in_memory()?, Box::new(ManualClock::new(1)));
        assert!(container.write_raw(SETTINGS_KEY, b"\xc1\xc1"));
        assert!(!SyncSettings::load(&container).enabled);
        Ok(())
    }
}
