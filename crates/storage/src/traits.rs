use tripsync_core::SliceName;

use crate::error::StorageError;

pub const SETTINGS_KEY: &str = "sync/settings";
pub const DEVICE_KEY: &str = "sync/device-key";

/// Stable storage key of a slice.
pub fn slice_key(name: SliceName) -> String {
    format!("slice/{}", name.as_str())
}

/// Durable per-device key-value persistence.
pub trait LocalStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

impl<T: LocalStore + ?Sized> LocalStore for Box<T> {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read(key)
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(key, bytes)
    }
}
