use thiserror::Error;
use tripsync_core::{CoreError, SliceName};
use tripsync_storage::StorageError;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("remote mutation of {0} carries no timestamp")]
    MissingTimestamp(SliceName),

    #[error("not connected to a trip")]
    NotConnected,

    #[error("no free trip code after {attempts} attempts")]
    TripCodeExhausted { attempts: u32 },

    #[error("trip code and join token are both required")]
    MissingJoinDetails,
}
