//! Contract of the shared document store.
//!
//! The backend keeps, per trip, a header record, a member list keyed by
//! device and one state document in the [`TripDocument`] shape. Writes are
//! partial: top-level fields present in an update replace the stored ones,
//! all other fields are kept. Only members may read, write or listen.

use thiserror::Error;
use tripsync_core::identity::{MembershipRequest, TripRecord};
use tripsync_core::{DeviceId, TripCode, TripDocument};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable")]
    Offline,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl RemoteError {
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

pub trait RemoteStore {
    fn trip_exists(&mut self, trip: &TripCode) -> Result<bool, RemoteError>;

    /// Write the header record and the founder's membership together.
    /// Fails with `AlreadyExists` if the code is taken.
    fn create_trip(
        &mut self,
        trip: &TripCode,
        record: &TripRecord,
        founder: &MembershipRequest,
    ) -> Result<(), RemoteError>;

    /// Add the requesting device to the member list. The backend checks the
    /// signature and the join token against the stored hash.
    fn join_trip(&mut self, request: &MembershipRequest) -> Result<(), RemoteError>;

    fn is_member(&mut self, trip: &TripCode, device: &DeviceId) -> Result<bool, RemoteError>;

    /// One-shot read of the state document; `None` if nothing was written yet.
    fn fetch_state(
        &mut self,
        trip: &TripCode,
        device: &DeviceId,
    ) -> Result<Option<TripDocument>, RemoteError>;

    /// Partial write of the state document.
    fn merge_state(
        &mut self,
        trip: &TripCode,
        device: &DeviceId,
        update: &TripDocument,
    ) -> Result<(), RemoteError>;

    /// Start listening for snapshots of the state document.
    fn subscribe(&mut self, trip: &TripCode, device: &DeviceId) -> Result<SubscriptionId, RemoteError>;

    fn unsubscribe(&mut self, subscription: SubscriptionId);

    /// Snapshots delivered since the last drain, oldest first.
    fn drain_changes(&mut self, subscription: SubscriptionId) -> Result<Vec<TripDocument>, RemoteError>;
}
