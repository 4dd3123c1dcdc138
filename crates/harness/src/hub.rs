//! In-memory shared document store with the access rules of the real
//! backend: creation and joins are signature-checked against the stored
//! join-token hash, and only members may read, write or listen.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tripsync_core::identity::{MembershipRequest, TripRecord};
use tripsync_core::{DeviceId, SliceName, TripCode, TripDocument};
use tripsync_engine::{RemoteError, RemoteStore, SubscriptionId};

/// One accepted partial write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub trip: TripCode,
    pub device: DeviceId,
    pub slices: BTreeSet<SliceName>,
}

struct HubTrip {
    record: TripRecord,
    members: BTreeSet<DeviceId>,
    state: Option<TripDocument>,
}

struct Subscriber {
    trip: TripCode,
    queue: Vec<TripDocument>,
}

#[derive(Default)]
pub struct RemoteHub {
    trips: BTreeMap<TripCode, HubTrip>,
    subscribers: BTreeMap<u64, Subscriber>,
    next_subscription: u64,
    pushes: Vec<PushRecord>,
    code_checks: usize,
    every_code_taken: bool,
    fail_pushes: bool,
    fail_listens: bool,
}

impl RemoteHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Make every trip-code availability check report a collision.
    pub fn set_every_code_taken(&mut self, taken: bool) {
        self.every_code_taken = taken;
    }

    /// Make every state write fail with a backend error.
    pub fn set_fail_pushes(&mut self, fail: bool) {
        self.fail_pushes = fail;
    }

    /// Make every change delivery fail with a backend error.
    pub fn set_fail_listens(&mut self, fail: bool) {
        self.fail_listens = fail;
    }

    pub fn code_checks(&self) -> usize {
        self.code_checks
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    pub fn pushes(&self) -> &[PushRecord] {
        &self.pushes
    }

    pub fn pushes_by(&self, device: DeviceId) -> usize {
        self.pushes.iter().filter(|p| p.device == device).count()
    }

    pub fn document(&self, trip: &TripCode) -> Option<TripDocument> {
        self.trips.get(trip).and_then(|t| t.state.clone())
    }

    pub fn members(&self, trip: &TripCode) -> BTreeSet<DeviceId> {
        self.trips
            .get(trip)
            .map(|t| t.members.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn trip(&self, code: &TripCode) -> Result<&HubTrip, RemoteError> {
        self.trips
            .get(code)
            .ok_or_else(|| RemoteError::NotFound(format!("trip {code}")))
    }

    fn require_member(&self, code: &TripCode, device: &DeviceId) -> Result<&HubTrip, RemoteError> {
        let trip = self.trip(code)?;
        if !trip.members.contains(device) {
            return Err(RemoteError::PermissionDenied(format!("{device} is not a member of {code}")));
        }
        Ok(trip)
    }

    fn check_request(record: &TripRecord, request: &MembershipRequest) -> Result<(), RemoteError> {
        request
            .verify()
            .map_err(|e| RemoteError::PermissionDenied(e.to_string()))?;
        if !record.token_matches(&request.join_token) {
            return Err(RemoteError::PermissionDenied("join token mismatch".into()));
        }
        Ok(())
    }
}

/// One device's connection to a [`RemoteHub`]. Clones share the
/// connectivity flag.
#[derive(Clone)]
pub struct HubHandle {
    hub: Rc<RefCell<RemoteHub>>,
    online: Rc<Cell<bool>>,
}

impl HubHandle {
    pub fn new(hub: Rc<RefCell<RemoteHub>>) -> Self {
        Self {
            hub,
            online: Rc::new(Cell::new(true)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.set(online);
    }

    pub fn is_online(&self) -> bool {
        self.online.get()
    }

    fn reachable(&self) -> Result<(), RemoteError> {
        if self.online.get() {
            Ok(())
        } else {
            Err(RemoteError::Offline)
        }
    }
}

impl RemoteStore for HubHandle {
    fn trip_exists(&mut self, trip: &TripCode) -> Result<bool, RemoteError> {
        self.reachable()?;
        let mut hub = self.hub.borrow_mut();
        hub.code_checks += 1;
        Ok(hub.every_code_taken || hub.trips.contains_key(trip))
    }

    fn create_trip(
        &mut self,
        trip: &TripCode,
        record: &TripRecord,
        founder: &MembershipRequest,
    ) -> Result<(), RemoteError> {
        self.reachable()?;
        let mut hub = self.hub.borrow_mut();
        if hub.trips.contains_key(trip) {
            return Err(RemoteError::AlreadyExists(format!("trip {trip}")));
        }
        if founder.trip_code != *trip || founder.device_id != record.created_by {
            return Err(RemoteError::PermissionDenied("founder does not match record".into()));
        }
        RemoteHub::check_request(record, founder)?;
        hub.trips.insert(
            trip.clone(),
            HubTrip {
                record: record.clone(),
                members: BTreeSet::from([founder.device_id]),
                state: None,
            },
        );
        Ok(())
    }

    fn join_trip(&mut self, request: &MembershipRequest) -> Result<(), RemoteError> {
        self.reachable()?;
        let mut hub = self.hub.borrow_mut();
        let record = hub.trip(&request.trip_code)?.record.clone();
        RemoteHub::check_request(&record, request)?;
        if let Some(trip) = hub.trips.get_mut(&request.trip_code) {
            trip.members.insert(request.device_id);
        }
        Ok(())
    }

    fn is_member(&mut self, trip: &TripCode, device: &DeviceId) -> Result<bool, RemoteError> {
        self.reachable()?;
        let hub = self.hub.borrow();
        Ok(hub.trip(trip)?.members.contains(device))
    }

    fn fetch_state(
        &mut self,
        trip: &TripCode,
        device: &DeviceId,
    ) -> Result<Option<TripDocument>, RemoteError> {
        self.reachable()?;
        let hub = self.hub.borrow();
        Ok(hub.require_member(trip, device)?.state.clone())
    }

    fn merge_state(
        &mut self,
        trip: &TripCode,
        device: &DeviceId,
        update: &TripDocument,
    ) -> Result<(), RemoteError> {
        self.reachable()?;
        let mut hub = self.hub.borrow_mut();
        hub.require_member(trip, device)?;
        if hub.fail_pushes {
            return Err(RemoteError::Backend("write rejected".into()));
        }

        let snapshot = {
            let Some(entry) = hub.trips.get_mut(trip) else {
                return Err(RemoteError::NotFound(format!("trip {trip}")));
            };
            let doc = entry.state.get_or_insert_with(TripDocument::new);
            doc.merge_from(update);
            doc.clone()
        };
        hub.pushes.push(PushRecord {
            trip: trip.clone(),
            device: *device,
            slices: update.slice_names(),
        });
        for subscriber in hub.subscribers.values_mut() {
            if subscriber.trip == *trip {
                subscriber.queue.push(snapshot.clone());
            }
        }
        Ok(())
    }

    fn subscribe(&mut self, trip: &TripCode, device: &DeviceId) -> Result<SubscriptionId, RemoteError> {
        self.reachable()?;
        let mut hub = self.hub.borrow_mut();
        let initial = hub.require_member(trip, device)?.state.clone();
        let id = hub.next_subscription;
        hub.next_subscription += 1;
        hub.subscribers.insert(
            id,
            Subscriber {
                trip: trip.clone(),
                queue: initial.into_iter().collect(),
            },
        );
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) {
        self.hub.borrow_mut().subscribers.remove(&subscription.0);
    }

    fn drain_changes(&mut self, subscription: SubscriptionId) -> Result<Vec<TripDocument>, RemoteError> {
        self.reachable()?;
        let mut hub = self.hub.borrow_mut();
        if hub.fail_listens {
            return Err(RemoteError::Backend("listener dropped".into()));
        }
        let subscriber = hub
            .subscribers
            .get_mut(&subscription.0)
            .ok_or_else(|| RemoteError::NotFound(format!("subscription {}", subscription.0)))?;
        Ok(std::mem::take(&mut subscriber.queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsync_core::JoinToken;
    use tripsync_core::identity::DeviceIdentity;

    fn founded(hub: &Rc<RefCell<RemoteHub>>) -> (HubHandle, TripCode, JoinToken, DeviceIdentity) {
        let founder = DeviceIdentity::generate();
        let trip = TripCode::generate();
        let token = JoinToken::generate();
        let record = TripRecord::new(&token, founder.device_id(), 1);
        let request = MembershipRequest::new_signed(&founder, trip.clone(), token.clone());
        let mut handle = HubHandle::new(Rc::clone(hub));
        handle.create_trip(&trip, &record, &request).unwrap();
        (handle, trip, token, founder)
    }

    #[test]
    fn non_members_cannot_read_or_write() {
        let hub = RemoteHub::shared();
        let (mut handle, trip, _, _) = founded(&hub);
        let stranger = DeviceIdentity::generate().device_id();

        assert!(matches!(
            handle.fetch_state(&trip, &stranger),
            Err(RemoteError::PermissionDenied(_))
        ));
        assert!(matches!(
            handle.merge_state(&trip, &stranger, &TripDocument::new()),
            Err(RemoteError::PermissionDenied(_))
        ));
        assert!(!handle.is_member(&trip, &stranger).unwrap());
    }

    #[test]
    fn join_with_right_token_adds_member() {
        let hub = RemoteHub::shared();
        let (mut handle, trip, token, founder) = founded(&hub);
        let joiner = DeviceIdentity::generate();
        handle
            .join_trip(&MembershipRequest::new_signed(&joiner, trip.clone(), token))
            .unwrap();
        let members = hub.borrow().members(&trip);
        assert!(members.contains(&founder.device_id()));
        assert!(members.contains(&joiner.device_id()));
    }

    #[test]
    fn join_with_wrong_token_is_denied() {
        let hub = RemoteHub::shared();
        let (mut handle, trip, _, _) = founded(&hub);
        let joiner = DeviceIdentity::generate();
        let wrong = JoinToken::parse("WRONG1").unwrap();
        let err = handle
            .join_trip(&MembershipRequest::new_signed(&joiner, trip.clone(), wrong))
            .unwrap_err();
        assert!(matches!(err, RemoteError::PermissionDenied(_)));
        assert_eq!(hub.borrow().members(&trip).len(), 1);
    }

    #[test]
    fn forged_signature_is_denied() {
        let hub = RemoteHub::shared();
        let (mut handle, trip, token, _) = founded(&hub);
        let mut request = MembershipRequest::new_signed(&DeviceIdentity::generate(), trip, token);
        request.device_id = DeviceIdentity::generate().device_id();
        assert!(matches!(handle.join_trip(&request), Err(RemoteError::PermissionDenied(_))));
    }

    #[test]
    fn offline_handle_reaches_nothing() {
        let hub = RemoteHub::shared();
        let (mut handle, trip, _, _) = founded(&hub);
        handle.set_online(false);
        assert_eq!(handle.trip_exists(&trip), Err(RemoteError::Offline));
    }
}
