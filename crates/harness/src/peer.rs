use std::cell::RefCell;
use std::rc::Rc;

use tripsync_core::{Action, DeviceId, JoinToken, ManualClock, Millis, TripCode, TripState, live};
use tripsync_engine::{EngineError, StateContainer, SyncConfig, SyncSession};
use tripsync_storage::{SqliteStore, StorageError};

use crate::hub::{HubHandle, RemoteHub};

/// One simulated install: local store, state container and sync session.
pub struct TestDevice {
    pub container: StateContainer<SqliteStore>,
    pub session: SyncSession<HubHandle>,
    link: HubHandle,
}

impl TestDevice {
    pub fn new(hub: &Rc<RefCell<RemoteHub>>, clock: &ManualClock) -> Result<Self, StorageError> {
        Ok(Self::with_store(hub, clock, SqliteStore::open_in_memory()?))
    }

    pub fn with_store(hub: &Rc<RefCell<RemoteHub>>, clock: &ManualClock, store: SqliteStore) -> Self {
        let link = HubHandle::new(Rc::clone(hub));
        Self {
            container: StateContainer::open(store, Box::new(clock.clone())),
            session: SyncSession::new(link.clone(), SyncConfig::default()),
            link,
        }
    }

    pub fn state(&self) -> &TripState {
        self.container.state()
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.session.device_id()
    }

    pub fn dispatch(&mut self, action: &Action) -> Result<Millis, EngineError> {
        self.container.dispatch(action)
    }

    pub fn create_trip(&mut self) -> Result<(TripCode, JoinToken), Box<dyn std::error::Error>> {
        let code = self.session.create_session(&mut self.container)?;
        let token = self
            .session
            .join_token()
            .cloned()
            .ok_or("created trip has no join token")?;
        Ok((code, token))
    }

    pub fn join(&mut self, code: &str, token: &str) -> Result<(), EngineError> {
        self.session.join_session(&mut self.container, code, token)
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.session.resume(&mut self.container)
    }

    pub fn poll(&mut self) -> Result<(), EngineError> {
        self.session.poll(&mut self.container)
    }

    pub fn retry(&mut self) -> Result<(), EngineError> {
        self.session.retry(&mut self.container)
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect(&mut self.container);
    }

    /// Lose connectivity: the link fails and the session is told.
    pub fn go_offline(&mut self) -> Result<(), EngineError> {
        self.link.set_online(false);
        self.session.set_online(&mut self.container, false)
    }

    pub fn go_online(&mut self) -> Result<(), EngineError> {
        self.link.set_online(true);
        self.session.set_online(&mut self.container, true)
    }

    /// Labels of live gear items, in list order.
    pub fn gear_labels(&self) -> Vec<String> {
        live(&self.state().gear.data)
            .map(|item| item.label.clone())
            .collect()
    }

    pub fn into_store(self) -> SqliteStore {
        self.container.into_store()
    }
}
