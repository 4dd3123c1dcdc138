//! Connection of one device's [`StateContainer`] to a shared trip.
//!
//! The session owns the remote subscription and an outbox of slices waiting
//! to be pushed. Local mutations mark their slices dirty through a container
//! listener; a debounced flush pushes every dirty slice as one partial
//! document write. Remote snapshots are merged slice by slice and applied
//! back through the container with the merged timestamps.
//!
//! ```text
//! Disconnected --create--> Creating --ok--> Connected
//! Disconnected --join----> Joining  --ok--> Connected
//! Creating/Joining/resume --failure--> Error --retry--> ...
//! Connected --disconnect--> Disconnected
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};
use tripsync_core::identity::{DeviceIdentity, MembershipRequest, TripRecord};
use tripsync_core::merge::merge_slice;
use tripsync_core::{DeviceId, JoinToken, Millis, SliceName, TripCode, TripDocument};
use tripsync_storage::{DEVICE_KEY, LocalStore};

use crate::config::{SyncConfig, SyncSettings};
use crate::container::{ListenerId, MutateOptions, Origin, StateContainer, StatePatch};
use crate::debounce::Debouncer;
use crate::error::EngineError;
use crate::remote::{RemoteError, RemoteStore, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Creating,
    Joining,
    Connected,
    Error,
}

/// User-facing sync indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Syncing,
    Synced,
    Error,
    /// Saved trip exists but this device is not on its member list.
    NeedsJoin,
    CodeUnavailable,
    JoinFailed,
    MissingJoinDetails,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Offline => "Offline",
            Self::Syncing => "Syncing…",
            Self::Synced => "Synced",
            Self::Error => "Sync error (tap to retry)",
            Self::NeedsJoin => "Join trip to start syncing",
            Self::CodeUnavailable => "Unable to create trip code",
            Self::JoinFailed => "Unable to join trip",
            Self::MissingJoinDetails => "Enter trip code + join token",
        };
        f.write_str(label)
    }
}

/// The operation [`SyncSession::retry`] will repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedOp {
    Create,
    Join { trip: TripCode, token: JoinToken },
    Resume,
    /// The remote subscription stopped delivering.
    Listen,
    Push,
}

struct Outbox {
    dirty: BTreeSet<SliceName>,
    debouncer: Debouncer,
}

impl Outbox {
    /// A local edit: mark and push the deadline back.
    fn mark(&mut self, names: impl IntoIterator<Item = SliceName>, now: Millis) {
        let mut any = false;
        for name in names {
            self.dirty.insert(name);
            any = true;
        }
        if any {
            self.debouncer.schedule(now);
        }
    }

    /// The remote copy lacks something we hold. Only arms the timer if the
    /// slice was not already waiting, so repeated snapshots cannot starve a
    /// pending push.
    fn requeue(&mut self, name: SliceName, now: Millis) {
        if self.dirty.insert(name) || self.debouncer.deadline().is_none() {
            self.debouncer.schedule(now);
        }
    }

    fn clear(&mut self) {
        self.dirty.clear();
        self.debouncer.cancel();
    }
}

pub struct SyncSession<R: RemoteStore> {
    remote: R,
    config: SyncConfig,
    identity: Option<DeviceIdentity>,
    state: SessionState,
    status: SyncStatus,
    trip: Option<TripCode>,
    join_token: Option<JoinToken>,
    subscription: Option<SubscriptionId>,
    listener: Option<ListenerId>,
    outbox: Rc<RefCell<Outbox>>,
    online: bool,
    last_failed: Option<FailedOp>,
}

impl<R: RemoteStore> SyncSession<R> {
    pub fn new(remote: R, config: SyncConfig) -> Self {
        let outbox = Outbox {
            dirty: BTreeSet::new(),
            debouncer: Debouncer::new(config.debounce_ms),
        };
        Self {
            remote,
            config,
            identity: None,
            state: SessionState::Disconnected,
            status: SyncStatus::Offline,
            trip: None,
            join_token: None,
            subscription: None,
            listener: None,
            outbox: Rc::new(RefCell::new(outbox)),
            online: true,
            last_failed: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn trip_code(&self) -> Option<&TripCode> {
        self.trip.as_ref()
    }

    pub fn join_token(&self) -> Option<&JoinToken> {
        self.join_token.as_ref()
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.identity.as_ref().map(DeviceIdentity::device_id)
    }

    pub fn last_failed(&self) -> Option<&FailedOp> {
        self.last_failed.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Slices waiting to be pushed.
    pub fn pending_slices(&self) -> BTreeSet<SliceName> {
        self.outbox.borrow().dirty.clone()
    }

    pub fn next_flush_at(&self) -> Option<Millis> {
        self.outbox.borrow().debouncer.deadline()
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Start a new trip with this device as founder.
    ///
    /// Local state becomes the initial shared state. A failed bootstrap push
    /// does not fail creation: the slices stay queued.
    pub fn create_session<S: LocalStore>(
        &mut self,
        container: &mut StateContainer<S>,
    ) -> Result<TripCode, EngineError> {
        self.stop_listening(container);
        self.state = SessionState::Creating;
        self.status = SyncStatus::Syncing;
        let device = self.ensure_identity(container).device_id();

        let code = match self.find_free_code() {
            Ok(Some(code)) => code,
            Ok(None) => {
                let attempts = self.config.max_code_attempts;
                warn!(attempts, "no free trip code");
                self.fail(FailedOp::Create, SyncStatus::CodeUnavailable);
                return Err(EngineError::TripCodeExhausted { attempts });
            }
            Err(e) => return Err(self.fail_remote(FailedOp::Create, SyncStatus::CodeUnavailable, e)),
        };

        let token = JoinToken::generate_with_len(self.config.join_token_len);
        let founder = {
            let identity = self.ensure_identity(container);
            MembershipRequest::new_signed(identity, code.clone(), token.clone())
        };
        let record = TripRecord::new(&token, device, container.now());
        if let Err(e) = self.remote.create_trip(&code, &record, &founder) {
            return Err(self.fail_remote(FailedOp::Create, SyncStatus::Error, e));
        }
        info!(trip = %code, device = %device, "created trip");

        self.trip = Some(code.clone());
        self.join_token = Some(token);
        self.last_failed = None;
        self.save_settings(container, true);

        self.outbox.borrow_mut().dirty.extend(SliceName::ALL);
        self.go_live(container)?;
        if let Err(e) = self.flush(container) {
            warn!(trip = %code, error = %e, "initial push failed, slices stay queued");
        }
        Ok(code)
    }

    /// Join an existing trip from user input.
    pub fn join_session<S: LocalStore>(
        &mut self,
        container: &mut StateContainer<S>,
        trip_code: &str,
        join_token: &str,
    ) -> Result<(), EngineError> {
        let (Ok(trip), Ok(token)) = (TripCode::parse(trip_code), JoinToken::parse(join_token)) else {
            self.status = SyncStatus::MissingJoinDetails;
            return Err(EngineError::MissingJoinDetails);
        };
        self.join(container, trip, token)
    }

    /// Reconnect to the trip saved in local settings, if sync is enabled.
    pub fn resume<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        let settings = SyncSettings::load(container);
        let (true, Some(trip)) = (settings.enabled, settings.trip_code) else {
            debug!("sync not enabled");
            self.status = SyncStatus::Offline;
            return Ok(());
        };
        self.trip = Some(trip);
        self.join_token = settings.join_token;
        self.reconnect(container)
    }

    /// Deliver remote snapshots and run a due push. Call on every tick.
    pub fn poll<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Ok(());
        }
        if self.online {
            if let Some(subscription) = self.subscription {
                match self.remote.drain_changes(subscription) {
                    Ok(docs) => {
                        for doc in &docs {
                            self.apply_remote_document(container, doc)?;
                        }
                    }
                    Err(e) => self.note_remote_error(FailedOp::Listen, &e),
                }
            }
        }

        let due = self.outbox.borrow_mut().debouncer.take_due(container.now());
        if due {
            self.flush(container)?;
        }
        Ok(())
    }

    /// Push every dirty slice now as one partial write.
    ///
    /// Offline, the push is suspended and the slices stay dirty. On failure
    /// they stay dirty too; only a successful write clears them.
    pub fn flush<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        let (trip, device) = self.require_trip()?;
        let slices = {
            let mut outbox = self.outbox.borrow_mut();
            outbox.debouncer.begin_flush();
            outbox.dirty.clone()
        };
        let result = self.push(container, &trip, &device, &slices);
        self.outbox.borrow_mut().debouncer.finish();
        result
    }

    fn push<S: LocalStore>(
        &mut self,
        container: &StateContainer<S>,
        trip: &TripCode,
        device: &DeviceId,
        slices: &BTreeSet<SliceName>,
    ) -> Result<(), EngineError> {
        if slices.is_empty() {
            return Ok(());
        }
        if !self.online {
            debug!(trip = %trip, slices = ?slices, "offline, push suspended");
            self.status = SyncStatus::Offline;
            return Ok(());
        }

        self.status = SyncStatus::Syncing;
        let update = TripDocument::from_state(container.state(), slices.iter().copied(), container.now())?;
        match self.remote.merge_state(trip, device, &update) {
            Ok(()) => {
                let mut outbox = self.outbox.borrow_mut();
                for name in slices {
                    outbox.dirty.remove(name);
                }
                drop(outbox);
                info!(trip = %trip, slices = ?slices, "pushed");
                self.status = SyncStatus::Synced;
                if self.last_failed == Some(FailedOp::Push) {
                    self.last_failed = None;
                }
                Ok(())
            }
            Err(e) => {
                self.note_remote_error(FailedOp::Push, &e);
                Err(e.into())
            }
        }
    }

    /// Merge a remote snapshot into local state.
    ///
    /// Slices where the merge differs from local are applied with the
    /// merged timestamps. Slices where local holds something the remote
    /// lacks are queued for another push; a queued slice the remote already
    /// matches is dropped from the queue.
    pub fn apply_remote_document<S: LocalStore>(
        &mut self,
        container: &mut StateContainer<S>,
        doc: &TripDocument,
    ) -> Result<(), EngineError> {
        let mut patch = StatePatch::new();
        let mut stamps = BTreeMap::new();
        let mut stale = Vec::new();
        let mut settled = Vec::new();

        for remote in doc.decode() {
            let name = remote.data.name();
            let state = container.state();
            let merged = merge_slice(&state.data(name), state.updated_at(name), &remote.data, remote.updated_at)?;
            if merged.remote_stale {
                stale.push(name);
            } else {
                settled.push(name);
            }
            if merged.local_changed {
                stamps.insert(name, merged.updated_at);
                patch.push(merged.data);
            }
        }

        if !patch.is_empty() {
            debug!(slices = ?stamps.keys().collect::<Vec<_>>(), "applying remote slices");
            container.mutate(patch, MutateOptions::remote(stamps))?;
        }

        let now = container.now();
        let mut outbox = self.outbox.borrow_mut();
        for name in settled {
            outbox.dirty.remove(&name);
        }
        if !stale.is_empty() {
            debug!(slices = ?stale, "remote copy behind, queueing push");
            for name in stale {
                outbox.requeue(name, now);
            }
        }
        drop(outbox);

        if self.online && self.status != SyncStatus::Error {
            self.status = SyncStatus::Synced;
        }
        Ok(())
    }

    /// Connectivity changed. Coming back online re-reads the remote document
    /// and pushes whatever is still queued; a session that never finished
    /// connecting reconnects.
    pub fn set_online<S: LocalStore>(
        &mut self,
        container: &mut StateContainer<S>,
        online: bool,
    ) -> Result<(), EngineError> {
        if !online {
            info!("went offline");
            self.online = false;
            self.status = SyncStatus::Offline;
            return Ok(());
        }
        let was_offline = !self.online;
        self.online = true;
        if was_offline {
            info!("back online");
        }

        match self.state {
            SessionState::Connected => {
                let (trip, device) = self.require_trip()?;
                match self.remote.fetch_state(&trip, &device) {
                    Ok(Some(doc)) => self.apply_remote_document(container, &doc)?,
                    Ok(None) => {}
                    Err(e) => {
                        self.note_remote_error(FailedOp::Resume, &e);
                        return Err(e.into());
                    }
                }
                if self.last_failed == Some(FailedOp::Listen) {
                    self.relisten()?;
                }
                self.flush(container)
            }
            SessionState::Error | SessionState::Disconnected
                if self.trip.is_some() && self.last_failed == Some(FailedOp::Resume) =>
            {
                self.reconnect(container)
            }
            _ => Ok(()),
        }
    }

    /// Repeat the last failed operation. A no-op if nothing failed.
    pub fn retry<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        let Some(op) = self.last_failed.take() else {
            debug!("nothing to retry");
            return Ok(());
        };
        info!(op = ?op, "retrying");
        self.online = true;
        match op {
            FailedOp::Create => self.create_session(container).map(|_| ()),
            FailedOp::Join { trip, token } => self.join(container, trip, token),
            FailedOp::Resume => self.reconnect(container),
            FailedOp::Listen => self.relisten(),
            FailedOp::Push => self.flush(container),
        }
    }

    /// Stop syncing. Local data is kept, as is the saved trip code so the
    /// user can re-enable sync later.
    pub fn disconnect<S: LocalStore>(&mut self, container: &mut StateContainer<S>) {
        self.stop_listening(container);
        self.outbox.borrow_mut().clear();
        self.state = SessionState::Disconnected;
        self.status = SyncStatus::Offline;
        self.last_failed = None;
        self.save_settings(container, false);
        info!(trip = ?self.trip, "disconnected");
    }

    fn join<S: LocalStore>(
        &mut self,
        container: &mut StateContainer<S>,
        trip: TripCode,
        token: JoinToken,
    ) -> Result<(), EngineError> {
        self.stop_listening(container);
        self.state = SessionState::Joining;
        self.status = SyncStatus::Syncing;

        let request = {
            let identity = self.ensure_identity(container);
            MembershipRequest::new_signed(identity, trip.clone(), token.clone())
        };
        if let Err(e) = self.remote.join_trip(&request) {
            let op = FailedOp::Join {
                trip: trip.clone(),
                token,
            };
            warn!(trip = %trip, "join rejected");
            return Err(self.fail_remote(op, SyncStatus::JoinFailed, e));
        }
        info!(trip = %trip, device = %request.device_id, "joined trip");

        self.trip = Some(trip);
        self.join_token = Some(token);
        self.last_failed = None;
        self.save_settings(container, true);
        self.attach(container)
    }

    /// Check membership, then reconcile and listen.
    fn reconnect<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        let Some(trip) = self.trip.clone() else {
            return Err(EngineError::NotConnected);
        };
        if !self.online {
            self.status = SyncStatus::Offline;
            self.last_failed = Some(FailedOp::Resume);
            return Ok(());
        }
        self.status = SyncStatus::Syncing;
        let device = self.ensure_identity(container).device_id();
        match self.remote.is_member(&trip, &device) {
            Ok(true) => self.attach(container),
            Ok(false) | Err(RemoteError::NotFound(_)) => {
                info!(trip = %trip, "device is not a member, join required");
                self.state = SessionState::Disconnected;
                self.status = SyncStatus::NeedsJoin;
                Ok(())
            }
            Err(e) => Err(self.fail_remote(FailedOp::Resume, SyncStatus::Error, e)),
        }
    }

    /// Initial reconciliation: an empty remote document is bootstrapped from
    /// local state, anything else is merged. Then listen.
    fn attach<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        let (trip, device) = self.require_trip()?;
        let bootstrap = match self.remote.fetch_state(&trip, &device) {
            Ok(Some(doc)) if !doc.is_empty() => {
                self.apply_remote_document(container, &doc)?;
                false
            }
            Ok(_) => {
                debug!(trip = %trip, "remote state empty, bootstrapping from local");
                self.outbox.borrow_mut().dirty.extend(SliceName::ALL);
                true
            }
            Err(e) => return Err(self.fail_remote(FailedOp::Resume, SyncStatus::Error, e)),
        };
        self.go_live(container)?;
        if bootstrap {
            if let Err(e) = self.flush(container) {
                warn!(trip = %trip, error = %e, "bootstrap push failed, slices stay queued");
            }
        }
        Ok(())
    }

    fn go_live<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> Result<(), EngineError> {
        let (trip, device) = self.require_trip()?;
        if self.subscription.is_none() {
            match self.remote.subscribe(&trip, &device) {
                Ok(subscription) => self.subscription = Some(subscription),
                Err(e) => return Err(self.fail_remote(FailedOp::Resume, SyncStatus::Error, e)),
            }
        }
        if self.listener.is_none() {
            let outbox = Rc::clone(&self.outbox);
            let id = container.subscribe(move |change| {
                if change.origin == Origin::Local {
                    outbox.borrow_mut().mark(change.dirty.iter().copied(), change.at);
                }
                Ok(())
            });
            self.listener = Some(id);
        }
        self.state = SessionState::Connected;
        self.last_failed = None;
        self.status = if self.online {
            SyncStatus::Synced
        } else {
            SyncStatus::Offline
        };
        info!(trip = %trip, "listening for remote changes");
        Ok(())
    }

    /// Replace a broken subscription. Membership is not re-checked; the
    /// new subscription delivers the current snapshot first.
    fn relisten(&mut self) -> Result<(), EngineError> {
        let (trip, device) = self.require_trip()?;
        if let Some(old) = self.subscription.take() {
            self.remote.unsubscribe(old);
        }
        match self.remote.subscribe(&trip, &device) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                if self.last_failed == Some(FailedOp::Listen) {
                    self.last_failed = None;
                }
                self.status = SyncStatus::Synced;
                info!(trip = %trip, "listening again");
                Ok(())
            }
            Err(e) => {
                self.note_remote_error(FailedOp::Listen, &e);
                Err(e.into())
            }
        }
    }

    fn stop_listening<S: LocalStore>(&mut self, container: &mut StateContainer<S>) {
        if let Some(subscription) = self.subscription.take() {
            self.remote.unsubscribe(subscription);
        }
        if let Some(id) = self.listener.take() {
            container.unsubscribe(id);
        }
    }

    fn find_free_code(&mut self) -> Result<Option<TripCode>, RemoteError> {
        for attempt in 1..=self.config.max_code_attempts {
            let code = TripCode::generate_with_len(self.config.trip_code_len);
            if !self.remote.trip_exists(&code)? {
                return Ok(Some(code));
            }
            debug!(attempt, "trip code taken");
        }
        Ok(None)
    }

    /// Load the persisted device key, or create and persist a new one.
    fn ensure_identity<S: LocalStore>(&mut self, container: &mut StateContainer<S>) -> &DeviceIdentity {
        self.identity.get_or_insert_with(|| {
            let stored = container
                .read_raw(DEVICE_KEY)
                .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok());
            if let Some(secret) = stored {
                return DeviceIdentity::from_secret_bytes(&secret);
            }
            let identity = DeviceIdentity::generate();
            container.write_raw(DEVICE_KEY, &identity.secret_bytes());
            info!(device = %identity.device_id(), "created device identity");
            identity
        })
    }

    fn require_trip(&self) -> Result<(TripCode, DeviceId), EngineError> {
        match (&self.trip, &self.identity) {
            (Some(trip), Some(identity)) => Ok((trip.clone(), identity.device_id())),
            _ => Err(EngineError::NotConnected),
        }
    }

    fn save_settings<S: LocalStore>(&self, container: &mut StateContainer<S>, enabled: bool) {
        let settings = SyncSettings {
            enabled,
            trip_code: self.trip.clone(),
            join_token: self.join_token.clone(),
        };
        settings.save(container);
    }

    fn fail(&mut self, op: FailedOp, status: SyncStatus) {
        self.state = SessionState::Error;
        self.status = status;
        self.last_failed = Some(op);
    }

    /// A connect step failed: enter `Error`, remember the step for retry.
    fn fail_remote(&mut self, op: FailedOp, status: SyncStatus, error: RemoteError) -> EngineError {
        warn!(op = ?op, error = %error, "sync operation failed");
        let status = if error.is_offline() {
            self.online = false;
            SyncStatus::Offline
        } else {
            status
        };
        self.fail(op, status);
        error.into()
    }

    /// A failure while connected. The session stays connected.
    fn note_remote_error(&mut self, op: FailedOp, error: &RemoteError) {
        warn!(op = ?op, error = %error, "remote call failed");
        if error.is_offline() {
            self.online = false;
            self.status = SyncStatus::Offline;
        } else {
            self.status = SyncStatus::Error;
        }
        self.last_failed = Some(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(SyncStatus::Syncing.to_string(), "Syncing…");
        assert_eq!(SyncStatus::Error.to_string(), "Sync error (tap to retry)");
        assert_eq!(SyncStatus::NeedsJoin.to_string(), "Join trip to start syncing");
        assert_eq!(SyncStatus::MissingJoinDetails.to_string(), "Enter trip code + join token");
    }

    #[test]
    fn outbox_requeue_does_not_push_back_pending_deadline() {
        let mut outbox = Outbox {
            dirty: BTreeSet::new(),
            debouncer: Debouncer::new(800),
        };
        outbox.mark([SliceName::Gear], 100);
        assert_eq!(outbox.debouncer.deadline(), Some(900));

        outbox.requeue(SliceName::Gear, 500);
        assert_eq!(outbox.debouncer.deadline(), Some(900));

        outbox.requeue(SliceName::Pills, 600);
        assert_eq!(outbox.debouncer.deadline(), Some(1_400));
        assert_eq!(outbox.dirty.len(), 2);
    }

    #[test]
    fn outbox_mark_pushes_deadline_back() {
        let mut outbox = Outbox {
            dirty: BTreeSet::new(),
            debouncer: Debouncer::new(800),
        };
        outbox.mark([SliceName::Ui], 0);
        outbox.mark([SliceName::Ui], 700);
        assert_eq!(outbox.debouncer.deadline(), Some(1_500));
    }
}
