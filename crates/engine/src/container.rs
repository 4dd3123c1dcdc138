//! Local source of truth for one device's trip state.
//!
//! Every mutation stamps the slices it touches, writes them through to the
//! local store and then notifies subscribers synchronously. A storage
//! failure is logged and never fails the mutation: the in-memory state is
//! authoritative for the lifetime of the container.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use tripsync_core::{Action, Clock, Millis, SliceClock, SliceData, SliceName, TripState};
use tripsync_storage::{LocalStore, encode_slice, load_state, slice_key};

use crate::error::EngineError;

pub type ListenerError = Box<dyn std::error::Error>;

type Listener = Box<dyn FnMut(&StateChange<'_>) -> Result<(), ListenerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A user edit on this device.
    Local,
    /// Reconciled data arriving from the shared document.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// What a subscriber sees after a mutation.
#[derive(Debug)]
pub struct StateChange<'a> {
    pub state: &'a TripState,
    pub origin: Origin,
    pub dirty: &'a BTreeSet<SliceName>,
    /// Wall time of the mutation.
    pub at: Millis,
}

/// New content for some slices. A later entry for a slice replaces an
/// earlier one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    slices: BTreeMap<SliceName, SliceData>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, data: SliceData) -> Self {
        self.push(data);
        self
    }

    pub fn push(&mut self, data: SliceData) {
        self.slices.insert(data.name(), data);
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = SliceName> + '_ {
        self.slices.keys().copied()
    }
}

impl From<SliceData> for StatePatch {
    fn from(data: SliceData) -> Self {
        Self::new().with(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutateOptions {
    origin: Origin,
    dirty: BTreeSet<SliceName>,
    timestamps: BTreeMap<SliceName, Millis>,
}

impl MutateOptions {
    /// A local edit. `dirty` names slices to re-stamp in addition to the
    /// ones the patch carries.
    pub fn local(dirty: impl IntoIterator<Item = SliceName>) -> Self {
        Self {
            origin: Origin::Local,
            dirty: dirty.into_iter().collect(),
            timestamps: BTreeMap::new(),
        }
    }

    /// Remote data. Every affected slice takes its timestamp from
    /// `timestamps` and must have one.
    pub fn remote(timestamps: BTreeMap<SliceName, Millis>) -> Self {
        Self {
            origin: Origin::Remote,
            dirty: timestamps.keys().copied().collect(),
            timestamps,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}

pub struct StateContainer<S: LocalStore> {
    state: TripState,
    store: S,
    clock: Box<dyn Clock>,
    stamps: SliceClock,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl<S: LocalStore> StateContainer<S> {
    /// Load every persisted slice. Missing or corrupt slices start at their
    /// defaults.
    pub fn open(store: S, clock: Box<dyn Clock>) -> Self {
        let state = load_state(&store);
        let mut stamps = SliceClock::new();
        stamps.observe(state.max_updated_at());
        info!(last_stamp = stamps.last(), "opened trip state");
        Self {
            state,
            store,
            clock,
            stamps,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn state(&self) -> &TripState {
        &self.state
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&StateChange<'_>) -> Result<(), ListenerError> + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Apply `patch` and re-stamp every dirty slice.
    ///
    /// Local mutations get one fresh stamp for all dirty slices. Remote
    /// mutations keep the timestamps they arrived with; a dirty slice
    /// without one rejects the whole mutation before anything changes.
    pub fn mutate(&mut self, patch: StatePatch, options: MutateOptions) -> Result<(), EngineError> {
        let MutateOptions {
            origin,
            mut dirty,
            timestamps,
        } = options;
        dirty.extend(patch.names());
        if dirty.is_empty() {
            return Ok(());
        }

        let at = self.clock.now_ms();
        let stamps = match origin {
            Origin::Local => {
                let stamp = self.stamps.stamp(at);
                dirty.iter().map(|name| (*name, stamp)).collect()
            }
            Origin::Remote => {
                let mut stamps = BTreeMap::new();
                for name in &dirty {
                    let ts = timestamps
                        .get(name)
                        .ok_or(EngineError::MissingTimestamp(*name))?;
                    stamps.insert(*name, *ts);
                }
                stamps
            }
        };

        self.commit(patch, dirty, &stamps, origin, at);
        Ok(())
    }

    /// Apply a user action as a local mutation. Returns the stamp it got.
    pub fn dispatch(&mut self, action: &Action) -> Result<Millis, EngineError> {
        let at = self.clock.now_ms();
        let stamp = self.stamps.stamp(at);
        let data = action.apply(&self.state, stamp)?;
        let name = data.name();
        debug!(slice = %name, stamp, "dispatching action");
        self.commit(
            StatePatch::from(data),
            BTreeSet::from([name]),
            &BTreeMap::from([(name, stamp)]),
            Origin::Local,
            at,
        );
        Ok(stamp)
    }

    /// Read a raw key. Read failures are logged and read as absent.
    pub fn read_raw(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.read(key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "local read failed");
                None
            }
        }
    }

    /// Write a raw key. Returns false if the write failed.
    pub fn write_raw(&mut self, key: &str, bytes: &[u8]) -> bool {
        match self.store.write(key, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "local write failed, keeping in-memory state");
                false
            }
        }
    }

    fn commit(
        &mut self,
        mut patch: StatePatch,
        dirty: BTreeSet<SliceName>,
        stamps: &BTreeMap<SliceName, Millis>,
        origin: Origin,
        at: Millis,
    ) {
        for name in &dirty {
            let ts = stamps.get(name).copied().unwrap_or(at);
            self.stamps.observe(ts);
            match patch.slices.remove(name) {
                Some(data) => self.state.set(data, ts),
                None => self.state.touch(*name, ts),
            }
        }

        for name in &dirty {
            self.persist_slice(*name);
        }

        let change = StateChange {
            state: &self.state,
            origin,
            dirty: &dirty,
            at,
        };
        for (id, listener) in self.listeners.iter_mut() {
            if let Err(e) = listener(&change) {
                warn!(listener = id.0, error = %e, "state listener failed");
            }
        }
    }

    fn persist_slice(&mut self, name: SliceName) {
        let bytes = match encode_slice(&self.state.data(name), self.state.updated_at(name)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(slice = %name, error = %e, "failed to encode slice");
                return;
            }
        };
        self.write_raw(&slice_key(name), &bytes);
    }
}
