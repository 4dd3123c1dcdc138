pub mod config;
pub mod container;
pub mod debounce;
pub mod error;
pub mod remote;
pub mod session;

pub use config::{SyncConfig, SyncSettings};
pub use container::{
    ListenerError, ListenerId, MutateOptions, Origin, StateChange, StateContainer, StatePatch,
};
pub use debounce::{DebounceState, Debouncer};
pub use error::EngineError;
pub use remote::{RemoteError, RemoteStore, SubscriptionId};
pub use session::{FailedOp, SessionState, SyncSession, SyncStatus};
