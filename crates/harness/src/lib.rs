pub mod hub;
pub mod network;
pub mod peer;

pub use hub::{HubHandle, PushRecord, RemoteHub};
pub use network::TestNetwork;
pub use peer::TestDevice;
