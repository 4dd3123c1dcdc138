pub mod codec;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use codec::{decode_slice, encode_slice, load_state};
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::*;
