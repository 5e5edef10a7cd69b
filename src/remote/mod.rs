//! Remote data stores and the transports they commit through.

pub mod sink;
pub mod transport;

#[cfg(feature = "http")]
pub mod http;

// Re-export commonly used types
pub use sink::{default_device_id, CommitOutcome, ObjectStoreRemote, RemoteDataStore, RemoteError};
pub use transport::{DirectoryTransport, ObjectTransport, TransportError};

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpTransport, ObjectStoreClient};
