//! Object-store transports used by the remote data store.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Errors from a single transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// Local filesystem error
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Config(msg) => write!(f, "Transport config error: {msg}"),
            TransportError::Network(msg) => write!(f, "Transport network error: {msg}"),
            TransportError::Server { status, message } => {
                write!(f, "Transport server error ({status}): {message}")
            }
            TransportError::Io(msg) => write!(f, "Transport IO error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// An object-store-like API. Each call may fail independently.
pub trait ObjectTransport: Send + Sync {
    /// Create the container if needed. Must be idempotent.
    fn ensure_container_exists(&self, container: &str) -> Result<(), TransportError>;

    /// Store `payload` under `key`, overwriting any previous object.
    fn put(&self, container: &str, key: &str, payload: &[u8]) -> Result<(), TransportError>;
}

impl<T: ObjectTransport + ?Sized> ObjectTransport for std::sync::Arc<T> {
    fn ensure_container_exists(&self, container: &str) -> Result<(), TransportError> {
        (**self).ensure_container_exists(container)
    }

    fn put(&self, container: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        (**self).put(container, key, payload)
    }
}

/// Object store laid out as directories on a local or mounted filesystem.
///
/// Containers are directories under `root`; objects are `<key>.json` files
/// written atomically via rename.
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    root: PathBuf,
}

impl DirectoryTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, container: &str, key: &str) -> PathBuf {
        self.root.join(container).join(format!("{key}.json"))
    }
}

impl ObjectTransport for DirectoryTransport {
    fn ensure_container_exists(&self, container: &str) -> Result<(), TransportError> {
        fs::create_dir_all(self.root.join(container)).map_err(|e| TransportError::Io(e.to_string()))
    }

    fn put(&self, container: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        let dir = self.root.join(container);
        if !dir.is_dir() {
            return Err(TransportError::Io(format!(
                "container {container} does not exist"
            )));
        }

        let target = self.object_path(container, key);
        let tmp = dir.join(format!(".{key}.tmp"));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
            fs::rename(&tmp, &target)
        };
        write().map_err(|e| TransportError::Io(e.to_string()))
    }
}
