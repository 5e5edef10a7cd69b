//! Local storage errors.

/// Errors raised by the local data store and its storage medium.
///
/// `Io` and `Serialization` mean the medium can no longer be trusted to
/// persist data; the protocol treats them as fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Io(String),
    Serialization(String),
    /// Another process (or medium) already has the log open
    Locked(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Storage IO error: {e}"),
            StoreError::Serialization(e) => write!(f, "Storage serialization error: {e}"),
            StoreError::Locked(path) => {
                write!(f, "Local data log {path} is in use by another session")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A stored record that could not be decoded during recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptRecord {
    /// 1-based position in the log
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for CorruptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "corrupt record at line {}: {}", self.line, self.reason)
    }
}
