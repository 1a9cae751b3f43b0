use std::time::SystemTime;

use thiserror::Error as ThisError;

use crate::entity::DataEntity;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("malformed snapshot: {reason}")]
    Malformed { reason: String },
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One rehydrated key.
#[derive(Debug)]
pub struct SnapshotEntry {
    pub db_index: usize,
    pub key: String,
    pub entity: DataEntity,
    /// Absolute expiration; `None` means the key never expires.
    pub expire_at: Option<SystemTime>,
}

/// Pull-style decoder the engine drives to repopulate the keyspace. `Ok(None)`
/// marks the end of the snapshot; the first error aborts the load.
pub trait SnapshotDecoder {
    fn next_entry(&mut self) -> Result<Option<SnapshotEntry>, Error>;
}

/// Decoder over an in-memory entry list, for tests and programmatic seeding.
pub struct MemoryDecoder {
    entries: std::vec::IntoIter<Result<SnapshotEntry, Error>>,
}

impl MemoryDecoder {
    pub fn new(entries: Vec<Result<SnapshotEntry, Error>>) -> MemoryDecoder {
        MemoryDecoder {
            entries: entries.into_iter(),
        }
    }
}

impl SnapshotDecoder for MemoryDecoder {
    fn next_entry(&mut self) -> Result<Option<SnapshotEntry>, Error> {
        self.entries.next().transpose()
    }
}
