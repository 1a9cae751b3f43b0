use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

/// One stored value. The transaction machinery treats entities as opaque:
/// they are replaced wholesale on write and never mutated in place without
/// the key's write lock held.
#[derive(Clone, Debug, PartialEq)]
pub struct DataEntity {
    pub data: Value,
}

/// Payloads a key can hold.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<String, Bytes>),
    Set(HashSet<Bytes>),
}

impl DataEntity {
    pub fn str(data: impl Into<Bytes>) -> DataEntity {
        DataEntity {
            data: Value::Str(data.into()),
        }
    }

    pub fn as_str(&self) -> Option<&Bytes> {
        match &self.data {
            Value::Str(data) => Some(data),
            _ => None,
        }
    }

    /// Type name as reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match &self.data {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

impl From<Bytes> for DataEntity {
    fn from(data: Bytes) -> Self {
        DataEntity::str(data)
    }
}
