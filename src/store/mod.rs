pub mod in_memory;
pub mod instrumented;

use std::fmt::{Debug, Display};

use thiserror::Error;

pub const ID_FIELD: &str = "id";
pub const UPDATE_TIME_FIELD: &str = "updateTime";

const RECORD_ID_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0:?} is not a valid record id")]
    InvalidKey(String),
    #[error("The field {0:?} cannot be updated")]
    UnknownField(String),
    #[error("The store is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// The native key of a record: a 12 byte object identifier, written as 24 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; RECORD_ID_SIZE]);

impl RecordId {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; RECORD_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds an id whose trailing bytes hold `value`, so ids created from increasing values
    /// enumerate in the same order.
    #[must_use]
    pub fn from_sequence(value: u64) -> Self {
        let mut bytes = [0; RECORD_ID_SIZE];
        bytes[RECORD_ID_SIZE - size_of::<u64>()..].copy_from_slice(&value.to_be_bytes());

        Self(bytes)
    }

    pub fn from_hex(text: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidKey(text.to_string());

        let hex_digits = text.bytes().all(|byte| byte.is_ascii_hexdigit());
        if text.len() != RECORD_ID_SIZE * 2 || !hex_digits {
            return Err(invalid());
        }

        let mut bytes = [0; RECORD_ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }

        Ok(Self(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordId({})", self.to_hex())
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Milliseconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(i64);

impl Timestamp {
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn saturating_add(self, delta: i64) -> Self {
        Self(self.0.saturating_add(delta))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub update_time: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    Id(RecordId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Replaces the field with a value computed by the client.
    Set { field: String, value: Timestamp },
    /// Adds `delta` to whatever value the store currently holds for the field.
    Increment { field: String, delta: i64 },
}

impl Update {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Set { field, .. } | Self::Increment { field, .. } => field.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Acknowledged { matched: u64 },
    /// The write was sent with an unacknowledged write concern, so the matched count is unknown.
    Unacknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteConcern {
    #[default]
    Acknowledged,
    Unacknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindOptions {
    /// `0` means no limit.
    pub limit: u64,
    pub skip: u64,
    /// Fields to keep, `None` keeps everything.
    pub projection: Option<Vec<String>>,
}

pub trait Store: Send + Sync {
    fn count(&self, namespace: &Namespace, filter: &Filter) -> Result<u64, StoreError>;

    /// Records come back in ascending id order.
    fn find(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Record>, StoreError>;

    fn update_one(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, StoreError>;

    fn find_one(&self, namespace: &Namespace, filter: &Filter)
    -> Result<Option<Record>, StoreError>;
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn record_id_hex() {
        let id = RecordId::from_hex("65a1f0c2e4b0a1b2c3d4e5f6").unwrap();

        assert_eq!(id.to_hex(), "65a1f0c2e4b0a1b2c3d4e5f6");
        assert_eq!(id.as_bytes()[0], 0x65);
        assert_eq!(RecordId::from_hex(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn record_id_invalid_hex() {
        assert!(matches!(
            RecordId::from_hex("65a1f0c2"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            RecordId::from_hex("zza1f0c2e4b0a1b2c3d4e5f6"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            RecordId::from_hex("65a1f0c2e4b0a1b2c3d4e5fé"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn sequence_ids_are_ordered() {
        assert!(RecordId::from_sequence(1) < RecordId::from_sequence(2));
        assert!(RecordId::from_sequence(255) < RecordId::from_sequence(256));
    }

    #[test]
    fn timestamp_saturates() {
        assert_eq!(
            Timestamp::from_millis(i64::MAX).saturating_add(1),
            Timestamp::from_millis(i64::MAX)
        );
    }
}
