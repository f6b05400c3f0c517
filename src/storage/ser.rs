use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{ObjectId, Result, StoreError};

/// A view object the store can persist.
///
/// Version numbers come from the caller's allocator; the store only records
/// and compares them.
pub trait VersionedObject: Send + Sync + 'static {
    /// Namespace the object lives in. Empty for the default namespace.
    fn namespace(&self) -> &str;
    /// Identifier unique within the namespace.
    fn object_id(&self) -> ObjectId;
    /// Full version number.
    fn version(&self) -> u32;
    /// Sub-version within [`Self::version`].
    fn sub_version(&self) -> u32;
    /// Name used in diagnostics.
    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Converts view objects to opaque blobs and back.
///
/// Failures in either direction are contained by the store: a failed
/// serialization drops that version from persistence, a failed
/// deserialization reads as "not found".
pub trait PageSerializer<T>: Send + Sync + 'static {
    /// Serializes `object`.
    fn serialize(&self, object: &T) -> Result<Vec<u8>>;
    /// Rebuilds an object from `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// [`PageSerializer`] for any serde type, encoded as JSON.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Creates the serializer.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PageSerializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn serialize(&self, object: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(object).map_err(|err| StoreError::Serialization(err.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|err| StoreError::Deserialization(err.to_string()))
    }
}
