//! Typed object operations over a [`Backend`].
//!
//! Objects are stored encoded at the latest wire version with the resource
//! version stripped; the store's modification index is the resource version
//! and is stamped onto every object read back. A write whose object embeds
//! a resource version is guarded by compare-and-swap against it.

use std::sync::Arc;
use std::time::Duration;

use regatta_api::codec;
use regatta_api::model::ApiObject;
use regatta_api::{Error, Object, Result};

use crate::backend::{Backend, KeyNode};

/// Resource versions are opaque to clients but are the store's decimal
/// modification index underneath. Absent and empty mean "no version".
pub fn parse_resource_version(version: Option<&str>) -> Result<u64> {
    match version {
        None | Some("") => Ok(0),
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| Error::Decode(format!("invalid resource version {v:?}"))),
    }
}

/// Bounds every stored kind satisfies: hand-written metadata access plus
/// lossless passage through the codec's tagged union.
pub trait StoredObject:
    Object + Clone + Into<ApiObject> + TryFrom<ApiObject, Error = Error> + Send + Sync + 'static
{
}

impl<T> StoredObject for T where
    T: Object + Clone + Into<ApiObject> + TryFrom<ApiObject, Error = Error> + Send + Sync + 'static
{
}

#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Store {
        Store { backend }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn decode_node<T: StoredObject>(node: &KeyNode) -> Result<T> {
        let mut obj: T = codec::decode_into(&node.value)?;
        obj.set_resource_version(node.modified_index.to_string());
        Ok(obj)
    }

    fn encode_for_store<T: StoredObject>(obj: &T) -> Result<Vec<u8>> {
        let mut stripped = obj.clone();
        stripped.metadata_mut().resource_version = None;
        codec::encode(&stripped.into(), codec::LATEST_VERSION)
    }

    /// Replace the store-level `key` identity in an error with the object's
    /// own kind and name, so callers see `Pod "p1"` rather than a key path.
    fn identify<T: StoredObject>(err: Error, obj: &T) -> Error {
        match err {
            Error::NotFound { .. } => Error::not_found(obj.kind(), obj.name()),
            Error::AlreadyExists { .. } => Error::already_exists(obj.kind(), obj.name()),
            Error::Conflict { message, .. } => Error::conflict(obj.kind(), obj.name(), message),
            other => other,
        }
    }

    pub async fn get_object<T: StoredObject>(
        &self,
        key: &str,
        ignore_not_found: bool,
    ) -> Result<Option<T>> {
        match self.backend.get(key).await {
            Ok(node) => Ok(Some(Self::decode_node(&node)?)),
            Err(err) if err.is_not_found() && ignore_not_found => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Unconditional put, or compare-and-swap when the object embeds a
    /// resource version. Returns the object as stored, new version stamped.
    pub async fn set_object<T: StoredObject>(&self, key: &str, obj: &T) -> Result<T> {
        let expected = parse_resource_version(obj.resource_version())?;
        let data = Self::encode_for_store(obj)?;
        let node = self
            .backend
            .set(key, data, (expected > 0).then_some(expected))
            .await
            .map_err(|e| Self::identify(e, obj))?;
        let mut stored = obj.clone();
        stored.set_resource_version(node.modified_index.to_string());
        Ok(stored)
    }

    pub async fn create_object<T: StoredObject>(&self, key: &str, obj: &T) -> Result<T> {
        self.create_object_ttl(key, obj, None).await
    }

    pub async fn create_object_ttl<T: StoredObject>(
        &self,
        key: &str,
        obj: &T,
        ttl: Option<Duration>,
    ) -> Result<T> {
        let data = Self::encode_for_store(obj)?;
        let node = self
            .backend
            .create(key, data, ttl)
            .await
            .map_err(|e| Self::identify(e, obj))?;
        let mut stored = obj.clone();
        stored.set_resource_version(node.modified_index.to_string());
        Ok(stored)
    }

    /// Read-modify-write retry loop. `mutate` receives the current value
    /// (`None` when the key is absent), must be side-effect free, and is
    /// re-run after every lost race until the guarded write lands or it
    /// returns an error itself.
    pub async fn atomic_update<T, F>(&self, key: &str, mutate: F) -> Result<T>
    where
        T: StoredObject,
        F: Fn(Option<T>) -> Result<T>,
    {
        loop {
            match self.backend.get(key).await {
                Ok(node) => {
                    let current: T = Self::decode_node(&node)?;
                    let next = mutate(Some(current))?;
                    let data = Self::encode_for_store(&next)?;
                    match self
                        .backend
                        .set(key, data, Some(node.modified_index))
                        .await
                    {
                        Ok(stored) => {
                            let mut next = next;
                            next.set_resource_version(stored.modified_index.to_string());
                            return Ok(next);
                        }
                        Err(err) if err.is_conflict() || err.is_not_found() => continue,
                        Err(err) => return Err(err),
                    }
                }
                Err(err) if err.is_not_found() => {
                    let next = mutate(None)?;
                    let data = Self::encode_for_store(&next)?;
                    match self.backend.create(key, data, None).await {
                        Ok(stored) => {
                            let mut next = next;
                            next.set_resource_version(stored.modified_index.to_string());
                            return Ok(next);
                        }
                        Err(err) if err.is_already_exists() => continue,
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        self.backend.delete(key, recursive).await
    }

    /// Decode every child under `prefix`. The returned index is the store's
    /// current modification index, used as the list resource version so a
    /// watch started from it sees exactly the changes after this list.
    pub async fn extract_list<T: StoredObject>(&self, prefix: &str) -> Result<(Vec<T>, u64)> {
        let nodes = self.backend.list(prefix).await?;
        let items = nodes
            .iter()
            .map(Self::decode_node)
            .collect::<Result<Vec<T>>>()?;
        let index = self.backend.index().await?;
        Ok((items, index))
    }
}
