use uuid::Uuid;

use super::codec::{Resource, ResourceHeader};
use super::file::ResourceLoader;
use crate::errors::*;

/// A blob of raw bytes, with an optional list of resources it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes {
    data: Vec<u8>,
    dependencies: Vec<Uuid>,
    allow_async_loading: bool,
}

impl Bytes {
    pub fn new(data: Vec<u8>) -> Self {
        Bytes {
            data,
            dependencies: Vec::new(),
            allow_async_loading: true,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Forces the blob to be decoded on the thread that requests it.
    pub fn sync_only(mut self) -> Self {
        self.allow_async_loading = false;
        self
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Resource for Bytes {
    fn kind(&self) -> &'static str {
        "Bytes"
    }

    fn dependencies(&self) -> Vec<Uuid> {
        self.dependencies.clone()
    }

    fn allow_async_loading(&self) -> bool {
        self.allow_async_loading
    }
}

/// Stores `Bytes` as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesLoader;

impl ResourceLoader for BytesLoader {
    fn kind(&self) -> &'static str {
        "Bytes"
    }

    fn decode(
        &self,
        header: &ResourceHeader,
        payload: Vec<u8>,
        _: bool,
    ) -> Result<Box<dyn Resource>> {
        Ok(Box::new(Bytes {
            data: payload,
            dependencies: header.dependencies.clone(),
            allow_async_loading: header.allow_async_loading,
        }))
    }

    fn encode(&self, resource: &dyn Resource) -> Result<Vec<u8>> {
        match resource.downcast_ref::<Bytes>() {
            Some(bytes) => Ok(bytes.data.clone()),
            None => Err(Error::UnknownKind(resource.kind().to_owned())),
        }
    }
}
