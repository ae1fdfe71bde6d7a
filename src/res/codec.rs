use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::*;

/// Upcasts to `Any`, so resources could be downcasted to their concrete types.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A piece of data that is fully prepared for using at runtime, such like meshes,
/// textures or shaders.
pub trait Resource: AsAny + Send + Sync + 'static {
    /// A stable name of the concrete type, used to pick a loader when decoding.
    fn kind(&self) -> &'static str;

    /// Resources that must be loaded along with this one.
    fn dependencies(&self) -> Vec<Uuid> {
        Vec::new()
    }

    /// Returns false if this resource must be decoded on the thread that requested it.
    fn allow_async_loading(&self) -> bool {
        true
    }
}

impl dyn Resource {
    /// Returns a reference to the concrete resource if it is of type `T`.
    #[inline]
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }

    /// Converts a shared resource into its concrete type if it is of type `T`.
    #[inline]
    pub fn downcast_arc<T: Resource>(self: Arc<Self>) -> Option<Arc<T>> {
        AsAny::into_any_arc(self).downcast::<T>().ok()
    }

    #[inline]
    pub fn is<T: Resource>(&self) -> bool {
        AsAny::as_any(self).is::<T>()
    }
}

/// The metadata stored ahead of the payload of a resource file. It could be read
/// without decoding the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHeader {
    pub kind: String,
    pub dependencies: Vec<Uuid>,
    pub allow_async_loading: bool,
}

impl ResourceHeader {
    pub fn new(resource: &dyn Resource) -> Self {
        ResourceHeader {
            kind: resource.kind().to_owned(),
            dependencies: resource.dependencies(),
            allow_async_loading: resource.allow_async_loading(),
        }
    }
}

/// Reads and writes resources from and to the file system. Every method could be
/// called from any thread concurrently.
pub trait ResourceCodec: Send + Sync + 'static {
    /// Returns true if there is a resource file at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Decodes the header of the resource file at `path`.
    fn decode_header(&self, path: &Path) -> Result<ResourceHeader>;

    /// Decodes the resource file at `path`.
    fn decode(&self, path: &Path, keep_source_data: bool) -> Result<Box<dyn Resource>>;

    /// Writes `resource` to `path`, replacing any existing file.
    fn encode(&self, path: &Path, resource: &dyn Resource) -> Result<()>;
}
