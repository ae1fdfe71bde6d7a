//! The `Resources` loads, caches, tracks the dependencies of and manages the lifetime of
//! typed resources.
//!
//! # Resource
//!
//! A _resource_ is a abstraction of some `piece of data` that are fully prepared for using
//! at runtime, such like meshes, textures or shaders. Any type implementing `Resource`
//! could be managed, and a `ResourceCodec` decides how they are read from and written to
//! the file system. The built-in `FileCodec` stores them in a simple container, with the
//! payload encoded by a `ResourceLoader` registered per kind of resource.
//!
//! ## UUID
//!
//! Every resource is identified by an universal-uniqued id (UUID), which is stable across
//! saves and loads. A resource loaded from a path that is not known yet is assigned a
//! random UUID.
//!
//! ## Manifest
//!
//! A `ResourceManifest` maps UUIDs to the files they are stored in, and back. Multiple
//! manifests could be registered; lookups iterate from the most recently registered one
//! to the oldest, and the built-in `Default` manifest is always queried last since it
//! might contain stale entries.
//!
//! # Dependencies
//!
//! A resource file declares the UUIDs of the resources it depends on in its header. They
//! are loaded along with it, and the resource is only reported as loaded once all of them
//! have finished loading, successfully or not. A dependency that fails to load never
//! aborts the load of the resources depending on it.
//!
//! # Handle
//!
//! A `ResourceHandle` refers to a resource safely, even if it is still loading on a
//! worker thread or has been destroyed already. Handles are reference counted, and the
//! references held by `Resources` itself (internal references) are told apart from the
//! ones held by users, so resources that nobody else uses could be collected with
//! `unload_all_unused`.
//!
//! ```rust,ignore
//! let handle = resources.load_async("textures/crate.bytes");
//! resources.block_until_loaded(&handle);
//!
//! if let Some(bytes) = resources.get_as::<Bytes>(&handle) {
//!     println!("{} bytes", bytes.data().len());
//! }
//! ```

pub mod bytes;
pub mod codec;
pub mod ctx;
pub mod file;
pub mod handle;
pub mod listener;
pub mod manifest;
pub mod params;
pub mod resources;

pub mod prelude {
    pub use super::bytes::{Bytes, BytesLoader};
    pub use super::codec::{Resource, ResourceCodec, ResourceHeader};
    pub use super::file::{FileCodec, ResourceLoader};
    pub use super::handle::{ResourceHandle, ResourceId, ResourceState, WeakResourceHandle};
    pub use super::listener::{ResourceListener, ResourceListeners, ResourceObserver};
    pub use super::manifest::ResourceManifest;
    pub use super::params::{LoadFlags, ResourceParams};
    pub use super::resources::Resources;
}
