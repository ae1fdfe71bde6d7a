//! # What is This?
//!
//! _larder_ is the resource-loading core extracted from a small game framework. It loads,
//! caches, tracks the dependencies of and manages the lifetime of typed resources (meshes,
//! textures, shaders, or anything else implementing `Resource`), which are identified by a
//! stable UUID and located through layered manifests.
//!
//! Resources could be loaded synchronously on the calling thread, or asynchronously on the
//! worker threads provided by the `sched` module. Concurrent requests for the same UUID always
//! converge on one decode, and a resource is only reported as loaded after all of its
//! dependencies have finished loading.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use larder::prelude::*;
//!
//! let sched = Arc::new(SchedulerSystem::new(SchedParams::default())?);
//! let codec = Arc::new(FileCodec::new().with_loader(BytesLoader));
//! let resources = Resources::new(ResourceParams::default(), codec, sched.clone())?;
//!
//! let handle = resources.load("assets/crate.bytes")?;
//! let bytes = resources.get_as::<Bytes>(&handle);
//! ```

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod utils;
pub mod errors;
pub mod res;
pub mod sched;

pub mod prelude {
    pub use crate::errors::{Error, Result};
    pub use crate::res::prelude::*;
    pub use crate::sched::prelude::*;
}
