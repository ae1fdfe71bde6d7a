use std::collections::VecDeque;
use std::env;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, ThreadId};

use smallvec::SmallVec;
use uuid::Uuid;

use super::codec::{Resource, ResourceCodec};
use super::handle::{RefCounts, ResourceHandle, ResourceId, ResourceState, WeakResourceHandle};
use super::listener::{ResourceListeners, ResourceObserver};
use super::manifest::{self, ManifestResolver, ResourceManifest};
use super::params::{LoadFlags, ResourceParams};
use crate::errors::*;
use crate::sched::{self, Dispatcher};
use crate::utils::hash::{FastHashMap, FastHashSet};
use crate::utils::object_pool::ObjectPool;
use crate::utils::path;

/// `Resources` loads, caches and tracks the lifetime of resources.
///
/// Every load request returns a `ResourceHandle` immediately, even if the resource could
/// not be found. Concurrent requests of the same UUID converge on one decode, and a
/// resource is only considered loaded once all of its dependencies have finished
/// loading too.
///
/// Resources stay loaded until they are destroyed explicitly, released, or collected
/// by `unload_all_unused` once nothing but the internal references keep them.
pub struct Resources {
    inner: Arc<Inner>,
}

impl Resources {
    /// Creates a new `Resources`, decoding files with `codec` and running asynchronous
    /// loads on `dispatcher`.
    pub fn new(
        params: ResourceParams,
        codec: Arc<dyn ResourceCodec>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let cwd = env::current_dir()?;
        let working_dir = match params.working_dir {
            Some(dir) => path::absolute(&cwd, dir),
            None => cwd,
        };

        let default = match params.default_manifest {
            Some(file) => {
                let file = path::absolute(&working_dir, file);
                if file.is_file() {
                    info!("Loads default manifest from {:?}.", file);
                    ResourceManifest::load(&file, Some(&working_dir))?.with_name(manifest::DEFAULT)
                } else {
                    ResourceManifest::new(manifest::DEFAULT)
                }
            }
            None => ResourceManifest::new(manifest::DEFAULT),
        };

        let inner = Inner {
            working_dir,
            manifests: ManifestResolver::new(default),
            codec,
            dispatcher,
            listeners: Arc::new(ResourceListeners::new()),
            observers: RwLock::new(Vec::new()),
            in_flight: Mutex::new(InFlight::default()),
            finished: Condvar::new(),
            registry: Mutex::new(Registry::default()),
            destroy_lock: Mutex::new(()),
        };

        Ok(Resources {
            inner: Arc::new(inner),
        })
    }

    /// The directory that relative paths are resolved against.
    #[inline]
    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    /// Loads the resource at `path` synchronously, along with its dependencies.
    ///
    /// A missing file is not an error, the returned handle ends up in `ResourceState::Err`.
    /// Errors are returned only if the file exists but could not be decoded.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<ResourceHandle> {
        self.load_with(path, LoadFlags::default())
    }

    pub fn load_with<P: AsRef<Path>>(&self, path: P, flags: LoadFlags) -> Result<ResourceHandle> {
        let (uuid, file) = self.inner.resolve(path);
        into_result(self.inner.load(uuid, Some(file), true, flags))
    }

    /// Loads the resource at `path` on the dispatcher. The returned handle becomes ready
    /// once the resource and its dependencies are loaded.
    pub fn load_async<P: AsRef<Path>>(&self, path: P) -> ResourceHandle {
        self.load_async_with(path, LoadFlags::default())
    }

    pub fn load_async_with<P: AsRef<Path>>(&self, path: P, flags: LoadFlags) -> ResourceHandle {
        let (uuid, file) = self.inner.resolve(path);
        logged(self.inner.load(uuid, Some(file), false, flags))
    }

    /// Loads the resource registered as `uuid` in the manifests.
    pub fn load_from_uuid(
        &self,
        uuid: Uuid,
        asynchronous: bool,
        flags: LoadFlags,
    ) -> Result<ResourceHandle> {
        let file = self.inner.manifests.uuid_to_path(uuid);
        let result = self.inner.load(uuid, file, !asynchronous, flags);

        if asynchronous {
            Ok(logged(result))
        } else {
            into_result(result)
        }
    }

    /// Loads the resource referenced by `handle` synchronously.
    pub fn load_handle(
        &self,
        handle: &WeakResourceHandle,
        flags: LoadFlags,
    ) -> Result<ResourceHandle> {
        self.load_from_uuid(handle.uuid(), false, flags)
    }

    /// Blocks current thread until the pending load of `handle` (and its dependencies)
    /// completes, successfully or not.
    pub fn block_until_loaded(&self, handle: &ResourceHandle) {
        self.inner.block_until_finished(handle.uuid());
    }

    /// Removes an internal reference of a loaded resource, and destroys it if nothing
    /// else refers to it. Waits for the pending load of `handle` first.
    pub fn release(&self, handle: ResourceHandle) {
        let (id, uuid) = (handle.id(), handle.uuid());
        self.inner.block_until_finished(uuid);

        {
            let registry = self.inner.registry.lock().unwrap();
            if !registry.slots.is_alive(id) || !registry.loaded.contains(&uuid) {
                return;
            }

            if handle.internal_ref_count() > 0 {
                handle.counts().remove_internal_ref();
            }

            if handle.ref_count() > 1 {
                return;
            }
        }

        // Loads racing with the release keep the resource alive.
        drop(handle);
        self.inner.destroy(id, uuid, Slot::is_unreferenced);
    }

    /// Destroys all the resources that are referenced internally only. Resources that
    /// become unused by destroying others are destroyed as well.
    pub fn unload_all_unused(&self) {
        loop {
            let unused = self.inner.collect(Slot::is_unused);
            if unused.is_empty() {
                return;
            }

            for (id, uuid) in unused {
                self.inner.destroy(id, uuid, Slot::is_unused);
            }
        }
    }

    /// Destroys every resource, regardless of its references.
    pub fn unload_all(&self) {
        self.inner.unload_all();
    }

    /// Destroys the resource of `handle`, waiting for its pending load first. The
    /// observers are notified before it goes away. Destroying a destroyed resource
    /// does nothing.
    pub fn destroy(&self, handle: &ResourceHandle) {
        self.inner.destroy(handle.id(), handle.uuid(), |_, _| true);
    }

    /// Saves the resource of `handle` to `path`, and registers the path in the default
    /// manifest.
    pub fn save<P: AsRef<Path>>(&self, handle: &ResourceHandle, path: P, overwrite: bool) -> Result<()> {
        let resource = self
            .get(handle)
            .ok_or_else(|| Error::NotLoaded(handle.uuid()))?;

        let file = path::absolute(&self.inner.working_dir, path);
        if !overwrite && self.inner.codec.exists(&file) {
            warn!("Another file exists at {:?}. Not saving.", file);
            return Err(Error::AlreadyExists(file));
        }

        self.inner
            .manifests
            .default_manifest()
            .register_resource(handle.uuid(), file.clone());

        self.inner.codec.encode(&file, &*resource)?;
        info!("Saved resource {} to {:?}.", handle.uuid(), file);
        Ok(())
    }

    /// Saves the resource of `handle` to the path it is registered with, overwriting
    /// the existing file.
    pub fn save_in_place(&self, handle: &ResourceHandle) -> Result<()> {
        let file = self
            .file_path_from_uuid(handle.uuid())
            .ok_or_else(|| Error::UuidNotFound(handle.uuid()))?;

        self.save(handle, file, true)
    }

    /// Replaces the payload of `handle`, and notifies the observers and listeners.
    pub fn update(&self, handle: &ResourceHandle, resource: Box<dyn Resource>) {
        let prev = {
            let mut registry = self.inner.registry.lock().unwrap();
            let prev = match registry.slots.get_mut(handle.id()) {
                Some(slot) => {
                    slot.state = ResourceState::Ok;
                    mem::replace(&mut slot.payload, Some(Arc::from(resource)))
                }
                None => return,
            };

            registry.loaded.insert(handle.uuid());
            prev
        };

        drop(prev);

        for v in self.inner.observers() {
            v.on_modified(handle);
        }

        self.inner.listeners.notify_listeners(handle.uuid());
    }

    /// Returns the dependencies declared in the resource file at `path`.
    pub fn get_dependencies<P: AsRef<Path>>(&self, path: P) -> Vec<Uuid> {
        let file = path::absolute(&self.inner.working_dir, path);
        if !self.inner.codec.exists(&file) {
            warn!("Cannot read dependencies. Specified file {:?} doesn't exist.", file);
            return Vec::new();
        }

        match self.inner.codec.decode_header(&file) {
            Ok(header) => header.dependencies,
            Err(err) => {
                error!("Cannot read dependencies of {:?}. {}", file, err);
                Vec::new()
            }
        }
    }

    /// Returns true if the resource is loaded. With `check_in_progress`, resources that
    /// are still loading count as loaded.
    pub fn is_loaded(&self, uuid: Uuid, check_in_progress: bool) -> bool {
        let in_flight = self.inner.in_flight.lock().unwrap();
        if check_in_progress && in_flight.entries.contains_key(&uuid) {
            return true;
        }

        self.inner.registry.lock().unwrap().loaded.contains(&uuid)
    }

    /// Returns the progress of the pending load of `handle`, in range `[0, 1]`.
    pub fn load_progress(&self, handle: &ResourceHandle, include_dependencies: bool) -> f32 {
        let in_flight = self.inner.in_flight.lock().unwrap();
        let entry = match in_flight.entries.get(&handle.uuid()) {
            Some(entry) => entry,
            None => return 1.0,
        };

        let pending = match entry.outcome {
            Outcome::Pending => 1,
            _ => 0,
        };

        if !include_dependencies {
            return (1 - pending) as f32;
        }

        let dependencies = entry.total - entry.remaining.saturating_sub(pending).min(entry.total);
        (1 - pending + dependencies) as f32 / (1 + entry.total) as f32
    }

    /// Registers an in-memory resource as loaded. A random UUID is assigned if `uuid` is
    /// none.
    pub fn create_handle(&self, resource: Box<dyn Resource>, uuid: Option<Uuid>) -> ResourceHandle {
        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        let mut registry = self.inner.registry.lock().unwrap();
        let handle = registry.acquire(uuid);

        if let Some(slot) = registry.slots.get_mut(handle.id()) {
            slot.payload = Some(Arc::from(resource));
            slot.state = ResourceState::Ok;
        }

        registry.loaded.insert(uuid);
        handle
    }

    /// Returns the handle of `uuid`, creating an empty one if it does not exist yet.
    pub fn get_handle(&self, uuid: Uuid) -> ResourceHandle {
        self.inner.registry.lock().unwrap().acquire(uuid)
    }

    /// Upgrades a weak handle. Returns none if the resource has been destroyed.
    pub fn lock(&self, handle: &WeakResourceHandle) -> Option<ResourceHandle> {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .slots
            .get(handle.id())
            .filter(|slot| slot.uuid == handle.uuid())
            .map(|slot| ResourceHandle::new(handle.id(), slot.uuid, slot.counts.clone()))
    }

    /// Returns the payload of `handle` if it is loaded.
    pub fn get(&self, handle: &ResourceHandle) -> Option<Arc<dyn Resource>> {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .slots
            .get(handle.id())
            .and_then(|slot| slot.payload.clone())
    }

    /// Returns the payload of `handle` if it is loaded and of type `T`.
    pub fn get_as<T: Resource>(&self, handle: &ResourceHandle) -> Option<Arc<T>> {
        self.get(handle).and_then(|v| v.downcast_arc::<T>())
    }

    pub fn state(&self, handle: &ResourceHandle) -> ResourceState {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .slots
            .get(handle.id())
            .map(|slot| slot.state)
            .unwrap_or(ResourceState::Err)
    }

    /// Subscribes `observer` to the lifetime events of all resources.
    pub fn subscribe(&self, observer: Arc<dyn ResourceObserver>) {
        self.inner.observers.write().unwrap().push(observer);
    }

    /// The registry of the listeners notified when resources finish loading.
    #[inline]
    pub fn listeners(&self) -> &Arc<ResourceListeners> {
        &self.inner.listeners
    }

    /// Dispatches the listener notifications of the loads completed asynchronously since
    /// last call. Should be called regularly by the host, e.g. once per frame.
    pub fn advance(&self) {
        self.inner.listeners.update();
    }

    /// Registers a manifest that takes priority over the ones registered before.
    pub fn register_manifest(&self, manifest: Arc<ResourceManifest>) {
        info!("Registers manifest {}.", manifest.name());
        self.inner.manifests.register(manifest);
    }

    pub fn unregister_manifest(&self, name: &str) {
        info!("Unregisters manifest {}.", name);
        self.inner.manifests.unregister(name);
    }

    pub fn get_manifest(&self, name: &str) -> Option<Arc<ResourceManifest>> {
        self.inner.manifests.get(name)
    }

    pub fn default_manifest(&self) -> Arc<ResourceManifest> {
        self.inner.manifests.default_manifest()
    }

    pub fn file_path_from_uuid(&self, uuid: Uuid) -> Option<PathBuf> {
        self.inner.manifests.uuid_to_path(uuid)
    }

    pub fn uuid_from_file_path<P: AsRef<Path>>(&self, path: P) -> Option<Uuid> {
        let file = path::absolute(&self.inner.working_dir, path);
        self.inner.manifests.path_to_uuid(&file)
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.inner.unload_all();
    }
}

fn into_result((handle, err): (ResourceHandle, Option<Error>)) -> Result<ResourceHandle> {
    match err {
        Some(err) => Err(err),
        None => Ok(handle),
    }
}

fn logged((handle, err): (ResourceHandle, Option<Error>)) -> ResourceHandle {
    if let Some(err) = err {
        error!("Failed to load resource {}. {}", handle.uuid(), err);
    }

    handle
}

enum Outcome {
    Pending,
    Decoded(Arc<dyn Resource>),
    Failed,
    // Waits for the dependencies of a resource that has been loaded already.
    Relay,
}

struct LoadEntry {
    id: ResourceId,
    remaining: u32,
    total: u32,
    internal_refs: u32,
    dependencies: Vec<ResourceHandle>,
    notify_immediately: bool,
    outcome: Outcome,
}

impl LoadEntry {
    fn new(id: ResourceId, remaining: u32, notify_immediately: bool, outcome: Outcome) -> Self {
        LoadEntry {
            id,
            remaining,
            total: 0,
            internal_refs: 0,
            dependencies: Vec::new(),
            notify_immediately,
            outcome,
        }
    }
}

#[derive(Default)]
struct InFlight {
    entries: FastHashMap<Uuid, LoadEntry>,
    // Dependency -> the loads waiting on it.
    dependants: FastHashMap<Uuid, SmallVec<[Uuid; 4]>>,
    // Finished loads whose observers and listeners are still being notified, with the
    // threads notifying them.
    settling: FastHashMap<Uuid, SmallVec<[ThreadId; 2]>>,
}

impl InFlight {
    /// Returns true if `uuid` is loading, or if a thread other than `current` is still
    /// notifying its completion.
    fn is_busy(&self, uuid: Uuid, current: ThreadId) -> bool {
        if self.entries.contains_key(&uuid) {
            return true;
        }

        self.settling
            .get(&uuid)
            .map(|v| v.iter().any(|&t| t != current))
            .unwrap_or(false)
    }

    /// Returns true if `waiter` is waiting on `target`, directly or transitively.
    fn is_waiting_on(&self, waiter: Uuid, target: Uuid) -> bool {
        let mut visited = FastHashSet::default();
        let mut stack = vec![target];

        while let Some(v) = stack.pop() {
            if let Some(dependants) = self.dependants.get(&v) {
                for &d in dependants.iter() {
                    if d == waiter {
                        return true;
                    }

                    if visited.insert(d) {
                        stack.push(d);
                    }
                }
            }
        }

        false
    }

    /// Makes the load of `parent` wait on `dependencies`, and returns the ones that
    /// should be requested.
    fn register_dependencies(&mut self, parent: Uuid, dependencies: &[Uuid]) -> Vec<Uuid> {
        let mut requests: Vec<Uuid> = Vec::with_capacity(dependencies.len());

        for &dep in dependencies {
            if dep == parent || requests.contains(&dep) {
                continue;
            }

            let registered = self
                .dependants
                .get(&dep)
                .map(|v| v.contains(&parent))
                .unwrap_or(false);

            if !registered {
                if self.is_waiting_on(dep, parent) {
                    warn!(
                        "Dependency cycle between resource {} and {}, the edge is ignored.",
                        parent, dep
                    );
                    continue;
                }

                self.dependants
                    .entry(dep)
                    .or_insert_with(SmallVec::new)
                    .push(parent);

                if let Some(entry) = self.entries.get_mut(&parent) {
                    entry.remaining += 1;
                    entry.total += 1;
                }
            }

            requests.push(dep);
        }

        requests
    }
}

struct Slot {
    uuid: Uuid,
    counts: Arc<RefCounts>,
    state: ResourceState,
    payload: Option<Arc<dyn Resource>>,
    // Keeps the dependencies alive for as long as this resource is.
    dependencies: Vec<ResourceHandle>,
}

impl Slot {
    /// Returns true if nothing but the internal references keep this slot.
    fn is_unused(&self, loaded: bool) -> bool {
        if loaded {
            self.counts.refs() == self.counts.internal_refs()
        } else {
            self.counts.refs() == 0
        }
    }

    /// Returns true if no handle refers to this slot at all.
    fn is_unreferenced(&self, _: bool) -> bool {
        self.counts.refs() == 0
    }
}

#[derive(Default)]
struct Registry {
    slots: ObjectPool<ResourceId, Slot>,
    handles: FastHashMap<Uuid, ResourceId>,
    loaded: FastHashSet<Uuid>,
}

impl Registry {
    /// Returns the handle of `uuid`, creating an empty slot if there is none.
    fn acquire(&mut self, uuid: Uuid) -> ResourceHandle {
        if let Some(&id) = self.handles.get(&uuid) {
            if let Some(slot) = self.slots.get(id) {
                return ResourceHandle::new(id, uuid, slot.counts.clone());
            }
        }

        let counts = Arc::new(RefCounts::default());
        let id = self.slots.create(Slot {
            uuid,
            counts: counts.clone(),
            state: ResourceState::NotReady,
            payload: None,
            dependencies: Vec::new(),
        });

        self.handles.insert(uuid, id);
        ResourceHandle::new(id, uuid, counts)
    }

    fn finalize(&mut self, uuid: Uuid, entry: LoadEntry) -> Option<Finished> {
        let slot = self.slots.get_mut(entry.id)?;
        let handle = ResourceHandle::new(entry.id, uuid, slot.counts.clone());

        let loaded = match entry.outcome {
            Outcome::Decoded(payload) => {
                slot.payload = Some(payload);
                slot.state = ResourceState::Ok;
                slot.dependencies = entry.dependencies;
                true
            }
            Outcome::Relay => {
                slot.dependencies.extend(entry.dependencies);
                slot.dependencies.sort_by_key(|v| v.id());
                slot.dependencies.dedup_by_key(|v| v.id());
                false
            }
            Outcome::Failed | Outcome::Pending => {
                slot.state = ResourceState::Err;
                for _ in 0..entry.internal_refs {
                    slot.counts.remove_internal_ref();
                }

                false
            }
        };

        if loaded {
            self.loaded.insert(uuid);
        }

        Some(Finished {
            handle,
            loaded,
            notify_immediately: entry.notify_immediately,
        })
    }
}

struct Finished {
    handle: ResourceHandle,
    loaded: bool,
    notify_immediately: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    New,
    InFlight,
    Loaded,
}

struct Inner {
    working_dir: PathBuf,
    manifests: ManifestResolver,
    codec: Arc<dyn ResourceCodec>,
    dispatcher: Arc<dyn Dispatcher>,
    listeners: Arc<ResourceListeners>,
    observers: RwLock<Vec<Arc<dyn ResourceObserver>>>,

    // Lock order: `in_flight` before `registry`.
    in_flight: Mutex<InFlight>,
    finished: Condvar,
    registry: Mutex<Registry>,
    destroy_lock: Mutex<()>,
}

impl Inner {
    fn observers(&self) -> Vec<Arc<dyn ResourceObserver>> {
        self.observers.read().unwrap().clone()
    }

    /// Resolves `path` into an absolute file path and its UUID. Existing files that no
    /// manifest knows are registered into the default manifest.
    fn resolve<P: AsRef<Path>>(&self, path: P) -> (Uuid, PathBuf) {
        let file = path::absolute(&self.working_dir, path);
        let uuid = match self.manifests.path_to_uuid(&file) {
            Some(uuid) => uuid,
            None if self.codec.exists(&file) => self
                .manifests
                .default_manifest()
                .register_resource_if_absent(Uuid::new_v4(), &file),
            None => Uuid::new_v4(),
        };

        (uuid, file)
    }

    fn load(
        self: &Arc<Self>,
        uuid: Uuid,
        file: Option<PathBuf>,
        synchronous: bool,
        flags: LoadFlags,
    ) -> (ResourceHandle, Option<Error>) {
        let (handle, status) = self.begin(uuid, synchronous, flags);

        let file = match file {
            Some(file) => {
                if self.codec.exists(&file) {
                    Some(file)
                } else {
                    warn!("Cannot load resource. Specified file {:?} doesn't exist.", file);
                    None
                }
            }
            None => {
                if status == Status::New {
                    warn!("Cannot load resource. Resource with UUID {} doesn't exist.", uuid);
                }

                None
            }
        };

        let file = match file {
            Some(file) => file,
            None => {
                match status {
                    // Completes the load, so the loads waiting on this one are not stuck.
                    Status::New => self.finish_decode(uuid, Outcome::Failed),
                    Status::Loaded => self.load_complete(uuid),
                    // The pending load read the file before it went away, or reports
                    // the failure itself.
                    Status::InFlight => {
                        warn!("Resource {} is loading while its file is missing.", uuid)
                    }
                }

                if synchronous {
                    self.block_until_finished(uuid);
                }

                return (handle, None);
            }
        };

        let header = if status == Status::New || flags.load_dependencies {
            match self.codec.decode_header(&file) {
                Ok(header) => Some(header),
                Err(err) => {
                    if status == Status::New {
                        self.finish_decode(uuid, Outcome::Failed);
                        return (handle, Some(err));
                    }

                    warn!("Cannot read dependencies of {:?}. {}", file, err);
                    None
                }
            }
        } else {
            None
        };

        if flags.load_dependencies {
            let dependencies = header
                .as_ref()
                .map(|v| v.dependencies.as_slice())
                .unwrap_or(&[]);

            self.load_dependencies(&handle, dependencies, synchronous, flags);
        }

        let mut error = None;
        match (status, header) {
            (Status::New, Some(header)) => {
                if synchronous || !header.allow_async_loading {
                    error = self.decode(uuid, &file, flags.keep_source_data).err();
                } else {
                    let name = format!(
                        "Resource load: {}",
                        file.file_name()
                            .map(|v| v.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    );

                    let inner = self.clone();
                    let keep_source_data = flags.keep_source_data;
                    self.dispatcher.submit(
                        &name,
                        Box::new(move || {
                            if let Err(err) = inner.decode(uuid, &file, keep_source_data) {
                                error!("Failed to load resource {:?}. {}", file, err);
                            }
                        }),
                    );
                }
            }
            // Relays the completion to the loads waiting on this one, unless it is still
            // in progress.
            _ => self.load_complete(uuid),
        }

        if synchronous {
            self.block_until_finished(uuid);
        }

        (handle, error)
    }

    /// Checks the in-flight table, the loaded table and the handle registry as one atomic
    /// step, and registers a new load if the resource is neither loading nor loaded.
    fn begin(&self, uuid: Uuid, synchronous: bool, flags: LoadFlags) -> (ResourceHandle, Status) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut registry = self.registry.lock().unwrap();
        let handle = registry.acquire(uuid);

        if let Some(entry) = in_flight.entries.get_mut(&uuid) {
            entry.notify_immediately |= synchronous;
            if flags.keep_internal_ref {
                entry.internal_refs += 1;
                handle.counts().add_internal_ref();
            }

            return (handle, Status::InFlight);
        }

        if registry.loaded.contains(&uuid) {
            if flags.keep_internal_ref {
                handle.counts().add_internal_ref();
            }

            return (handle, Status::Loaded);
        }

        if let Some(slot) = registry.slots.get_mut(handle.id()) {
            slot.state = ResourceState::NotReady;
        }

        let mut entry = LoadEntry::new(handle.id(), 1, synchronous, Outcome::Pending);
        if flags.keep_internal_ref {
            entry.internal_refs = 1;
            handle.counts().add_internal_ref();
        }

        in_flight.entries.insert(uuid, entry);
        trace!("Starts loading resource {}.", uuid);
        (handle, Status::New)
    }

    fn load_dependencies(
        self: &Arc<Self>,
        handle: &ResourceHandle,
        dependencies: &[Uuid],
        synchronous: bool,
        flags: LoadFlags,
    ) {
        if dependencies.is_empty() {
            return;
        }

        let uuid = handle.uuid();
        let requests = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.entries.contains_key(&uuid) {
                let entry = LoadEntry::new(handle.id(), 0, synchronous, Outcome::Relay);
                in_flight.entries.insert(uuid, entry);
            }

            in_flight.register_dependencies(uuid, dependencies)
        };

        let flags = flags.for_dependencies();
        let handles: Vec<_> = requests
            .into_iter()
            .map(|dep| {
                let file = self.manifests.uuid_to_path(dep);
                let (handle, err) = self.load(dep, file, synchronous, flags);
                if let Some(err) = err {
                    error!("Failed to load dependency {} of resource {}. {}", dep, uuid, err);
                }

                handle
            })
            .collect();

        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(entry) = in_flight.entries.get_mut(&uuid) {
            entry.dependencies.extend(handles);
        }
    }

    /// Decodes the payload of `uuid` and completes its load.
    fn decode(&self, uuid: Uuid, file: &Path, keep_source_data: bool) -> Result<()> {
        let result = match sched::halt_unwinding(|| self.codec.decode(file, keep_source_data)) {
            Ok(result) => result,
            Err(err) => Err(Error::Panicked(
                file.to_owned(),
                sched::panic_message(err.as_ref()),
            )),
        };

        match result {
            Ok(resource) => {
                self.finish_decode(uuid, Outcome::Decoded(Arc::from(resource)));
                Ok(())
            }
            Err(err) => {
                self.finish_decode(uuid, Outcome::Failed);
                Err(err)
            }
        }
    }

    fn finish_decode(&self, uuid: Uuid, outcome: Outcome) {
        let known = {
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.entries.get_mut(&uuid) {
                Some(entry) => {
                    debug_assert!(entry.remaining > 0);
                    entry.remaining = entry.remaining.saturating_sub(1);
                    entry.outcome = outcome;
                    true
                }
                None => false,
            }
        };

        debug_assert!(known, "resource {} is not loading.", uuid);
        if known {
            self.load_complete(uuid);
        }
    }

    /// Finalizes the load of `uuid` if nothing is pending, and propagates the completion
    /// to the loads waiting on it. If `uuid` is not loading, only the propagation happens.
    fn load_complete(&self, uuid: Uuid) {
        let current = thread::current().id();
        let mut finished = Vec::new();

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let mut registry = self.registry.lock().unwrap();
            let in_flight = &mut *in_flight;

            let mut queue = VecDeque::new();
            queue.push_back(uuid);

            while let Some(uuid) = queue.pop_front() {
                let pending = in_flight
                    .entries
                    .get(&uuid)
                    .map(|v| v.remaining > 0)
                    .unwrap_or(false);

                if pending {
                    continue;
                }

                if let Some(entry) = in_flight.entries.remove(&uuid) {
                    if let Some(v) = registry.finalize(uuid, entry) {
                        in_flight.settling.entry(uuid).or_default().push(current);
                        finished.push(v);
                    }
                }

                if let Some(dependants) = in_flight.dependants.remove(&uuid) {
                    for parent in dependants {
                        if let Some(entry) = in_flight.entries.get_mut(&parent) {
                            debug_assert!(entry.remaining > 0);
                            entry.remaining = entry.remaining.saturating_sub(1);
                            if entry.remaining == 0 {
                                queue.push_back(parent);
                            }
                        }
                    }
                }
            }
        }

        if finished.is_empty() {
            return;
        }

        let observers = self.observers();
        for v in &finished {
            let uuid = v.handle.uuid();
            if v.loaded {
                debug!("Resource {} is loaded.", uuid);
                for o in &observers {
                    o.on_loaded(&v.handle);
                }
            }

            if v.notify_immediately {
                self.listeners.notify_listeners(uuid);
            } else {
                self.listeners.mark_loaded(uuid);
            }
        }

        // Waiters only return once the completion has been announced.
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            for v in &finished {
                let uuid = v.handle.uuid();
                let empty = match in_flight.settling.get_mut(&uuid) {
                    Some(threads) => {
                        if let Some(i) = threads.iter().position(|&t| t == current) {
                            threads.swap_remove(i);
                        }

                        threads.is_empty()
                    }
                    None => false,
                };

                if empty {
                    in_flight.settling.remove(&uuid);
                }
            }
        }

        self.finished.notify_all();
    }

    /// Blocks until `uuid` is neither loading nor being announced by another thread.
    /// Observers and listeners running on this thread may load the resource again.
    fn block_until_finished(&self, uuid: Uuid) {
        let current = thread::current().id();
        let mut in_flight = self.in_flight.lock().unwrap();
        while in_flight.is_busy(uuid, current) {
            in_flight = self.finished.wait(in_flight).unwrap();
        }
    }

    /// Returns the slots that `predicate` accepts, it is called with the slot and whether
    /// the resource is loaded. Slots that are loading are skipped.
    fn collect<F>(&self, predicate: F) -> Vec<(ResourceId, Uuid)>
    where
        F: Fn(&Slot, bool) -> bool,
    {
        let in_flight = self.in_flight.lock().unwrap();
        let registry = self.registry.lock().unwrap();

        registry
            .slots
            .iter()
            .filter_map(|id| {
                let slot = registry.slots.get(id)?;
                if in_flight.entries.contains_key(&slot.uuid) {
                    return None;
                }

                if predicate(slot, registry.loaded.contains(&slot.uuid)) {
                    Some((id, slot.uuid))
                } else {
                    None
                }
            })
            .collect()
    }

    fn unload_all(&self) {
        loop {
            let all: Vec<_> = {
                let registry = self.registry.lock().unwrap();
                registry
                    .slots
                    .iter()
                    .filter_map(|id| registry.slots.get(id).map(|slot| (id, slot.uuid)))
                    .collect()
            };

            if all.is_empty() {
                return;
            }

            // Pending loads are waited for by `destroy`.
            for (id, uuid) in all {
                self.destroy(id, uuid, |_, _| true);
            }
        }
    }

    /// Destroys the slot `id` if `condition` accepts it. The condition is called with the
    /// slot and whether the resource is loaded, once before the observers are notified and
    /// once more in the same critical section that frees the slot.
    fn destroy<F>(&self, id: ResourceId, uuid: Uuid, condition: F)
    where
        F: Fn(&Slot, bool) -> bool,
    {
        let _guard = self.destroy_lock.lock().unwrap();
        self.block_until_finished(uuid);

        let handle = {
            let registry = self.registry.lock().unwrap();
            let loaded = registry.loaded.contains(&uuid);
            match registry.slots.get(id) {
                Some(slot) if !condition(slot, loaded) => return,
                Some(slot) if loaded => Some(ResourceHandle::new(id, uuid, slot.counts.clone())),
                Some(_) => None,
                None => return,
            }
        };

        if let Some(handle) = &handle {
            for v in self.observers() {
                v.on_destroyed(handle);
            }
        }

        // The handle handed to the observers must not count as a reference.
        drop(handle);

        let slot = {
            let in_flight = self.in_flight.lock().unwrap();
            let mut registry = self.registry.lock().unwrap();

            let loaded = registry.loaded.contains(&uuid);
            let kept = match registry.slots.get(id) {
                Some(slot) => in_flight.entries.contains_key(&uuid) || !condition(slot, loaded),
                None => return,
            };

            if kept {
                let handle = registry
                    .slots
                    .get(id)
                    .filter(|_| loaded)
                    .map(|slot| ResourceHandle::new(id, uuid, slot.counts.clone()));

                drop(registry);
                drop(in_flight);

                debug!("Resource {} is referenced again, skips destroying.", uuid);
                if let Some(handle) = handle {
                    for v in self.observers() {
                        v.on_loaded(&handle);
                    }
                }

                return;
            }

            registry.loaded.remove(&uuid);

            let slot = match registry.slots.free(id) {
                Some(slot) => slot,
                None => return,
            };

            if registry.handles.get(&uuid) == Some(&id) {
                registry.handles.remove(&uuid);
            }

            slot
        };

        slot.counts.clear_internal_refs();
        debug!("Resource {} is destroyed.", uuid);

        // The payload and the dependencies are dropped outside of the locks.
        drop(slot);
    }
}
