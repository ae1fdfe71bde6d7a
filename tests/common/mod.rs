#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use larder::prelude::*;
use larder::sched::Dispatcher;
use uuid::Uuid;

pub const ROOT: &str = "/mock";

pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// A resource produced by `MockCodec`.
#[derive(Debug)]
pub struct Mock {
    pub file: PathBuf,
    pub dependencies: Vec<Uuid>,
    pub allow_async_loading: bool,
    pub keep_source_data: bool,
}

impl Mock {
    pub fn new<P: Into<PathBuf>>(file: P) -> Self {
        Mock {
            file: file.into(),
            dependencies: Vec::new(),
            allow_async_loading: true,
            keep_source_data: false,
        }
    }
}

impl Resource for Mock {
    fn kind(&self) -> &'static str {
        "Mock"
    }

    fn dependencies(&self) -> Vec<Uuid> {
        self.dependencies.clone()
    }

    fn allow_async_loading(&self) -> bool {
        self.allow_async_loading
    }
}

/// How a file stored in `MockCodec` behaves when decoded.
#[derive(Debug, Clone, Default)]
pub struct MockFile {
    pub dependencies: Vec<Uuid>,
    pub sync_only: bool,
    pub corrupted: bool,
    pub panics: bool,
    pub delay: Option<Duration>,
}

impl MockFile {
    pub fn new() -> Self {
        MockFile::default()
    }

    pub fn depends_on(mut self, dependencies: &[Uuid]) -> Self {
        self.dependencies = dependencies.to_vec();
        self
    }

    pub fn sync_only(mut self) -> Self {
        self.sync_only = true;
        self
    }

    pub fn corrupted(mut self) -> Self {
        self.corrupted = true;
        self
    }

    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn delay(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }
}

#[derive(Debug, Default, Clone)]
struct Decoded {
    count: usize,
    threads: Vec<Option<String>>,
}

/// An in-memory file system that counts the decodes of every file.
#[derive(Default)]
pub struct MockCodec {
    files: RwLock<HashMap<PathBuf, MockFile>>,
    decoded: Mutex<HashMap<PathBuf, Decoded>>,
}

impl MockCodec {
    pub fn new() -> Arc<Self> {
        Arc::new(MockCodec::default())
    }

    pub fn insert<P: AsRef<Path>>(&self, path: P, file: MockFile) {
        self.files
            .write()
            .unwrap()
            .insert(Path::new(ROOT).join(path), file);
    }

    pub fn remove<P: AsRef<Path>>(&self, path: P) {
        self.files
            .write()
            .unwrap()
            .remove(&Path::new(ROOT).join(path));
    }

    /// Number of decodes of `path` that have been started.
    pub fn decodes<P: AsRef<Path>>(&self, path: P) -> usize {
        self.decoded
            .lock()
            .unwrap()
            .get(&Path::new(ROOT).join(path))
            .map(|v| v.count)
            .unwrap_or(0)
    }

    /// Names of the threads that decoded `path`.
    pub fn decoding_threads<P: AsRef<Path>>(&self, path: P) -> Vec<Option<String>> {
        self.decoded
            .lock()
            .unwrap()
            .get(&Path::new(ROOT).join(path))
            .map(|v| v.threads.clone())
            .unwrap_or_default()
    }

    fn file(&self, path: &Path) -> larder::errors::Result<MockFile> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(path.to_owned()))
    }
}

impl ResourceCodec for MockCodec {
    fn exists(&self, path: &Path) -> bool {
        self.files.read().unwrap().contains_key(path)
    }

    fn decode_header(&self, path: &Path) -> larder::errors::Result<ResourceHeader> {
        let file = self.file(path)?;
        Ok(ResourceHeader {
            kind: "Mock".to_owned(),
            dependencies: file.dependencies,
            allow_async_loading: !file.sync_only,
        })
    }

    fn decode(
        &self,
        path: &Path,
        keep_source_data: bool,
    ) -> larder::errors::Result<Box<dyn Resource>> {
        {
            let mut decoded = self.decoded.lock().unwrap();
            let v = decoded.entry(path.to_owned()).or_insert_with(Decoded::default);
            v.count += 1;
            v.threads
                .push(thread::current().name().map(|name| name.to_owned()));
        }

        let file = self.file(path)?;
        if let Some(delay) = file.delay {
            thread::sleep(delay);
        }

        if file.panics {
            panic!("mock decoder panicked on {:?}", path);
        }

        if file.corrupted {
            return Err(Error::Malformed(path.to_owned(), "corrupted".to_owned()));
        }

        Ok(Box::new(Mock {
            file: path.to_owned(),
            dependencies: file.dependencies,
            allow_async_loading: !file.sync_only,
            keep_source_data,
        }))
    }

    fn encode(&self, path: &Path, resource: &dyn Resource) -> larder::errors::Result<()> {
        let file = MockFile {
            dependencies: resource.dependencies(),
            sync_only: !resource.allow_async_loading(),
            ..MockFile::default()
        };

        self.files.write().unwrap().insert(path.to_owned(), file);
        Ok(())
    }
}

pub fn params() -> ResourceParams {
    ResourceParams {
        working_dir: Some(PathBuf::from(ROOT)),
        default_manifest: None,
    }
}

/// Creates a `Resources` that runs the asynchronous loads inline.
pub fn inline(codec: &Arc<MockCodec>) -> Resources {
    init_logger();
    Resources::new(params(), codec.clone(), Arc::new(InlineDispatcher)).unwrap()
}

/// Creates a `Resources` backed by a pool of worker threads.
pub fn threaded(codec: &Arc<MockCodec>) -> Resources {
    init_logger();
    let sched: Arc<dyn Dispatcher> = Arc::new(SchedulerSystem::new(SchedParams::default()).unwrap());
    Resources::new(params(), codec.clone(), sched).unwrap()
}

/// Binds `uuid` to `path` under the mock root in the default manifest.
pub fn register<P: AsRef<Path>>(resources: &Resources, path: P) -> Uuid {
    let uuid = Uuid::new_v4();
    resources
        .default_manifest()
        .register_resource(uuid, Path::new(ROOT).join(path));
    uuid
}

/// Spins until `cond` holds, or panics after a few seconds.
pub fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out.");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Records the lifetime events it observes, in order.
#[derive(Default)]
pub struct Recorder {
    pub loaded: Mutex<Vec<Uuid>>,
    pub destroyed: Mutex<Vec<Uuid>>,
    pub modified: Mutex<Vec<Uuid>>,
}

impl Recorder {
    pub fn loaded(&self) -> Vec<Uuid> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<Uuid> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn modified(&self) -> Vec<Uuid> {
        self.modified.lock().unwrap().clone()
    }
}

impl ResourceObserver for Recorder {
    fn on_loaded(&self, handle: &ResourceHandle) {
        self.loaded.lock().unwrap().push(handle.uuid());
    }

    fn on_destroyed(&self, handle: &ResourceHandle) {
        self.destroyed.lock().unwrap().push(handle.uuid());
    }

    fn on_modified(&self, handle: &ResourceHandle) {
        self.modified.lock().unwrap().push(handle.uuid());
    }
}
