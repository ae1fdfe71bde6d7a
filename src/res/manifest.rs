//! Manifests map the UUIDs of resources to the files they are stored in, and back.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use inlinable_string::InlinableString;
use uuid::Uuid;

use crate::errors::*;
use crate::utils::hash::FastHashMap;
use crate::utils::path;

/// The name of the manifest that is always present and always queried last.
pub const DEFAULT: &str = "Default";

#[derive(Debug, Default)]
struct Entries {
    paths: FastHashMap<Uuid, PathBuf>,
    uuids: FastHashMap<PathBuf, Uuid>,
}

impl Entries {
    fn insert(&mut self, uuid: Uuid, file: PathBuf) {
        if let Some(prev) = self.paths.remove(&uuid) {
            self.uuids.remove(&prev);
        }

        if let Some(prev) = self.uuids.remove(&file) {
            self.paths.remove(&prev);
        }

        self.uuids.insert(file.clone(), uuid);
        self.paths.insert(uuid, file);
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    name: String,
    entries: Vec<ManifestFileEntry>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFileEntry {
    uuid: Uuid,
    path: PathBuf,
}

/// A named, bidirectional mapping between UUIDs and absolute file paths. A UUID maps
/// to one path and a path to one UUID; registering either side again replaces the
/// stale pair.
#[derive(Debug)]
pub struct ResourceManifest {
    name: InlinableString,
    entries: RwLock<Entries>,
}

impl ResourceManifest {
    pub fn new<T: Into<InlinableString>>(name: T) -> Self {
        ResourceManifest {
            name: name.into(),
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Renames this manifest.
    pub fn with_name<T: Into<InlinableString>>(mut self, name: T) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Binds `uuid` to the file at `path`.
    pub fn register_resource<P: Into<PathBuf>>(&self, uuid: Uuid, path: P) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(uuid, path.into());
    }

    /// Returns the UUID bound to `path`, or binds `uuid` to it if there is none yet. The
    /// lookup and the insertion happen atomically.
    pub fn register_resource_if_absent(&self, uuid: Uuid, path: &Path) -> Uuid {
        let mut entries = self.entries.write().unwrap();
        if let Some(&v) = entries.uuids.get(path) {
            return v;
        }

        entries.insert(uuid, path.to_owned());
        uuid
    }

    pub fn unregister_resource(&self, uuid: Uuid) {
        let mut entries = self.entries.write().unwrap();
        if let Some(file) = entries.paths.remove(&uuid) {
            entries.uuids.remove(&file);
        }
    }

    pub fn uuid_to_path(&self, uuid: Uuid) -> Option<PathBuf> {
        self.entries.read().unwrap().paths.get(&uuid).cloned()
    }

    pub fn path_to_uuid(&self, path: &Path) -> Option<Uuid> {
        self.entries.read().unwrap().uuids.get(path).cloned()
    }

    pub fn uuid_exists(&self, uuid: Uuid) -> bool {
        self.entries.read().unwrap().paths.contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes this manifest to `file` as JSON. Paths under `relative_to` are stored
    /// relative to it.
    pub fn save<P: AsRef<Path>>(&self, file: P, relative_to: Option<&Path>) -> Result<()> {
        let mut entries: Vec<_> = {
            let entries = self.entries.read().unwrap();
            entries
                .paths
                .iter()
                .map(|(&uuid, v)| {
                    let path = relative_to
                        .and_then(|root| path::relative_to(root, v))
                        .unwrap_or_else(|| v.clone());

                    ManifestFileEntry { uuid, path }
                })
                .collect()
        };

        entries.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));

        let manifest = ManifestFile {
            name: self.name().to_owned(),
            entries,
        };

        let writer = BufWriter::new(fs::File::create(file)?);
        serde_json::to_writer_pretty(writer, &manifest)?;
        Ok(())
    }

    /// Reads a manifest written by `save`. Relative paths are resolved against
    /// `relative_to`, or left untouched without it.
    pub fn load<P: AsRef<Path>>(file: P, relative_to: Option<&Path>) -> Result<Self> {
        let reader = BufReader::new(fs::File::open(file)?);
        let manifest: ManifestFile = serde_json::from_reader(reader)?;

        let mut entries = Entries::default();
        for v in manifest.entries {
            let file = match relative_to {
                Some(root) => path::absolute(root, &v.path),
                None => v.path,
            };

            entries.insert(v.uuid, file);
        }

        Ok(ResourceManifest {
            name: manifest.name.into(),
            entries: RwLock::new(entries),
        })
    }
}

/// An ordered set of manifests. Lookups iterate from the most recently registered
/// manifest to the oldest one, the `Default` manifest is always the last.
#[derive(Debug)]
pub struct ManifestResolver {
    manifests: RwLock<Vec<Arc<ResourceManifest>>>,
}

impl ManifestResolver {
    pub fn new(default: ResourceManifest) -> Self {
        ManifestResolver {
            manifests: RwLock::new(vec![Arc::new(default)]),
        }
    }

    /// Returns the `Default` manifest.
    pub fn default_manifest(&self) -> Arc<ResourceManifest> {
        self.manifests.read().unwrap()[0].clone()
    }

    /// Registers `manifest`, replacing a registered manifest with the same name. Manifests
    /// named `Default` are ignored.
    pub fn register(&self, manifest: Arc<ResourceManifest>) {
        if manifest.name() == DEFAULT {
            return;
        }

        let mut manifests = self.manifests.write().unwrap();
        match manifests.iter().position(|v| v.name() == manifest.name()) {
            Some(index) => manifests[index] = manifest,
            None => manifests.push(manifest),
        }
    }

    pub fn unregister(&self, name: &str) {
        if name == DEFAULT {
            return;
        }

        self.manifests.write().unwrap().retain(|v| v.name() != name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceManifest>> {
        self.manifests
            .read()
            .unwrap()
            .iter()
            .find(|v| v.name() == name)
            .cloned()
    }

    pub fn uuid_to_path(&self, uuid: Uuid) -> Option<PathBuf> {
        self.manifests
            .read()
            .unwrap()
            .iter()
            .rev()
            .filter_map(|v| v.uuid_to_path(uuid))
            .next()
    }

    pub fn path_to_uuid(&self, path: &Path) -> Option<Uuid> {
        self.manifests
            .read()
            .unwrap()
            .iter()
            .rev()
            .filter_map(|v| v.path_to_uuid(path))
            .next()
    }
}
