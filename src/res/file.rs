//! The built-in on-disk container of resources.
//!
//! A resource file starts with a magic number, followed by the bincode encoded
//! `ResourceHeader` and the payload, each prefixed with its length:
//!
//! ```sh
//! MAGIC[8] | u32 header length | header | u32 payload length | payload
//! ```
//!
//! Lengths are little-endian. The payload is produced and consumed by the
//! `ResourceLoader` registered for the kind of resource.

use std::convert::TryFrom;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::codec::{Resource, ResourceCodec, ResourceHeader};
use crate::errors::*;
use crate::utils::hash::FastHashMap;

pub const MAGIC: [u8; 8] = [
    b'L', b'R', b'D', b'R', b' ', 0, 0, 1,
];

/// Decodes and encodes the payload of one kind of resources.
pub trait ResourceLoader: Send + Sync + 'static {
    /// The kind of resources handled by this loader, see `Resource::kind`.
    fn kind(&self) -> &'static str;

    fn decode(
        &self,
        header: &ResourceHeader,
        payload: Vec<u8>,
        keep_source_data: bool,
    ) -> Result<Box<dyn Resource>>;

    fn encode(&self, resource: &dyn Resource) -> Result<Vec<u8>>;
}

/// A `ResourceCodec` that stores resources in local files.
#[derive(Default, Clone)]
pub struct FileCodec {
    loaders: FastHashMap<&'static str, Arc<dyn ResourceLoader>>,
}

impl FileCodec {
    pub fn new() -> Self {
        FileCodec::default()
    }

    /// Registers a loader, replacing the one of the same kind.
    pub fn with_loader<T: ResourceLoader>(mut self, loader: T) -> Self {
        self.register(loader);
        self
    }

    pub fn register<T: ResourceLoader>(&mut self, loader: T) {
        self.loaders.insert(loader.kind(), Arc::new(loader));
    }

    fn loader(&self, kind: &str) -> Result<&Arc<dyn ResourceLoader>> {
        self.loaders
            .get(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_owned()))
    }

    fn read_header<R: Read>(path: &Path, file: &mut R) -> Result<ResourceHeader> {
        let mut buf = [0; 8];
        file.read_exact(&mut buf).map_err(|err| malformed(path, err))?;

        // MAGIC: [u8; 8]
        if buf != MAGIC {
            return Err(Error::Malformed(
                path.to_owned(),
                "MAGIC number not match".to_owned(),
            ));
        }

        let bytes = read_chunk(path, file)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

impl ResourceCodec for FileCodec {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn decode_header(&self, path: &Path) -> Result<ResourceHeader> {
        let mut file = BufReader::new(fs::File::open(path)?);
        FileCodec::read_header(path, &mut file)
    }

    fn decode(&self, path: &Path, keep_source_data: bool) -> Result<Box<dyn Resource>> {
        let mut file = BufReader::new(fs::File::open(path)?);
        let header = FileCodec::read_header(path, &mut file)?;
        let payload = read_chunk(path, &mut file)?;
        self.loader(&header.kind)?
            .decode(&header, payload, keep_source_data)
    }

    fn encode(&self, path: &Path, resource: &dyn Resource) -> Result<()> {
        let header = ResourceHeader::new(resource);
        let payload = self.loader(&header.kind)?.encode(resource)?;
        let header = bincode::serialize(&header)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Writes into a sibling first, so a failure never truncates the existing file.
        let tmp = temporary_path(path);
        let result = (|| -> Result<()> {
            let mut file = BufWriter::new(fs::File::create(&tmp)?);
            file.write_all(&MAGIC)?;
            write_chunk(path, &mut file, &header)?;
            write_chunk(path, &mut file, &payload)?;
            file.flush()?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(fs::rename(&tmp, path)?),
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                Err(err)
            }
        }
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or_default();

    path.with_file_name(format!(".{}.tmp", name))
}

fn malformed(path: &Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Malformed(path.to_owned(), "unexpected end of file".to_owned())
    } else {
        Error::IO(err)
    }
}

fn read_chunk<R: Read>(path: &Path, file: &mut R) -> Result<Vec<u8>> {
    let len = file
        .read_u32::<LittleEndian>()
        .map_err(|err| malformed(path, err))?;

    let mut bytes = Vec::new();
    file.by_ref()
        .take(u64::from(len))
        .read_to_end(&mut bytes)
        .map_err(|err| malformed(path, err))?;

    if bytes.len() != len as usize {
        return Err(malformed(path, io::ErrorKind::UnexpectedEof.into()));
    }

    Ok(bytes)
}

fn chunk_len(path: &Path, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        let message = format!("chunk of {} bytes does not fit in a container", len);
        Error::Malformed(path.to_owned(), message)
    })
}

fn write_chunk<W: Write>(path: &Path, file: &mut W, bytes: &[u8]) -> Result<()> {
    file.write_u32::<LittleEndian>(chunk_len(path, bytes.len())?)?;
    file.write_all(bytes)?;
    Ok(())
}
