use std::path::PathBuf;

use uuid::Uuid;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "{}", _0)]
    IO(#[cause] ::std::io::Error),
    #[fail(display = "{}", _0)]
    Bincode(::bincode::Error),
    #[fail(display = "{}", _0)]
    Json(#[cause] ::serde_json::Error),
    #[fail(display = "Resource file {:?} is malformed: {}.", _0, _1)]
    Malformed(PathBuf, String),
    #[fail(display = "No loader has been registered for resource kind '{}'.", _0)]
    UnknownKind(String),
    #[fail(display = "Undefined UUID {}.", _0)]
    UuidNotFound(Uuid),
    #[fail(display = "Undefined Path {:?}.", _0)]
    FileNotFound(PathBuf),
    #[fail(display = "Another file exists at {:?}.", _0)]
    AlreadyExists(PathBuf),
    #[fail(display = "Resource {} is not loaded.", _0)]
    NotLoaded(Uuid),
    #[fail(display = "Decoding {:?} panicked: {}", _0, _1)]
    Panicked(PathBuf, String),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<::std::io::Error> for Error {
    fn from(err: ::std::io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<::bincode::Error> for Error {
    fn from(err: ::bincode::Error) -> Self {
        Error::Bincode(err)
    }
}

impl From<::serde_json::Error> for Error {
    fn from(err: ::serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl Error {
    /// Returns true if this error means the resource could not be located at all, rather than
    /// located but failed to decode.
    pub fn is_not_found(&self) -> bool {
        match *self {
            Error::UuidNotFound(_) | Error::FileNotFound(_) => true,
            Error::IO(ref err) => err.kind() == ::std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
