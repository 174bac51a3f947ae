use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Serialization(String),
    InvalidHeader,
    ChecksumMismatch,
    MutexPoisoned,
    LockError(io::Error),
    // Configuration
    InvalidConfig(String),
    UnknownAttributeValue { attribute: String, value: String },
    MissingAttribute(String),
    UnknownBuffer(String),
    SizeMismatch { expected: usize, actual: usize },
    // State contract
    AlreadyOpen(String),
    NotOpen(String),
    StillOpen(String),
    FullyPopulated(String),
    EmptyExtend,
    DuplicateUid(u64),
    UidOutOfRange { uid: u64, limit: u64 },
    RowWidth { expected: usize, actual: usize },
    // Data
    CorruptedCache(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::InvalidHeader => write!(f, "Invalid header"),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::UnknownAttributeValue { attribute, value } => {
                write!(f, "Value {} is not in the domain of attribute '{}'", value, attribute)
            }
            Error::MissingAttribute(name) => write!(
                f,
                "Attribute '{}' not found in row attributes or scalar attributes",
                name
            ),
            Error::UnknownBuffer(tag) => write!(f, "No shared buffer registered for '{}'", tag),
            Error::SizeMismatch { expected, actual } => write!(
                f,
                "Buffer size mismatch: expected {} elements, found {}",
                expected, actual
            ),
            Error::AlreadyOpen(tag) => write!(f, "Cache '{}' is already open", tag),
            Error::NotOpen(tag) => write!(f, "Cache '{}' is not open", tag),
            Error::StillOpen(tag) => write!(f, "Cache '{}' must be closed for this operation", tag),
            Error::FullyPopulated(tag) => write!(f, "Cache '{}' is already fully populated", tag),
            Error::EmptyExtend => write!(f, "Cannot extend a cache with zero rows"),
            Error::DuplicateUid(uid) => write!(f, "Duplicate uid {}", uid),
            Error::UidOutOfRange { uid, limit } => {
                write!(f, "Uid {} is outside the key space [0, {})", uid, limit)
            }
            Error::RowWidth { expected, actual } => {
                write!(f, "Row has {} values, expected {}", actual, expected)
            }
            Error::CorruptedCache(msg) => write!(f, "Corrupted cache: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
