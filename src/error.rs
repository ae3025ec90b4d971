use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum PrepError {
    MissingInputFile { path: PathBuf, what: &'static str },
    UnsupportedCompressionMethod { archive: PathBuf, member: String, method: String },
    KeyCollision { archive: PathBuf, id: String, first: String, second: String },
    PartialArchive { path: PathBuf, reason: String },
    MalformedLocator { input: String, reason: String },
    MalformedInput { path: PathBuf, line: usize, reason: String },
    Config(String),
    Io(std::io::Error),
    Zip(zip::result::ZipError),
    Encode(Box<bincode::error::EncodeError>),
    Decode(Box<bincode::error::DecodeError>),
    Json(serde_json::Error),
}

impl fmt::Display for PrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepError::MissingInputFile { path, what } => {
                write!(f, "Missing input file: {} ({})", path.display(), what)
            }
            PrepError::UnsupportedCompressionMethod { archive, member, method } => write!(
                f,
                "Unsupported compression method {} for member {} in {} (members must be stored)",
                method,
                member,
                archive.display()
            ),
            PrepError::KeyCollision { archive, id, first, second } => write!(
                f,
                "Key collision in {}: members {} and {} both map to id {}",
                archive.display(),
                first,
                second,
                id
            ),
            PrepError::PartialArchive { path, reason } => {
                write!(f, "Partial archive {}: {}", path.display(), reason)
            }
            PrepError::MalformedLocator { input, reason } => {
                write!(f, "Malformed locator {:?}: {}", input, reason)
            }
            PrepError::MalformedInput { path, line, reason } => {
                write!(f, "Malformed input {}:{}: {}", path.display(), line, reason)
            }
            PrepError::Config(e) => write!(f, "Config error: {}", e),
            PrepError::Io(e) => write!(f, "IO error: {}", e),
            PrepError::Zip(e) => write!(f, "Zip error: {}", e),
            PrepError::Encode(e) => write!(f, "Serialization error: {}", e),
            PrepError::Decode(e) => write!(f, "Deserialization error: {}", e),
            PrepError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for PrepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PrepError::Io(e) => Some(e),
            PrepError::Zip(e) => Some(e),
            PrepError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl PrepError {
    /// Short stable name used in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            PrepError::MissingInputFile { .. } => "MissingInputFile",
            PrepError::UnsupportedCompressionMethod { .. } => "UnsupportedCompressionMethod",
            PrepError::KeyCollision { .. } => "KeyCollision",
            PrepError::PartialArchive { .. } => "PartialArchive",
            PrepError::MalformedLocator { .. } => "MalformedLocator",
            PrepError::MalformedInput { .. } => "MalformedInput",
            PrepError::Config(_) => "Config",
            PrepError::Io(_) => "Io",
            PrepError::Zip(_) => "Zip",
            PrepError::Encode(_) | PrepError::Decode(_) => "Serialization",
            PrepError::Json(_) => "Json",
        }
    }

    pub fn missing(path: impl Into<PathBuf>, what: &'static str) -> Self {
        PrepError::MissingInputFile { path: path.into(), what }
    }
}

impl From<std::io::Error> for PrepError {
    fn from(err: std::io::Error) -> Self {
        PrepError::Io(err)
    }
}

impl From<zip::result::ZipError> for PrepError {
    fn from(err: zip::result::ZipError) -> Self {
        PrepError::Zip(err)
    }
}

impl From<bincode::error::EncodeError> for PrepError {
    fn from(err: bincode::error::EncodeError) -> Self {
        PrepError::Encode(Box::new(err))
    }
}

impl From<bincode::error::DecodeError> for PrepError {
    fn from(err: bincode::error::DecodeError) -> Self {
        PrepError::Decode(Box::new(err))
    }
}

impl From<serde_json::Error> for PrepError {
    fn from(err: serde_json::Error) -> Self {
        PrepError::Json(err)
    }
}

impl From<String> for PrepError {
    fn from(err: String) -> Self {
        PrepError::Config(err)
    }
}

impl From<&str> for PrepError {
    fn from(err: &str) -> Self {
        PrepError::Config(err.to_string())
    }
}
