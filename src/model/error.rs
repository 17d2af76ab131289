//! Structured error types for backend legs, the catalog commit and task submission

use crate::model::leg::LegId;
use crate::model::task_id::TaskId;
use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while talking to the S3-compatible object store
#[derive(Debug, Clone, PartialEq)]
pub enum S3Error {
    /// Access denied - insufficient permissions
    AccessDenied(String),
    /// Bucket not found
    BucketNotFound(String),
    /// Network or connectivity error
    NetworkError(String),
    /// Invalid credentials
    InvalidCredentials(String),
    /// Generic S3 error
    Other(String),
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            S3Error::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            S3Error::BucketNotFound(msg) => write!(f, "Bucket not found: {}", msg),
            S3Error::NetworkError(msg) => write!(f, "Network error: {}", msg),
            S3Error::InvalidCredentials(msg) => write!(f, "Invalid credentials: {}", msg),
            S3Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl S3Error {
    /// Create an S3Error from an error message, attempting to categorize it
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("access denied") || msg_lower.contains("accessdenied") {
            S3Error::AccessDenied(msg)
        } else if msg_lower.contains("no such bucket") || msg_lower.contains("nosuchbucket") {
            S3Error::BucketNotFound(msg)
        } else if msg_lower.contains("network")
            || msg_lower.contains("connection")
            || msg_lower.contains("timeout")
            || msg_lower.contains("dispatch failure")
        {
            S3Error::NetworkError(msg)
        } else if msg_lower.contains("credential")
            || msg_lower.contains("signature")
            || msg_lower.contains("unauthorized")
        {
            S3Error::InvalidCredentials(msg)
        } else {
            S3Error::Other(msg)
        }
    }
}

impl std::error::Error for S3Error {}

/// Errors returned by the cloud drive REST API
#[derive(Debug, Clone, PartialEq)]
pub enum DriveError {
    /// The API answered with a non-success status
    Http { status: u16, message: String },
    /// The request never reached the API or the connection broke
    Network(String),
    /// The API answered with something we could not interpret
    InvalidResponse(String),
    /// The local file could not be read for upload
    Io(String),
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveError::Http { status, message } => {
                write!(f, "Drive API error ({}): {}", status, message)
            }
            DriveError::Network(msg) => write!(f, "Network error: {}", msg),
            DriveError::InvalidResponse(msg) => write!(f, "Invalid drive response: {}", msg),
            DriveError::Io(msg) => write!(f, "Could not read local file: {}", msg),
        }
    }
}

impl std::error::Error for DriveError {}

impl From<reqwest::Error> for DriveError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DriveError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => DriveError::InvalidResponse(e.to_string()),
            None => DriveError::Network(e.to_string()),
        }
    }
}

/// Errors that can occur while reading local files
#[derive(Debug, Clone, PartialEq)]
pub enum LocalError {
    /// File or directory not found
    NotFound(String),
    /// Permission denied
    PermissionDenied(String),
    /// IO error
    IoError(String),
}

impl fmt::Display for LocalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalError::NotFound(msg) => write!(f, "Not found: {}", msg),
            LocalError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            LocalError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for LocalError {}

impl From<std::io::Error> for LocalError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => LocalError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => LocalError::PermissionDenied(e.to_string()),
            _ => LocalError::IoError(e.to_string()),
        }
    }
}

/// What went wrong inside one leg
#[derive(Debug, Clone, PartialEq)]
pub enum LegError {
    S3(S3Error),
    Drive(DriveError),
    Local(LocalError),
    /// The leg's task panicked or was aborted before reporting an outcome
    Crashed(String),
}

impl fmt::Display for LegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegError::S3(e) => write!(f, "{}", e),
            LegError::Drive(e) => write!(f, "{}", e),
            LegError::Local(e) => write!(f, "{}", e),
            LegError::Crashed(msg) => write!(f, "Upload worker crashed: {}", msg),
        }
    }
}

impl std::error::Error for LegError {}

impl From<S3Error> for LegError {
    fn from(e: S3Error) -> Self {
        LegError::S3(e)
    }
}

impl From<DriveError> for LegError {
    fn from(e: DriveError) -> Self {
        LegError::Drive(e)
    }
}

impl From<LocalError> for LegError {
    fn from(e: LocalError) -> Self {
        LegError::Local(e)
    }
}

impl From<std::io::Error> for LegError {
    fn from(e: std::io::Error) -> Self {
        LegError::Local(e.into())
    }
}

/// Recoverable failure of a single leg, carried verbatim to observers
#[derive(Debug, Clone, PartialEq)]
pub struct LegFailure {
    pub task_id: TaskId,
    pub leg: LegId,
    pub error: LegError,
}

impl LegFailure {
    pub fn new(task_id: TaskId, leg: LegId, error: impl Into<LegError>) -> Self {
        LegFailure {
            task_id,
            leg,
            error: error.into(),
        }
    }
}

impl fmt::Display for LegFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} upload failed: {}", self.leg, self.error)
    }
}

impl std::error::Error for LegFailure {}

/// Errors from the catalog commit
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogError {
    /// The catalog could not be reached
    Unreachable(String),
    /// The catalog answered with a non-success status
    Rejected { status: u16, body: String },
    /// The response body did not carry a model id
    InvalidResponse(String),
    /// A leg result the commit needs is missing
    MissingLeg(LegId),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Unreachable(msg) => write!(f, "Catalog unreachable: {}", msg),
            CatalogError::Rejected { status, body } => {
                write!(f, "Catalog rejected the model ({}): {}", status, body)
            }
            CatalogError::InvalidResponse(msg) => write!(f, "Invalid catalog response: {}", msg),
            CatalogError::MissingLeg(leg) => write!(f, "No upload result for {}", leg),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Validation errors for category paths
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryError {
    Empty,
    BlankLabel(usize),
}

impl fmt::Display for CategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryError::Empty => write!(f, "at least one category is required"),
            CategoryError::BlankLabel(idx) => write!(f, "category {} is blank", idx + 1),
        }
    }
}

impl std::error::Error for CategoryError {}

/// Reasons a task could not be created
#[derive(Debug)]
pub enum SubmitError {
    MissingFile(PathBuf),
    Category(CategoryError),
    Persistence(color_eyre::Report),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::MissingFile(path) => write!(f, "File not found: {}", path.display()),
            SubmitError::Category(e) => write!(f, "Invalid category: {}", e),
            SubmitError::Persistence(e) => write!(f, "Could not save task: {}", e),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<CategoryError> for SubmitError {
    fn from(e: CategoryError) -> Self {
        SubmitError::Category(e)
    }
}

/// Result type for object store operations
pub type S3Result<T = ()> = Result<T, S3Error>;

/// Result type for cloud drive operations
pub type DriveResult<T = ()> = Result<T, DriveError>;

/// Result type for leg bodies
pub type LegResult<T> = Result<T, LegError>;
