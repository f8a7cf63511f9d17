use std::fmt;

/// Error types for scan operations. Per-call and per-step failures during
/// discovery are recorded in the scan outcome instead of raised; only
/// failures that invalidate the whole run surface here.
#[derive(Debug)]
pub enum ScanError {
    /// Invalid or missing credentials for the provider; aborts the whole scan
    Authentication(String),

    /// Rule-definition document rejected at load time
    CatalogValidation {
        service: String,
        detail: String,
    },

    /// Exception document could not be loaded
    ExceptionLoad(String),

    /// Catalog document could not be read or parsed
    DocumentParse {
        path: String,
        detail: String,
    },

    /// A scan worker panicked or was lost
    Internal(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Authentication(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            ScanError::CatalogValidation { service, detail } => {
                write!(f, "Invalid rule definition for service '{}': {}", service, detail)
            }
            ScanError::ExceptionLoad(msg) => {
                write!(f, "Failed to load exceptions: {}", msg)
            }
            ScanError::DocumentParse { path, detail } => {
                write!(f, "Failed to parse document '{}': {}", path, detail)
            }
            ScanError::Internal(msg) => {
                write!(f, "Internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Whether this error must abort the entire scan
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Authentication(_))
    }
}
