//! Error types for loadstone

use thiserror::Error;

/// Main error type for resource loading and content building
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Kind '{kind}' cannot be built from a descriptor")]
    UnsupportedDescriptor { kind: String },

    #[error("Descriptor passed to kind '{kind}' has the wrong type")]
    WrongDescriptorType { kind: String },
}

/// Result type alias for resource operations
pub type Result<T> = std::result::Result<T, ResourceError>;
