//! Error types for the resource stream codec and output router.

use std::path::PathBuf;

/// Errors produced while decoding, encoding or delivering resource streams.
#[derive(Debug, thiserror::Error)]
pub enum KioError {
    /// The input could not be parsed as a stream of YAML resources.
    #[error("malformed input{}: {reason}", document_suffix(.document))]
    MalformedInput {
        /// Position of the offending document in the stream, when known.
        document: Option<usize>,
        reason: String,
    },

    /// The output directory is already present on disk.
    #[error("directory {path:?} already exists, please delete the directory and retry")]
    DestinationExists { path: PathBuf },

    /// A resource path annotation points outside the output directory.
    #[error("resource path {path:?} escapes the output directory")]
    PathTraversal { path: String },

    /// A mapping key that cannot be written in block style.
    #[error("unsupported mapping key: {0}")]
    UnsupportedKey(String),

    /// One path annotation names a file that another one needs as a directory.
    #[error("resource path {file:?} conflicts with {nested:?}")]
    PathConflict { file: String, nested: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

fn document_suffix(document: &Option<usize>) -> String {
    match document {
        Some(index) => format!(" in document {index}"),
        None => String::new(),
    }
}

/// Result type for codec and router operations.
pub type KioResult<T> = std::result::Result<T, KioError>;
