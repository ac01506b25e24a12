use std::path::PathBuf;

/// Errors from content loading.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("OBJ parse error at line {line}: {message}")]
    ObjParse { line: usize, message: String },
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid {kind} '{name}': {message}")]
    Invalid {
        kind: &'static str,
        name: String,
        message: String,
    },
}

impl AssetError {
    pub(crate) fn not_found(kind: &'static str, name: &str) -> Self {
        AssetError::NotFound {
            kind,
            name: name.to_string(),
        }
    }
}
