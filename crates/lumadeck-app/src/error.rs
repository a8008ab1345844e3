use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, DeckError>;

#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A manifest entry that cannot be turned into a playable animation.
    #[error("invalid manifest entry {key}: {reason}")]
    Manifest { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Sprite geometry that does not fit the decoded image.
    #[error("sprite geometry: {0}")]
    Geometry(String),

    /// A draw call that could not be satisfied; isolated per layer by the compositor.
    #[error("render: {0}")]
    Render(String),
}

impl DeckError {
    pub fn manifest(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
