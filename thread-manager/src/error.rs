//! Error types for thread-manager

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    /// The OS refused to create the thread
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ThreadError>;
