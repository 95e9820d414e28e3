use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("label {label} is outside [0, {n_classes})")]
    InvalidLabel { label: usize, n_classes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    #[error("training already completed all {epochs} epochs")]
    TrainingComplete { epochs: usize },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
