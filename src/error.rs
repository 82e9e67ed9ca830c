#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },
    #[error("Overflow")]
    Overflow,
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    /// A stage thread could not be started.
    #[error("failed to spawn stage {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
    /// A stage thread panicked before it finished.
    #[error("stage {0} panicked")]
    Stage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
