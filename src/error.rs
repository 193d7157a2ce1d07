use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovwatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error at position {position}: {source}")]
    Xml {
        source: quick_xml::Error,
        position: usize,
    },

    #[error("Coverage report has no <coverage> root element")]
    MissingRoot,

    #[error("Unexpected root element <{0}>, expected <coverage>")]
    UnexpectedRoot(String),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Watch root does not exist: {0}")]
    WatchRootMissing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to replace snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type Result<T> = std::result::Result<T, CovwatchError>;
