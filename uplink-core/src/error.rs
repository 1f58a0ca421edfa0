use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("IO Error - {0}")]
    Io(String),

    #[error("ObjectStore Error - {0}")]
    ObjectStore(String),

    // the target bucket is missing or cannot be reached at startup
    #[error("Bucket Error - {0}")]
    Bucket(String),

    // the backend worker is gone, nothing can be accepted anymore
    #[error("Backend Error - {0}")]
    Backend(String),

    #[error("Metrics Error - {0}")]
    Metrics(String),

    #[error("OneShot Receiver Error - {0}")]
    ActorPatternRecv(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::ObjectStore(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
