use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Init Error - {0}")]
    InitError(String),

    #[error("Server Error - {0}")]
    Server(String),
}
