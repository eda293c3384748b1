#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("image not found")]
    NotFound,

    #[error("not authenticated")]
    Unauthenticated,

    #[error("not authorized")]
    NotAuthorized,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
