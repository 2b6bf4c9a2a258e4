use thiserror::Error as ThisError;

use crate::resolve::ResolveError;

/// Client-facing failure of a controller operation.
#[derive(ThisError, Debug)]
pub enum StreamError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl StreamError {
    pub fn status_code(&self) -> u16 {
        match self {
            StreamError::NotFound(_) => 404,
            StreamError::BadRequest(_) => 400,
            StreamError::Upstream(_) => 502,
            StreamError::Internal(_) => 500,
        }
    }
}

impl From<ResolveError> for StreamError {
    fn from(err: ResolveError) -> Self {
        if err.is_not_found() {
            StreamError::NotFound(err.to_string())
        } else {
            StreamError::BadRequest(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
