use thiserror::Error;

/// Failure taxonomy for calls against the remote API.
///
/// `Transport` means the request never completed; `Status` means the server
/// answered with a non-success code other than 401; `Unauthorized` is split
/// out because it drives session teardown rather than retry.
#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("unauthorized: token rejected by server")]
    Unauthorized,
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode server response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl ApiClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

pub type ApiResult<T> = Result<T, ApiClientError>;
