#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Request rejected; the caller must resubmit a corrected object.
    #[error("{0}")]
    Denied(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;

pub(crate) fn deny<T>(message: impl Into<String>) -> AdmissionResult<T> {
    Err(AdmissionError::Denied(message.into()))
}
