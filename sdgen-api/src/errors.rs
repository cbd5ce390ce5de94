use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Rejected(#[from] sdgen_core::RequestError),
    #[error("No image found at {0}")]
    InputImageNotFound(PathBuf),
    #[error("No mask image found at {0}")]
    MaskImageNotFound(PathBuf),
    #[error("Invalid seed `{0}`")]
    InvalidSeed(String),
    #[error("Image generation is not initialized")]
    PipelinesUnavailable,
    #[error(transparent)]
    GenImageError(#[from] crate::gen::GenImageError),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("Generation task failed - {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("Failed to initialize the server: {0}")]
    ServerInitializationError(std::io::Error),
    #[error("Error: {0}")]
    ServerError(std::io::Error),
    #[error("The provided port is not a valid number - {0}")]
    InvalidPort(String),
    #[error("The provided IP is not valid - {0}")]
    InvalidIp(String),
    #[error("https_cert_path must be set unless http_only is enabled")]
    MissingCertificate,
    #[error("failed to read configuration file - {0}")]
    ConfigReadFailed(std::io::Error),
    #[error("failed to deserialize configuration file as yaml - {0}")]
    ConfigDeserializeFailed(serde_yaml::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Failures that are answered with a `null` body instead of an error status.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Rejected(_) | Error::InputImageNotFound(_) | Error::MaskImageNotFound(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
