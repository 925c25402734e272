use crate::config::ConfigError;
use crate::output::OutputError;

pub type Result<T> = std::result::Result<T, PreviewError>;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("invalid capture parameters: {reason}")]
    InvalidCaptureParams { reason: String },

    #[error("an image capture is already in progress")]
    CaptureInProgress,

    #[error("the preview surface is not available")]
    SurfaceUnavailable,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
