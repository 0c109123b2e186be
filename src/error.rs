use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// 分析调用失败的原因
///
/// 所有变体都会被评分策略降级为零分结果，不会以 5xx 返回给调用方。
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("video analyzer is not available")]
    Unavailable,

    #[error("failed to write temporary media file: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("failed to spawn analyzer process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("analyzer exited with code {code:?}: {stderr}")]
    ProcessFailure { code: Option<i32>, stderr: String },

    #[error("analyzer output could not be parsed: {0}")]
    MalformedOutput(String),

    #[error("analyzer reported an error: {0}")]
    Reported(String),

    #[error("analyzer did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to download video: {0}")]
    Download(String),
}

impl AnalysisError {
    /// 日志与指标中使用的短名称
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Unavailable => "unavailable",
            AnalysisError::TempFile(_) => "temp_file",
            AnalysisError::Spawn(_) => "spawn",
            AnalysisError::ProcessFailure { .. } => "process_failure",
            AnalysisError::MalformedOutput(_) => "malformed_output",
            AnalysisError::Reported(_) => "reported",
            AnalysisError::Timeout(_) => "timeout",
            AnalysisError::Download(_) => "download",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is invalid: {0}")]
    InvalidRow(String),
}

/// HTTP 层错误
///
/// 只有请求结构问题（400）和存储故障（500）会以错误状态码返回。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Storage(e) => {
                tracing::error!("❌ [存储] {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to access video analyses".to_string(),
                )
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// 上传失败（传输层），与分析失败区分开
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("server rejected upload with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("server response could not be decoded: {0}")]
    Decode(String),
}

/// 录制客户端错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera or microphone access was denied: {0}")]
    PermissionDenied(String),

    #[error("media source failed: {0}")]
    Media(String),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("an analysis is already in flight for this session")]
    AnalysisInFlight,

    #[error("no recording is available")]
    NoRecording,

    #[error(transparent)]
    Upload(#[from] UploadError),
}
