//! 客户端上传：把录好的视频提交给分析服务

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::UploadError;
use crate::models::VideoAnalysisResult;
use crate::scenario::Scenario;

/// 分析服务端可能要跑满分析器超时，客户端超时要比它长
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// 一次上传的内容
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub user_id: Option<i64>,
    pub scenario: Scenario,
    /// 录制时长（秒）
    pub duration: f64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 提交视频并等待分析结果，不自动重试
    async fn upload(&self, upload: &VideoUpload) -> Result<VideoAnalysisResult, UploadError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
    scenario: Scenario,
    duration: f64,
    video_buffer: String,
}

/// 通过 HTTP 提交到 `POST {base_url}/api/video-analysis`
#[derive(Debug, Clone)]
pub struct HttpUploadTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploadTransport {
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        Self::with_timeout(base_url, DEFAULT_UPLOAD_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UploadError::Transport)?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/video-analysis", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload(&self, upload: &VideoUpload) -> Result<VideoAnalysisResult, UploadError> {
        let body = UploadBody {
            user_id: upload.user_id,
            scenario: upload.scenario,
            duration: upload.duration,
            video_buffer: base64::engine::general_purpose::STANDARD.encode(&upload.payload),
        };

        info!(
            "⏳ [上传] 提交视频: {} bytes, scenario={}, endpoint={}",
            upload.payload.len(),
            upload.scenario,
            self.endpoint
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(UploadError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // 服务端错误体是 {"message": ...}
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(text);
            warn!("⚠️  [上传] 服务端拒绝: {} - {}", status, message);
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await.map_err(UploadError::Transport)?;
        let result: VideoAnalysisResult =
            serde_json::from_slice(&bytes).map_err(|e| UploadError::Decode(e.to_string()))?;
        info!(
            "✅ [上传] 收到分析结果: id={}, overall={}",
            result.id, result.overall_score
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let transport = HttpUploadTransport::new("http://localhost:9000/").unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:9000/api/video-analysis");
    }

    #[test]
    fn test_upload_body_shape() {
        let body = UploadBody {
            user_id: None,
            scenario: Scenario::TeamMeetingPresentation,
            duration: 12.0,
            video_buffer: base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["scenario"], "Team Meeting Presentation");
        assert_eq!(json["videoBuffer"], "AQID");
        assert!(json.get("userId").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let transport =
            HttpUploadTransport::with_timeout("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = transport
            .upload(&VideoUpload {
                user_id: Some(1),
                scenario: Scenario::FreePractice,
                duration: 1.0,
                payload: vec![0; 4],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
    }
}
