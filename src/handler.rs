use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::info;

use crate::error::ApiError;
use crate::models::{Scores, VideoAnalysisResult};
use crate::pipeline::{is_public_address, AnalysisJob, VideoSource};
use crate::scenario::Scenario;
use crate::scoring;
use crate::server::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub analyzer_available: bool,
    pub storage: &'static str,
}

/// 健康检查
pub async fn health_check(State(state): State<AppState>) -> ResponseJson<HealthResponse> {
    ResponseJson(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        analyzer_available: state.pipeline.analyzer().is_available(),
        storage: state.store.backend_name(),
    })
}

/// 可选练习场景（按界面上的顺序）
pub async fn list_scenarios() -> ResponseJson<Vec<Scenario>> {
    ResponseJson(Scenario::ALL.to_vec())
}

/// 创建分析请求
///
/// 携带 `videoBuffer`（base64）或 `videoUrl` 时调用分析器；否则视为客户端已经算好的结果，
/// 校验后直接保存。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateVideoAnalysisRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
    pub scenario: String,
    /// 录制时长（秒）
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub video_buffer: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub eye_contact_score: Option<f64>,
    #[serde(default)]
    pub facial_expression_score: Option<f64>,
    #[serde(default)]
    pub gesture_score: Option<f64>,
    #[serde(default)]
    pub posture_score: Option<f64>,
    #[serde(default)]
    pub feedback: Option<Vec<String>>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// 校验通过的请求
#[derive(Debug)]
pub enum Submission {
    Analyze(AnalysisJob),
    Precomputed(crate::models::NewVideoAnalysis),
}

impl CreateVideoAnalysisRequest {
    /// 校验请求结构，任何问题都返回 400，不会写入存储
    pub fn validate(self, max_video_bytes: usize) -> Result<Submission, ApiError> {
        let scenario: Scenario = self
            .scenario
            .parse()
            .map_err(|e: crate::scenario::UnknownScenario| ApiError::Validation(e.to_string()))?;

        let duration = self.duration.unwrap_or(0.0);
        if !duration.is_finite() || duration < 0.0 {
            return Err(ApiError::Validation(
                "duration must be a non-negative number of seconds".to_string(),
            ));
        }

        let has_scores = [
            self.overall_score,
            self.eye_contact_score,
            self.facial_expression_score,
            self.gesture_score,
            self.posture_score,
            self.confidence,
        ]
        .iter()
        .any(Option::is_some)
            || self.feedback.is_some();

        let source = match (self.video_buffer, self.video_url) {
            (Some(_), Some(_)) => {
                return Err(ApiError::Validation(
                    "provide either videoBuffer or videoUrl, not both".to_string(),
                ))
            }
            (Some(buffer), None) => Some(VideoSource::Buffer(decode_video_buffer(
                &buffer,
                max_video_bytes,
            )?)),
            (None, Some(url)) => Some(VideoSource::Url(validate_video_url(&url)?)),
            (None, None) => None,
        };

        match source {
            Some(_) if has_scores => Err(ApiError::Validation(
                "score fields cannot be combined with a video".to_string(),
            )),
            Some(source) => Ok(Submission::Analyze(AnalysisJob {
                user_id: self.user_id,
                scenario,
                duration,
                source,
            })),
            None => {
                let score = |value: Option<f64>, field: &str| -> Result<u8, ApiError> {
                    let value = value.ok_or_else(|| {
                        ApiError::Validation(format!(
                            "{} is required when no video is provided",
                            field
                        ))
                    })?;
                    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                        return Err(ApiError::Validation(format!(
                            "{} must be between 0 and 100",
                            field
                        )));
                    }
                    Ok(value.round() as u8)
                };
                let scores = Scores {
                    overall: score(self.overall_score, "overallScore")?,
                    eye_contact: score(self.eye_contact_score, "eyeContactScore")?,
                    facial_expression: score(self.facial_expression_score, "facialExpressionScore")?,
                    gesture: score(self.gesture_score, "gestureScore")?,
                    posture: score(self.posture_score, "postureScore")?,
                };

                let confidence = self.confidence.unwrap_or(1.0);
                if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                    return Err(ApiError::Validation(
                        "confidence must be between 0 and 1".to_string(),
                    ));
                }

                let feedback: Vec<String> = self
                    .feedback
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|line| !line.trim().is_empty())
                    .collect();
                if feedback.is_empty() {
                    return Err(ApiError::Validation(
                        "feedback must contain at least one entry".to_string(),
                    ));
                }

                Ok(Submission::Precomputed(scoring::precomputed_result(
                    self.user_id,
                    scenario,
                    scores,
                    feedback,
                    confidence,
                    duration,
                )))
            }
        }
    }
}

/// 解码 base64 视频，兼容浏览器 FileReader 生成的 `data:video/webm;base64,` 前缀
fn decode_video_buffer(buffer: &str, max_video_bytes: usize) -> Result<Vec<u8>, ApiError> {
    let encoded = match buffer.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => buffer,
    };
    let encoded: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| ApiError::Validation(format!("videoBuffer is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("videoBuffer is empty".to_string()));
    }
    if bytes.len() > max_video_bytes {
        return Err(ApiError::Validation(format!(
            "video is {} bytes, limit is {}",
            bytes.len(),
            max_video_bytes
        )));
    }
    Ok(bytes)
}

fn validate_video_url(url: &str) -> Result<String, ApiError> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| ApiError::Validation(format!("videoUrl is not a valid URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::Validation(format!(
            "videoUrl scheme {} is not supported",
            parsed.scheme()
        )));
    }

    // 只允许公网地址，回环、私有、链路本地地址一律拒绝
    let host = parsed
        .host_str()
        .ok_or_else(|| ApiError::Validation("videoUrl has no host".to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    let local = match host.parse::<IpAddr>() {
        Ok(ip) => !is_public_address(ip),
        Err(_) => host == "localhost" || host.ends_with(".localhost"),
    };
    if local {
        return Err(ApiError::Validation(format!(
            "videoUrl host {} is not a public address",
            host
        )));
    }
    Ok(parsed.to_string())
}

/// 提交视频分析
pub async fn create_video_analysis(
    State(state): State<AppState>,
    payload: Result<Json<CreateVideoAnalysisRequest>, JsonRejection>,
) -> Result<(StatusCode, ResponseJson<VideoAnalysisResult>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    let new_analysis = match request.validate(state.max_upload_bytes)? {
        Submission::Analyze(job) => state.pipeline.run(job).await,
        Submission::Precomputed(analysis) => {
            info!(
                "📥 [分析接口] 收到客户端预计算结果: scenario={}, overall={}",
                analysis.scenario, analysis.scores.overall
            );
            analysis
        }
    };

    let saved = state.store.create_video_analysis(new_analysis).await?;
    info!(
        "✅ [分析接口] 已保存分析结果: id={}, user={:?}, overall={}",
        saved.id, saved.user_id, saved.overall_score
    );
    Ok((StatusCode::CREATED, ResponseJson(saved)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_id: Option<String>,
}

/// 查询用户的历史分析结果
pub async fn list_video_analyses(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<ResponseJson<Vec<VideoAnalysisResult>>, ApiError> {
    let user_id = match query.user_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| ApiError::Validation("userId must be an integer".to_string()))?,
        ),
    };

    let analyses = state.store.get_user_video_analyses(user_id).await?;
    Ok(ResponseJson(analyses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisMethod;

    fn request(json: serde_json::Value) -> CreateVideoAnalysisRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = serde_json::from_value::<CreateVideoAnalysisRequest>(serde_json::json!({
            "scenario": "Client Pitch",
            "videoBuffer": "AAAA",
            "isAdmin": true
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_video_buffer_becomes_analysis_job() {
        let submission = request(serde_json::json!({
            "userId": 5,
            "scenario": "Client Pitch",
            "duration": 42.5,
            "videoBuffer": "data:video/webm;base64,GkXfow=="
        }))
        .validate(1024)
        .unwrap();

        match submission {
            Submission::Analyze(job) => {
                assert_eq!(job.user_id, Some(5));
                assert_eq!(job.scenario, Scenario::ClientPitch);
                assert_eq!(job.duration, 42.5);
                assert!(matches!(
                    job.source,
                    VideoSource::Buffer(ref b) if b.as_slice() == [0x1a_u8, 0x45, 0xdf, 0xa3]
                ));
            }
            other => panic!("unexpected submission: {:?}", other),
        }
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            serde_json::json!({"scenario": "Karaoke", "videoBuffer": "AAAA"}),
            serde_json::json!({"scenario": "Client Pitch", "videoBuffer": "!!not base64!!"}),
            serde_json::json!({"scenario": "Client Pitch", "videoBuffer": ""}),
            serde_json::json!({"scenario": "Client Pitch", "duration": -1.0, "videoBuffer": "AAAA"}),
            serde_json::json!({"scenario": "Client Pitch", "videoUrl": "file:///etc/passwd"}),
            serde_json::json!({"scenario": "Client Pitch", "videoUrl": "http://127.0.0.1:9000/a.webm"}),
            serde_json::json!({"scenario": "Client Pitch", "videoUrl": "http://localhost/a.webm"}),
            serde_json::json!({"scenario": "Client Pitch", "videoUrl": "http://169.254.169.254/latest/meta-data"}),
            serde_json::json!({"scenario": "Client Pitch", "videoUrl": "http://10.0.0.5/a.webm"}),
            serde_json::json!({"scenario": "Client Pitch", "videoUrl": "http://[::1]/a.webm"}),
            serde_json::json!({"scenario": "Client Pitch", "videoBuffer": "AAAA", "videoUrl": "https://x.test/a.webm"}),
            serde_json::json!({"scenario": "Client Pitch", "videoBuffer": "AAAA", "overallScore": 50}),
            serde_json::json!({
                "scenario": "Client Pitch", "overallScore": 101, "eyeContactScore": 50,
                "facialExpressionScore": 50, "gestureScore": 50, "postureScore": 50,
                "feedback": ["ok"]
            }),
            serde_json::json!({
                "scenario": "Client Pitch", "overallScore": 50, "eyeContactScore": 50,
                "facialExpressionScore": 50, "gestureScore": 50, "postureScore": 50,
                "feedback": []
            }),
            serde_json::json!({"scenario": "Client Pitch"}),
        ];
        for case in cases {
            let err = request(case.clone()).validate(1024).unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)), "case {} gave {:?}", case, err);
        }
    }

    #[test]
    fn test_public_video_url_is_accepted() {
        let submission = request(serde_json::json!({
            "scenario": "Client Pitch",
            "videoUrl": " https://cdn.example.com/clips/a.webm "
        }))
        .validate(1024)
        .unwrap();
        assert!(matches!(
            submission,
            Submission::Analyze(AnalysisJob { source: VideoSource::Url(ref u), .. })
                if u == "https://cdn.example.com/clips/a.webm"
        ));
    }

    #[test]
    fn test_oversized_video_is_rejected() {
        // 6 字节解码结果超过 4 字节上限
        let err = request(serde_json::json!({"scenario": "Client Pitch", "videoBuffer": "AAAAAAAA"}))
            .validate(4)
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m.contains("limit")));
    }

    #[test]
    fn test_precomputed_submission() {
        let submission = request(serde_json::json!({
            "scenario": "Public Speaking",
            "duration": 30,
            "overallScore": 85, "eyeContactScore": 90, "facialExpressionScore": 80,
            "gestureScore": 75, "postureScore": 88,
            "feedback": ["Good job"],
            "confidence": 0.9
        }))
        .validate(1024)
        .unwrap();

        match submission {
            Submission::Precomputed(analysis) => {
                assert_eq!(analysis.scores.overall, 85);
                assert_eq!(analysis.feedback, vec!["Good job".to_string()]);
                assert_eq!(analysis.confidence, 0.9);
                assert_eq!(
                    analysis.analysis_details.analysis_method,
                    AnalysisMethod::ClientSubmitted
                );
            }
            other => panic!("unexpected submission: {:?}", other),
        }
    }
}
