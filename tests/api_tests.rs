//! HTTP 接口集成测试
//!
//! 分析器用 sh 脚本模拟：脚本把收到的视频路径写进标记文件，
//! 测试据此检查临时文件在成功和失败路径上都已删除。

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use practice_analysis::{
    build_router, Analyzer, AnalyzerConfig, AnalysisPipeline, AppState, MemoryStore,
};

const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

struct TestServer {
    router: Router,
    store: Arc<MemoryStore>,
    temp_dir: tempfile::TempDir,
}

impl TestServer {
    fn media_dir(&self) -> PathBuf {
        self.temp_dir.path().join("media")
    }

    fn marker(&self) -> PathBuf {
        self.temp_dir.path().join("analyzed-path")
    }

    /// 分析器每次调用收到的临时文件路径，按调用顺序
    fn analyzed_paths(&self) -> Vec<PathBuf> {
        std::fs::read_to_string(self.marker())
            .expect("analyzer was not invoked")
            .lines()
            .map(PathBuf::from)
            .collect()
    }

    /// 最近一次调用收到的临时文件路径
    fn analyzed_path(&self) -> PathBuf {
        self.analyzed_paths().pop().expect("analyzer was not invoked")
    }
}

fn server_with_analyzer(analyzer_for: impl FnOnce(&Path) -> Analyzer) -> TestServer {
    let temp_dir = tempfile::tempdir().unwrap();
    let analyzer = analyzer_for(temp_dir.path());
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        AnalysisPipeline::new(analyzer, MAX_UPLOAD_BYTES),
        MAX_UPLOAD_BYTES,
    );
    TestServer {
        router: build_router(state),
        store,
        temp_dir,
    }
}

/// 分析器不可用的服务
fn setup_test_server() -> TestServer {
    server_with_analyzer(|dir| {
        Analyzer::unavailable(
            AnalyzerConfig {
                temp_dir: dir.join("media"),
                ..AnalyzerConfig::default()
            },
            "python3 not installed",
        )
    })
}

/// 用 `body` 作为脚本主体的 sh 分析器
#[cfg(unix)]
async fn setup_script_server(body: &str, timeout: Duration) -> TestServer {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = temp_dir.path().join("fake_analyzer.sh");
    let marker = temp_dir.path().join("analyzed-path");
    std::fs::write(
        &script,
        format!("printf '%s\\n' \"$1\" >> '{}'\n{}\n", marker.display(), body),
    )
    .unwrap();

    let config = AnalyzerConfig {
        program: "sh".to_string(),
        args: Vec::new(),
        script: Some(script),
        probe_args: vec!["-c".to_string(), "exit 0".to_string()],
        timeout,
        temp_dir: temp_dir.path().join("media"),
        ..AnalyzerConfig::default()
    };
    let analyzer = Analyzer::probe(config).await;
    assert!(analyzer.is_available(), "{:?}", analyzer.unavailable_reason());

    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        AnalysisPipeline::new(analyzer, MAX_UPLOAD_BYTES),
        MAX_UPLOAD_BYTES,
    );
    TestServer {
        router: build_router(state),
        store,
        temp_dir,
    }
}

async fn make_request(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<String>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(path);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = request
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_json(app: &Router, body: Value) -> (StatusCode, Value) {
    make_request(app, Method::POST, "/api/video-analysis", Some(body.to_string())).await
}

fn webm_payload() -> String {
    let mut bytes = vec![0x1a, 0x45, 0xdf, 0xa3];
    bytes.extend_from_slice(b"not really a video");
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = setup_test_server();
    for path in ["/", "/health"] {
        let (status, body) = make_request(&server.router, Method::GET, path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "practice-analysis");
        assert_eq!(body["analyzerAvailable"], false);
        assert_eq!(body["storage"], "memory");
    }
}

#[tokio::test]
async fn test_list_scenarios() {
    let server = setup_test_server();
    let (status, body) = make_request(&server.router, Method::GET, "/api/scenarios", None).await;
    assert_eq!(status, StatusCode::OK);
    let labels = body.as_array().unwrap();
    assert_eq!(labels.len(), 6);
    assert_eq!(labels[0], "Job Interview Introduction");
    assert_eq!(labels[5], "Free Practice");
}

#[tokio::test]
async fn test_history_for_user_without_results_is_empty() {
    let server = setup_test_server();
    let (status, body) =
        make_request(&server.router, Method::GET, "/api/video-analyses?userId=42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = make_request(&server.router, Method::GET, "/api/video-analyses", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) =
        make_request(&server.router, Method::GET, "/api/video-analyses?userId=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_precomputed_result_is_stored_and_listed_newest_first() {
    let server = setup_test_server();
    let first = json!({
        "userId": 7,
        "scenario": "Client Pitch",
        "duration": 30,
        "overallScore": 70, "eyeContactScore": 72, "facialExpressionScore": 68,
        "gestureScore": 65, "postureScore": 75,
        "feedback": ["Keep practicing"],
        "confidence": 0.8
    });
    let (status, created) = post_json(&server.router, first).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["overallScore"], 70);
    assert_eq!(created["analysisDetails"]["analysisMethod"], "client-submitted");

    let second = json!({
        "userId": 7,
        "scenario": "Public Speaking",
        "overallScore": 90, "eyeContactScore": 90, "facialExpressionScore": 90,
        "gestureScore": 90, "postureScore": 90,
        "feedback": ["Great"]
    });
    let (status, _) = post_json(&server.router, second).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) =
        make_request(&server.router, Method::GET, "/api/video-analyses?userId=7", None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["scenario"], "Public Speaking");
    assert_eq!(history[0]["confidence"], 1.0);
    assert_eq!(history[1]["scenario"], "Client Pitch");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_persisting() {
    let server = setup_test_server();

    let bad_bodies = [
        "{not json".to_string(),
        json!({"scenario": "Client Pitch", "videoBuffer": webm_payload(), "role": "admin"}).to_string(),
        json!({"scenario": "Karaoke Night", "videoBuffer": webm_payload()}).to_string(),
        json!({"scenario": "Client Pitch", "videoBuffer": "%%%"}).to_string(),
        json!({"scenario": "Client Pitch", "duration": -5, "videoBuffer": webm_payload()}).to_string(),
        json!({"scenario": "Client Pitch", "videoUrl": "ftp://example.com/a.webm"}).to_string(),
        json!({"scenario": "Client Pitch", "videoUrl": "http://127.0.0.1:9000/internal.webm"}).to_string(),
        json!({"scenario": "Client Pitch", "videoUrl": "http://169.254.169.254/latest/meta-data"}).to_string(),
        json!({
            "scenario": "Client Pitch",
            "overallScore": 150, "eyeContactScore": 10, "facialExpressionScore": 10,
            "gestureScore": 10, "postureScore": 10, "feedback": ["x"]
        })
        .to_string(),
    ];

    for body in bad_bodies {
        let (status, response) =
            make_request(&server.router, Method::POST, "/api/video-analysis", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert!(response["message"].is_string(), "body: {}", body);
    }

    assert!(server.store.is_empty().await);
}

#[tokio::test]
async fn test_decoded_video_over_limit_is_rejected() {
    let server = setup_test_server();
    let oversized = base64::engine::general_purpose::STANDARD.encode(vec![0u8; MAX_UPLOAD_BYTES + 1]);
    let (status, _) = post_json(
        &server.router,
        json!({"scenario": "Client Pitch", "videoBuffer": oversized}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(server.store.is_empty().await);
}

#[tokio::test]
async fn test_unavailable_analyzer_returns_zero_score_result() {
    let server = setup_test_server();
    let (status, body) = post_json(
        &server.router,
        json!({"userId": 3, "scenario": "Difficult Conversation", "duration": 20, "videoBuffer": webm_payload()}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["overallScore"], 0);
    assert_eq!(body["eyeContactScore"], 0);
    assert_eq!(body["postureScore"], 0);
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["analysisDetails"]["analysisMethod"], "unavailable");
    let feedback = body["feedback"].as_array().unwrap();
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0].as_str().unwrap().contains("single person"));

    // 没有创建任何临时文件
    assert!(dir_is_empty(&server.media_dir()));
    assert_eq!(server.store.len().await, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_analyzer_output_is_stored_verbatim() {
    let server = setup_script_server(
        r#"echo '{"overallScore":85,"eyeContactScore":90,"facialExpressionScore":80,"gestureScore":75,"postureScore":88,"feedback":["Good job"],"confidence":0.9}'"#,
        Duration::from_secs(30),
    )
    .await;

    let (status, body) = post_json(
        &server.router,
        json!({"userId": 11, "scenario": "Job Interview Introduction", "duration": 45, "videoBuffer": webm_payload()}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["overallScore"], 85);
    assert_eq!(body["eyeContactScore"], 90);
    assert_eq!(body["facialExpressionScore"], 80);
    assert_eq!(body["gestureScore"], 75);
    assert_eq!(body["postureScore"], 88);
    assert_eq!(body["feedback"], json!(["Good job"]));
    assert_eq!(body["confidence"], 0.9);
    assert_eq!(body["analysisDetails"]["analysisMethod"], "external-analyzer");

    let analyzed = server.analyzed_path();
    assert_eq!(analyzed.extension().unwrap(), "webm");
    assert!(!analyzed.exists());
    assert!(dir_is_empty(&server.media_dir()));

    let (_, history) =
        make_request(&server.router, Method::GET, "/api/video-analyses?userId=11", None).await;
    assert_eq!(history[0]["id"], body["id"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_analyzer_failure_degrades_without_leaking_stderr() {
    let server = setup_script_server("echo 'decode error' >&2\nexit 1", Duration::from_secs(30)).await;

    let (status, body) = post_json(
        &server.router,
        json!({"scenario": "Team Meeting Presentation", "duration": 12, "videoBuffer": webm_payload()}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["overallScore"], 0);
    assert_eq!(body["gestureScore"], 0);
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["analysisDetails"]["analysisMethod"], "failed");
    assert!(!body.to_string().contains("decode error"));

    assert!(!server.analyzed_path().exists());
    assert!(dir_is_empty(&server.media_dir()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_malformed_analyzer_output_degrades() {
    let server = setup_script_server("echo 'Traceback (most recent call last):'", Duration::from_secs(30)).await;

    let (status, body) = post_json(
        &server.router,
        json!({"scenario": "Free Practice", "videoBuffer": webm_payload()}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["overallScore"], 0);
    assert_eq!(body["analysisDetails"]["analysisMethod"], "failed");
    assert!(!server.analyzed_path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_analyzer_timeout_kills_process_and_cleans_up() {
    let server = setup_script_server("sleep 30", Duration::from_millis(300)).await;

    let started = std::time::Instant::now();
    let (status, body) = post_json(
        &server.router,
        json!({"scenario": "Client Pitch", "videoBuffer": webm_payload()}),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["overallScore"], 0);
    assert!(!server.analyzed_path().exists());
    assert!(dir_is_empty(&server.media_dir()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_concurrent_requests_use_distinct_temp_files() {
    let server = setup_script_server(
        r#"echo '{"eyeContactScore":60,"facialExpressionScore":60,"gestureScore":60,"postureScore":60,"confidence":0.5}'"#,
        Duration::from_secs(30),
    )
    .await;

    let requests = (0..4).map(|i| {
        let router = server.router.clone();
        async move {
            post_json(
                &router,
                json!({"userId": 99, "scenario": "Client Pitch", "duration": i, "videoBuffer": webm_payload()}),
            )
            .await
        }
    });
    let results = futures::future::join_all(requests).await;

    let mut ids: Vec<i64> = results
        .iter()
        .map(|(status, body)| {
            assert_eq!(*status, StatusCode::CREATED);
            assert_eq!(body["overallScore"], 60);
            body["id"].as_i64().unwrap()
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    let mut paths = server.analyzed_paths();
    assert_eq!(paths.len(), 4);
    assert!(paths.iter().all(|p| !p.exists()), "{:?}", paths);
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4, "temp files were reused");
    assert!(dir_is_empty(&server.media_dir()));
}
