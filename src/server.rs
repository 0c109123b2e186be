use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::handler;
use crate::pipeline::AnalysisPipeline;
use crate::storage::VideoAnalysisStore;

/// 请求体中 JSON 外壳等非视频内容的余量
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// 所有 handler 共享的状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VideoAnalysisStore>,
    pub pipeline: AnalysisPipeline,
    /// 解码后视频的大小上限
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn VideoAnalysisStore>,
        pipeline: AnalysisPipeline,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            pipeline,
            max_upload_bytes,
        }
    }
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    // base64 编码后体积约为原始视频的 4/3
    let body_limit = state
        .max_upload_bytes
        .saturating_mul(4)
        .div_ceil(3)
        .saturating_add(BODY_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(handler::health_check))
        .route("/health", get(handler::health_check))
        .route("/api/scenarios", get(handler::list_scenarios))
        .route("/api/video-analysis", post(handler::create_video_analysis))
        .route("/api/video-analyses", get(handler::list_video_analyses))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 启动 Web 服务，收到 Ctrl+C 后优雅退出
pub async fn start_web_server(bind: &str, state: AppState) -> Result<()> {
    let analyzer_available = state.pipeline.analyzer().is_available();
    let storage = state.store.backend_name();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    info!("Web 服务器启动在: http://{}", bind);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("分析器可用: {}, 存储后端: {}", analyzer_available, storage);
    info!("可用端点:");
    info!("  • 健康检查: GET  http://{}/health", bind);
    info!("  • 场景列表: GET  http://{}/api/scenarios", bind);
    info!("  • 提交分析: POST http://{}/api/video-analysis", bind);
    info!("  • 历史记录: GET  http://{}/api/video-analyses?userId=<id>", bind);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("启动服务器失败")?;

    info!("Web 服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，正在关闭...");
}
