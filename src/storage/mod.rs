//! 分析结果存储
//!
//! 通过 `VideoAnalysisStore` 接口访问，启动时根据配置选择内存或 Postgres 实现，
//! 以 `Arc<dyn VideoAnalysisStore>` 注入到服务中。

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::models::{NewVideoAnalysis, VideoAnalysisResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait VideoAnalysisStore: Send + Sync {
    /// 保存一条分析结果，分配唯一 id 和创建时间
    async fn create_video_analysis(
        &self,
        analysis: NewVideoAnalysis,
    ) -> Result<VideoAnalysisResult, StorageError>;

    /// 查询用户的历史结果，按创建时间倒序；未指定用户时返回空列表
    async fn get_user_video_analyses(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<VideoAnalysisResult>, StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// 按配置创建存储后端
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn VideoAnalysisStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("使用内存存储");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("storage.backend = postgres 需要配置 database_url 或 DATABASE_URL")?;
            let store = PostgresStore::connect(url)
                .await
                .context("连接 Postgres 失败")?;
            Ok(Arc::new(store))
        }
    }
}
