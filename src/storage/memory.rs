use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::VideoAnalysisStore;
use crate::error::StorageError;
use crate::models::{NewVideoAnalysis, VideoAnalysisResult};

/// 进程内存储，重启后数据丢失
#[derive(Debug)]
pub struct MemoryStore {
    analyses: RwLock<HashMap<i64, VideoAnalysisResult>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            analyses: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.analyses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.analyses.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoAnalysisStore for MemoryStore {
    async fn create_video_analysis(
        &self,
        analysis: NewVideoAnalysis,
    ) -> Result<VideoAnalysisResult, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let result = VideoAnalysisResult::from_new(id, Utc::now(), analysis);
        self.analyses.write().await.insert(id, result.clone());
        Ok(result)
    }

    async fn get_user_video_analyses(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<VideoAnalysisResult>, StorageError> {
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };

        let mut results: Vec<VideoAnalysisResult> = self
            .analyses
            .read()
            .await
            .values()
            .filter(|analysis| analysis.user_id == Some(user_id))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
