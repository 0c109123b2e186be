use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::info;

use super::VideoAnalysisStore;
use crate::error::StorageError;
use crate::models::{AnalysisDetails, NewVideoAnalysis, VideoAnalysisResult};
use crate::scenario::Scenario;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS video_analyses (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT,
    scenario TEXT NOT NULL,
    overall_score SMALLINT NOT NULL CHECK (overall_score BETWEEN 0 AND 100),
    eye_contact_score SMALLINT NOT NULL CHECK (eye_contact_score BETWEEN 0 AND 100),
    facial_expression_score SMALLINT NOT NULL CHECK (facial_expression_score BETWEEN 0 AND 100),
    gesture_score SMALLINT NOT NULL CHECK (gesture_score BETWEEN 0 AND 100),
    posture_score SMALLINT NOT NULL CHECK (posture_score BETWEEN 0 AND 100),
    feedback JSONB NOT NULL,
    confidence DOUBLE PRECISION NOT NULL CHECK (confidence BETWEEN 0 AND 1),
    analysis_details JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_video_analyses_user_id ON video_analyses (user_id)";

const SELECT_COLUMNS: &str = "id, user_id, scenario, overall_score, eye_contact_score, \
     facial_expression_score, gesture_score, posture_score, feedback, confidence, \
     analysis_details, created_at";

/// Postgres 存储，id 由 BIGSERIAL 序列分配
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("✓ Postgres 存储已连接");
        Ok(store)
    }

    /// 建表（幂等）
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_USER_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_result(row: &PgRow) -> Result<VideoAnalysisResult, StorageError> {
    let scenario: String = row.try_get("scenario")?;
    let scenario: Scenario = scenario
        .parse()
        .map_err(|e: crate::scenario::UnknownScenario| StorageError::InvalidRow(e.to_string()))?;
    let score = |column: &str| -> Result<u8, StorageError> {
        let value: i16 = row.try_get(column)?;
        u8::try_from(value)
            .map_err(|_| StorageError::InvalidRow(format!("{} out of range: {}", column, value)))
    };
    let Json(feedback): Json<Vec<String>> = row.try_get("feedback")?;
    let Json(analysis_details): Json<AnalysisDetails> = row.try_get("analysis_details")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(VideoAnalysisResult {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        scenario,
        overall_score: score("overall_score")?,
        eye_contact_score: score("eye_contact_score")?,
        facial_expression_score: score("facial_expression_score")?,
        gesture_score: score("gesture_score")?,
        posture_score: score("posture_score")?,
        feedback,
        confidence: row.try_get("confidence")?,
        analysis_details,
        created_at,
    })
}

#[async_trait]
impl VideoAnalysisStore for PostgresStore {
    async fn create_video_analysis(
        &self,
        analysis: NewVideoAnalysis,
    ) -> Result<VideoAnalysisResult, StorageError> {
        let sql = format!(
            "INSERT INTO video_analyses (user_id, scenario, overall_score, eye_contact_score, \
             facial_expression_score, gesture_score, posture_score, feedback, confidence, \
             analysis_details) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(analysis.user_id)
            .bind(analysis.scenario.label())
            .bind(analysis.scores.overall as i16)
            .bind(analysis.scores.eye_contact as i16)
            .bind(analysis.scores.facial_expression as i16)
            .bind(analysis.scores.gesture as i16)
            .bind(analysis.scores.posture as i16)
            .bind(Json(&analysis.feedback))
            .bind(analysis.confidence)
            .bind(Json(&analysis.analysis_details))
            .fetch_one(&self.pool)
            .await?;
        row_to_result(&row)
    }

    async fn get_user_video_analyses(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<VideoAnalysisResult>, StorageError> {
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {} FROM video_analyses WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_result).collect()
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
