pub mod analyzer;
pub mod capture;
pub mod config;
pub mod container;
pub mod error;
pub mod handler;
pub mod models;
pub mod pipeline;
pub mod scenario;
pub mod scoring;
pub mod server;
pub mod storage;
pub mod transport;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use capture::{CaptureSession, CaptureState, FileMediaSource, MediaSource, MediaStream, RecordedClip};
pub use config::{AppConfig, CliOverrides, ConfigLoader, StorageBackend};
pub use error::{AnalysisError, ApiError, CaptureError, StorageError, UploadError};
pub use models::{AnalysisDetails, AnalysisMethod, NewVideoAnalysis, Scores, VideoAnalysisResult};
pub use pipeline::{AnalysisJob, AnalysisPipeline, VideoSource};
pub use scenario::Scenario;
pub use server::{build_router, start_web_server, AppState};
pub use storage::{MemoryStore, PostgresStore, VideoAnalysisStore};
pub use transport::{HttpUploadTransport, UploadTransport, VideoUpload};
