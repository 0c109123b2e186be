//! 录制客户端
//!
//! 一个录制会话的生命周期：
//!
//! ```text
//! Idle → Recording → Recorded → Analyzing → Analyzed
//!          ↑            │  ↑         │          │
//!          └── reset ───┘  └─ 失败 ──┘          │
//!          └──────────────── reset ─────────────┘
//! ```
//!
//! 媒体来源（摄像头或文件）通过 `MediaSource` 注入，上传通过 `UploadTransport` 注入。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::container::Container;
use crate::error::CaptureError;
use crate::models::VideoAnalysisResult;
use crate::scenario::Scenario;
use crate::transport::{UploadTransport, VideoUpload};

/// 文件来源每次交付的数据块大小
const FILE_CHUNK_SIZE: usize = 256 * 1024;

/// 媒体来源（摄像头 + 麦克风）
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// 请求访问权限并打开媒体流；被拒绝时返回 `CaptureError::PermissionDenied`
    async fn open(&self) -> Result<Box<dyn MediaStream>, CaptureError>;
}

/// 已打开的媒体流，drop 时释放所有轨道
#[async_trait]
pub trait MediaStream: Send {
    /// 下一个录制数据块，`None` 表示来源已结束
    ///
    /// 必须可以安全取消：被取消的调用不能丢失数据。
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;

    /// 停止所有轨道，返回尚未交付的数据
    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// 来源自带的时长（例如已有的视频文件）
    fn declared_duration(&self) -> Option<f64> {
        None
    }

    /// 来源在本地磁盘上的位置
    fn origin(&self) -> Option<&Path> {
        None
    }
}

/// 把已有的视频文件当作一次录制
#[derive(Debug, Clone)]
pub struct FileMediaSource {
    path: PathBuf,
    duration: Option<f64>,
}

impl FileMediaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }
}

#[async_trait]
impl MediaSource for FileMediaSource {
    async fn open(&self) -> Result<Box<dyn MediaStream>, CaptureError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(format!("{}: {}", self.path.display(), e))
            }
            _ => CaptureError::Media(format!("{}: {}", self.path.display(), e)),
        })?;
        Ok(Box::new(FileMediaStream {
            path: self.path.clone(),
            data,
            offset: 0,
            duration: self.duration,
        }))
    }
}

struct FileMediaStream {
    path: PathBuf,
    data: Vec<u8>,
    offset: usize,
    duration: Option<f64>,
}

#[async_trait]
impl MediaStream for FileMediaStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + FILE_CHUNK_SIZE).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }

    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError> {
        let rest = self.data.get(self.offset..).unwrap_or_default().to_vec();
        self.offset = self.data.len();
        Ok(rest)
    }

    fn declared_duration(&self) -> Option<f64> {
        self.duration
    }

    fn origin(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Recorded,
    Analyzing,
    Analyzed,
}

impl CaptureState {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Recording => "recording",
            CaptureState::Recorded => "recorded",
            CaptureState::Analyzing => "analyzing",
            CaptureState::Analyzed => "analyzed",
        }
    }
}

/// 停止录制后得到的完整视频
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedClip {
    id: uuid::Uuid,
    data: Vec<u8>,
    container: Container,
    duration: f64,
    origin: Option<PathBuf>,
}

impl RecordedClip {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn container(&self) -> Container {
        self.container
    }

    /// 时长（秒）
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// 本地预览地址：文件来源是 `file://` 路径，内存录制是 `memory:` 标识
    pub fn preview_url(&self) -> String {
        match &self.origin {
            Some(path) => format!("file://{}", path.display()),
            None => format!("memory:{}.{}", self.id, self.container.extension()),
        }
    }
}

/// 把秒数格式化为 `MM:SS`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

struct RecordingTask {
    stop_tx: oneshot::Sender<()>,
    ticker: JoinHandle<()>,
    recorder: JoinHandle<Result<Vec<u8>, CaptureError>>,
    declared_duration: Option<f64>,
    origin: Option<PathBuf>,
}

impl RecordingTask {
    fn abort(self) {
        self.ticker.abort();
        // recorder 持有媒体流，abort 后流被 drop，轨道随之释放
        self.recorder.abort();
    }
}

struct Inner {
    state: CaptureState,
    scenario: Scenario,
    /// 每次 reset 递增，用于丢弃过期的异步结果
    generation: u64,
    opening: bool,
    started_at: Option<DateTime<Utc>>,
    recording: Option<RecordingTask>,
    clip: Option<RecordedClip>,
    result: Option<VideoAnalysisResult>,
    last_error: Option<String>,
}

/// 一个录制会话
pub struct CaptureSession {
    source: Arc<dyn MediaSource>,
    transport: Arc<dyn UploadTransport>,
    user_id: Option<i64>,
    elapsed: Arc<AtomicU64>,
    inner: Mutex<Inner>,
}

impl CaptureSession {
    pub fn new(
        source: Arc<dyn MediaSource>,
        transport: Arc<dyn UploadTransport>,
        scenario: Scenario,
    ) -> Self {
        Self {
            source,
            transport,
            user_id: None,
            elapsed: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(Inner {
                state: CaptureState::Idle,
                scenario,
                generation: 0,
                opening: false,
                started_at: None,
                recording: None,
                clip: None,
                result: None,
                last_error: None,
            }),
        }
    }

    pub fn with_user_id(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn scenario(&self) -> Scenario {
        self.lock().scenario
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn clip(&self) -> Option<RecordedClip> {
        self.lock().clip.clone()
    }

    pub fn result(&self) -> Option<VideoAnalysisResult> {
        self.lock().result.clone()
    }

    /// 最近一次失败的提示信息
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.load(Ordering::Relaxed)
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_secs())
    }

    /// 切换场景，只能在未录制或已录制未提交时进行
    pub fn select_scenario(&self, scenario: Scenario) -> Result<(), CaptureError> {
        let mut inner = self.lock();
        match inner.state {
            CaptureState::Idle | CaptureState::Recorded => {
                inner.scenario = scenario;
                Ok(())
            }
            other => Err(CaptureError::InvalidState {
                action: "change scenario",
                state: other.name(),
            }),
        }
    }

    /// 请求权限并开始录制
    pub async fn start_recording(&self) -> Result<(), CaptureError> {
        let generation = {
            let mut inner = self.lock();
            if inner.state != CaptureState::Idle || inner.opening {
                return Err(CaptureError::InvalidState {
                    action: "start recording",
                    state: if inner.opening { "starting" } else { inner.state.name() },
                });
            }
            inner.opening = true;
            inner.last_error = None;
            inner.generation
        };

        let opened = self.source.open().await;

        let mut inner = self.lock();
        inner.opening = false;
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("⚠️  [录制] 无法打开媒体来源: {}", e);
                inner.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        if inner.generation != generation {
            // 打开期间被 reset，直接释放流
            return Err(CaptureError::InvalidState {
                action: "start recording",
                state: "reset",
            });
        }

        let declared_duration = stream.declared_duration();
        let origin = stream.origin().map(Path::to_path_buf);
        let (stop_tx, stop_rx) = oneshot::channel();

        self.elapsed.store(0, Ordering::Relaxed);
        let elapsed = self.elapsed.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // 第一次 tick 立即完成
            interval.tick().await;
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::Relaxed);
            }
        });
        let recorder = tokio::spawn(record(stream, stop_rx));

        inner.recording = Some(RecordingTask {
            stop_tx,
            ticker,
            recorder,
            declared_duration,
            origin,
        });
        inner.state = CaptureState::Recording;
        inner.started_at = Some(Utc::now());
        info!("🎥 [录制] 开始录制: scenario={}", inner.scenario);
        Ok(())
    }

    /// 停止录制，拼接数据块得到完整视频
    pub async fn stop_recording(&self) -> Result<RecordedClip, CaptureError> {
        let (task, generation) = {
            let mut inner = self.lock();
            match (inner.state, inner.recording.take()) {
                (CaptureState::Recording, Some(task)) => (task, inner.generation),
                (state, _) => {
                    return Err(CaptureError::InvalidState {
                        action: "stop recording",
                        state: if state == CaptureState::Recording { "stopping" } else { state.name() },
                    })
                }
            }
        };

        task.ticker.abort();
        // recorder 可能已经因为错误提前结束，发送失败无妨
        let _ = task.stop_tx.send(());
        let recorded = match task.recorder.await {
            Ok(result) => result,
            Err(e) => Err(CaptureError::Media(format!("recorder task failed: {}", e))),
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            return Err(CaptureError::InvalidState {
                action: "stop recording",
                state: "reset",
            });
        }
        let data = match recorded {
            Ok(data) => data,
            Err(e) => {
                warn!("⚠️  [录制] 录制失败: {}", e);
                inner.state = CaptureState::Idle;
                inner.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        if data.is_empty() {
            inner.state = CaptureState::Idle;
            inner.last_error = Some(CaptureError::NoRecording.to_string());
            return Err(CaptureError::NoRecording);
        }

        let elapsed = self.elapsed.load(Ordering::Relaxed) as f64;
        let clip = RecordedClip {
            id: uuid::Uuid::new_v4(),
            container: Container::sniff(&data),
            duration: task.declared_duration.unwrap_or(elapsed),
            origin: task.origin,
            data,
        };
        info!(
            "⏹️  [录制] 录制结束: {} bytes, container={:?}, duration={}s",
            clip.data.len(),
            clip.container,
            clip.duration
        );
        inner.clip = Some(clip.clone());
        inner.state = CaptureState::Recorded;
        Ok(clip)
    }

    /// 提交录制结果进行分析
    ///
    /// 同一会话同时只允许一个分析请求；失败后回到 Recorded，可以重试。
    pub async fn submit_for_analysis(&self) -> Result<VideoAnalysisResult, CaptureError> {
        let (upload, generation) = {
            let mut inner = self.lock();
            match inner.state {
                CaptureState::Recorded => {}
                CaptureState::Analyzing => return Err(CaptureError::AnalysisInFlight),
                other => {
                    return Err(CaptureError::InvalidState {
                        action: "submit for analysis",
                        state: other.name(),
                    })
                }
            }
            let clip = inner.clip.as_ref().ok_or(CaptureError::NoRecording)?;
            let upload = VideoUpload {
                user_id: self.user_id,
                scenario: inner.scenario,
                duration: clip.duration,
                payload: clip.data.clone(),
            };
            inner.state = CaptureState::Analyzing;
            inner.last_error = None;
            (upload, inner.generation)
        };

        let mut guard = AnalyzingGuard {
            session: self,
            generation,
            settled: false,
        };
        let outcome = self.transport.upload(&upload).await;
        guard.settled = true;

        let mut inner = self.lock();
        let current = inner.generation == generation && inner.state == CaptureState::Analyzing;
        match outcome {
            Ok(result) => {
                if current {
                    info!(
                        "✅ [录制] 分析完成: overall={}, confidence={:.2}",
                        result.overall_score, result.confidence
                    );
                    inner.result = Some(result.clone());
                    inner.state = CaptureState::Analyzed;
                }
                Ok(result)
            }
            Err(e) => {
                if current {
                    warn!("⚠️  [录制] 上传失败，可以重试: {}", e);
                    inner.last_error = Some(e.to_string());
                    inner.state = CaptureState::Recorded;
                }
                Err(CaptureError::Upload(e))
            }
        }
    }

    /// 丢弃录制和结果，回到初始状态
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(task) = inner.recording.take() {
            task.abort();
        }
        inner.state = CaptureState::Idle;
        inner.started_at = None;
        inner.clip = None;
        inner.result = None;
        inner.last_error = None;
        self.elapsed.store(0, Ordering::Relaxed);
        info!("🔄 [录制] 会话已重置");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = inner.recording.take() {
            task.abort();
        }
    }
}

/// 提交被取消（future 被丢弃）时把状态退回 Recorded
struct AnalyzingGuard<'a> {
    session: &'a CaptureSession,
    generation: u64,
    settled: bool,
}

impl Drop for AnalyzingGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.session.lock();
        if inner.generation == self.generation && inner.state == CaptureState::Analyzing {
            inner.state = CaptureState::Recorded;
        }
    }
}

/// 收集数据块直到收到停止信号
async fn record(
    mut stream: Box<dyn MediaStream>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<Vec<u8>, CaptureError> {
    let mut data = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            chunk = stream.next_chunk() => match chunk? {
                Some(chunk) => data.extend_from_slice(&chunk),
                // 来源已结束，等待用户停止
                None => {
                    let _ = (&mut stop_rx).await;
                    break;
                }
            },
        }
    }
    data.extend_from_slice(&stream.stop().await?);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::models::{AnalysisDetails, AnalysisMethod, NewVideoAnalysis, Scores};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const WEBM_MAGIC: [u8; 4] = [0x1a, 0x45, 0xdf, 0xa3];

    struct DeniedSource;

    #[async_trait]
    impl MediaSource for DeniedSource {
        async fn open(&self) -> Result<Box<dyn MediaStream>, CaptureError> {
            Err(CaptureError::PermissionDenied("NotAllowedError".to_string()))
        }
    }

    struct ScriptedSource;

    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        async fn open(&self) -> Result<Box<dyn MediaStream>, CaptureError> {
            Ok(Box::new(ScriptedStream {
                chunks: VecDeque::from(vec![WEBM_MAGIC.to_vec(), b"frames".to_vec()]),
            }))
        }
    }

    #[async_trait]
    impl MediaStream for ScriptedStream {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            Ok(self.chunks.pop_front())
        }

        async fn stop(&mut self) -> Result<Vec<u8>, CaptureError> {
            Ok(b"tail".to_vec())
        }
    }

    /// 等到 release 被通知才返回；fail 为 true 时返回传输错误
    struct GatedTransport {
        release: Notify,
        fail: bool,
        calls: AtomicUsize,
    }

    impl GatedTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                release: Notify::new(),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UploadTransport for GatedTransport {
        async fn upload(&self, upload: &VideoUpload) -> Result<VideoAnalysisResult, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            if self.fail {
                return Err(UploadError::Rejected {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            let scores = Scores {
                overall: 85,
                eye_contact: 90,
                facial_expression: 80,
                gesture: 75,
                posture: 88,
            };
            Ok(VideoAnalysisResult::from_new(
                1,
                Utc::now(),
                NewVideoAnalysis {
                    user_id: upload.user_id,
                    scenario: upload.scenario,
                    scores,
                    feedback: vec!["Good job".to_string()],
                    confidence: 0.9,
                    analysis_details: AnalysisDetails::derive(
                        &scores,
                        upload.duration,
                        AnalysisMethod::ExternalAnalyzer,
                    ),
                },
            ))
        }
    }

    async fn recorded_session(transport: Arc<GatedTransport>) -> Arc<CaptureSession> {
        let session = Arc::new(CaptureSession::new(
            Arc::new(ScriptedSource),
            transport,
            Scenario::ClientPitch,
        ));
        session.start_recording().await.unwrap();
        session.stop_recording().await.unwrap();
        session
    }

    async fn wait_for_state(session: &CaptureSession, state: CaptureState) {
        while session.state() != state {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(125), "02:05");
        assert_eq!(format_elapsed(3599), "59:59");
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let session = CaptureSession::new(Arc::new(DeniedSource), GatedTransport::new(false), Scenario::default());
        let err = session.start_recording().await.unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert_eq!(session.state(), CaptureState::Idle);
        assert!(session.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_ticks_once_per_second() {
        let session = CaptureSession::new(Arc::new(ScriptedSource), GatedTransport::new(false), Scenario::PublicSpeaking);
        session.start_recording().await.unwrap();
        assert_eq!(session.state(), CaptureState::Recording);

        tokio::time::sleep(Duration::from_millis(125_500)).await;
        assert_eq!(session.elapsed_display(), "02:05");

        let clip = session.stop_recording().await.unwrap();
        assert_eq!(clip.duration(), 125.0);
        assert_eq!(clip.container(), Container::WebM);
        assert!(clip.data().ends_with(b"framestail"));
        assert!(clip.preview_url().starts_with("memory:"));
        assert!(clip.preview_url().ends_with(".webm"));

        // 停止后计时不再增加
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.elapsed_secs(), 125);
    }

    #[tokio::test]
    async fn test_second_submit_while_in_flight_is_rejected() {
        let transport = GatedTransport::new(false);
        let session = recorded_session(transport.clone()).await;

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.submit_for_analysis().await }
        });
        wait_for_state(&session, CaptureState::Analyzing).await;

        let err = session.submit_for_analysis().await.unwrap_err();
        assert!(matches!(err, CaptureError::AnalysisInFlight));

        transport.release.notify_one();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.feedback, vec!["Good job".to_string()]);
        assert_eq!(session.state(), CaptureState::Analyzed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_returns_to_recorded() {
        let transport = GatedTransport::new(true);
        let session = recorded_session(transport.clone()).await;

        transport.release.notify_one();
        let err = session.submit_for_analysis().await.unwrap_err();
        assert!(matches!(err, CaptureError::Upload(UploadError::Rejected { status: 503, .. })));
        assert_eq!(session.state(), CaptureState::Recorded);
        assert!(session.clip().is_some());

        // 可以重试
        transport.release.notify_one();
        assert!(session.submit_for_analysis().await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let transport = GatedTransport::new(false);
        let session = CaptureSession::new(Arc::new(ScriptedSource), transport, Scenario::default());

        assert!(matches!(
            session.stop_recording().await.unwrap_err(),
            CaptureError::InvalidState { state: "idle", .. }
        ));
        assert!(matches!(
            session.submit_for_analysis().await.unwrap_err(),
            CaptureError::InvalidState { state: "idle", .. }
        ));

        session.start_recording().await.unwrap();
        assert!(matches!(
            session.start_recording().await.unwrap_err(),
            CaptureError::InvalidState { state: "recording", .. }
        ));
        assert!(session.select_scenario(Scenario::ClientPitch).is_err());
    }

    #[tokio::test]
    async fn test_reset_discards_everything() {
        let transport = GatedTransport::new(false);
        let session = recorded_session(transport.clone()).await;
        transport.release.notify_one();
        session.submit_for_analysis().await.unwrap();
        assert_eq!(session.state(), CaptureState::Analyzed);

        session.reset();
        assert_eq!(session.state(), CaptureState::Idle);
        assert!(session.clip().is_none());
        assert!(session.result().is_none());
        assert_eq!(session.elapsed_display(), "00:00");

        session.select_scenario(Scenario::DifficultConversation).unwrap();
        assert_eq!(session.scenario(), Scenario::DifficultConversation);
    }

    #[tokio::test]
    async fn test_reset_while_recording_stops_capture() {
        let session = CaptureSession::new(Arc::new(ScriptedSource), GatedTransport::new(false), Scenario::default());
        session.start_recording().await.unwrap();
        session.reset();
        assert_eq!(session.state(), CaptureState::Idle);
        assert!(session.stop_recording().await.is_err());
        session.start_recording().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_source_records_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut contents = vec![0, 0, 0, 0x18];
        contents.extend_from_slice(b"ftypmp42");
        contents.resize(FILE_CHUNK_SIZE * 2 + 17, 7);
        std::fs::write(&path, &contents).unwrap();

        let source = FileMediaSource::new(&path).with_duration(Some(42.0));
        let session = CaptureSession::new(Arc::new(source), GatedTransport::new(false), Scenario::default());
        session.start_recording().await.unwrap();
        let clip = session.stop_recording().await.unwrap();

        assert_eq!(clip.data(), contents.as_slice());
        assert_eq!(clip.container(), Container::Mp4);
        assert_eq!(clip.duration(), 42.0);
        assert_eq!(clip.preview_url(), format!("file://{}", path.display()));
    }

    #[tokio::test]
    async fn test_missing_file_is_media_error() {
        let source = FileMediaSource::new("/nonexistent/clip.webm");
        let session = CaptureSession::new(Arc::new(source), GatedTransport::new(false), Scenario::default());
        assert!(matches!(
            session.start_recording().await.unwrap_err(),
            CaptureError::Media(_)
        ));
        assert_eq!(session.state(), CaptureState::Idle);
    }
}
