//! 外部视频分析进程的调用器
//!
//! 每个请求：写入唯一命名的临时文件 → 启动分析进程 → 解析标准输出 → 删除临时文件。
//! 分析器是否可用只在启动时探测一次，之后不可用的情况直接短路返回。

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::container::Container;
use crate::error::AnalysisError;
use crate::models::AnalysisDetails;
use crate::scenario::Scenario;

/// 分析脚本最多采样的帧数，用于从 framesAnalyzed 推导置信度
pub const FULL_COVERAGE_FRAMES: f64 = 50.0;

/// 分析器配置
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// 可执行程序（例如 python3）
    pub program: String,
    /// 放在脚本之前的固定参数（例如 `-3.11`）
    pub args: Vec<String>,
    /// 分析脚本路径（可选，直接调用可执行文件时为 None）
    pub script: Option<PathBuf>,
    /// 探测可用性时追加的参数
    pub probe_args: Vec<String>,
    /// 单次分析的超时时间，超时后终止进程
    pub timeout: Duration,
    /// 探测超时时间
    pub probe_timeout: Duration,
    /// 同时运行的分析进程上限
    pub max_concurrent: usize,
    /// 临时文件目录
    pub temp_dir: PathBuf,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            script: Some(PathBuf::from("ai-scripts/video_analysis_latest.py")),
            probe_args: vec!["--version".to_string()],
            timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(10),
            max_concurrent: 2,
            temp_dir: std::env::temp_dir().join("practice-analysis"),
        }
    }
}

/// 分析器的原始输出（兼容完整结果格式和逐帧检测脚本的格式）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzerOutput {
    status: Option<String>,
    message: Option<String>,
    error: Option<String>,
    overall_score: Option<f64>,
    eye_contact_score: Option<f64>,
    facial_expression_score: Option<f64>,
    gesture_score: Option<f64>,
    posture_score: Option<f64>,
    /// 逐帧检测脚本：人脸可见比例
    face_score: Option<f64>,
    /// 逐帧检测脚本：手部可见比例
    hand_score: Option<f64>,
    /// 逐帧检测脚本：姿态可见比例
    pose_score: Option<f64>,
    #[serde(default)]
    feedback: Vec<String>,
    confidence: Option<f64>,
    frames_analyzed: Option<u32>,
    analysis_details: Option<serde_json::Value>,
}

/// 解析后的分析结果（尚未限幅）
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerReport {
    pub overall: Option<f64>,
    pub eye_contact: f64,
    pub facial_expression: f64,
    pub gesture: f64,
    pub posture: f64,
    pub confidence: f64,
    pub feedback: Vec<String>,
    pub details: Option<AnalysisDetails>,
}

/// 解析分析进程的标准输出
///
/// 标准输出应当是一个 JSON 文档；如果前面混有日志行，取最后一个非空行再试一次。
pub fn parse_output(stdout: &[u8]) -> Result<AnalyzerReport, AnalysisError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Err(AnalysisError::MalformedOutput("empty output".to_string()));
    }

    let output: AnalyzerOutput = match serde_json::from_str(text) {
        Ok(output) => output,
        Err(first_err) => {
            let last_line = text.lines().rev().find(|line| !line.trim().is_empty());
            match last_line.map(|line| serde_json::from_str(line.trim())) {
                Some(Ok(output)) => output,
                _ => return Err(AnalysisError::MalformedOutput(first_err.to_string())),
            }
        }
    };

    if let Some(message) = output.error {
        return Err(AnalysisError::Reported(message));
    }
    if output
        .status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case("error"))
    {
        return Err(AnalysisError::Reported(
            output.message.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let require = |value: Option<f64>, field: &str| {
        value.ok_or_else(|| AnalysisError::MalformedOutput(format!("missing {}", field)))
    };
    // 逐帧检测脚本只给出人脸可见比例，同时用于目光接触和面部表情
    let eye_contact = require(output.eye_contact_score.or(output.face_score), "eyeContactScore")?;
    let facial_expression = require(
        output.facial_expression_score.or(output.face_score),
        "facialExpressionScore",
    )?;
    let gesture = require(output.gesture_score.or(output.hand_score), "gestureScore")?;
    let posture = require(output.posture_score.or(output.pose_score), "postureScore")?;
    let confidence = require(
        output.confidence.or(output
            .frames_analyzed
            .map(|frames| frames as f64 / FULL_COVERAGE_FRAMES)),
        "confidence",
    )?;

    let details = output.analysis_details.and_then(|value| {
        serde_json::from_value::<AnalysisDetails>(value)
            .map_err(|e| warn!("⚠️  [视频分析] analysisDetails 格式不符，改为按评分推导: {}", e))
            .ok()
    });

    Ok(AnalyzerReport {
        overall: output.overall_score,
        eye_contact,
        facial_expression,
        gesture,
        posture,
        confidence,
        feedback: output.feedback,
        details,
    })
}

/// 一次分析调用独占的临时媒体文件
///
/// 通过 `remove` 显式删除；请求被取消或 panic 时由 `Drop` 兜底删除。
#[derive(Debug)]
pub struct TempMediaFile {
    path: PathBuf,
    removed: bool,
}

impl TempMediaFile {
    /// 在 `dir` 下创建唯一命名的文件并写入内容
    ///
    /// 文件名由毫秒时间戳和 UUID 组成，并发请求之间不会冲突。
    pub async fn create(dir: &Path, payload: &[u8]) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let filename = format!(
            "video_analysis_{}_{}.{}",
            millis,
            uuid::Uuid::new_v4(),
            Container::sniff(payload).extension()
        );
        let path = dir.join(filename);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        // 文件已存在，之后写入失败也要由 guard 删除
        let guard = Self {
            path,
            removed: false,
        };
        file.write_all(payload).await?;
        file.flush().await?;

        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 删除临时文件
    pub async fn remove(mut self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("🧹 [视频分析] 已删除临时文件: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "⚠️  [视频分析] 删除临时文件失败: {} - {}",
                self.path.display(),
                e
            ),
        }
        self.removed = true;
    }
}

impl Drop for TempMediaFile {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "⚠️  [视频分析] 删除临时文件失败: {} - {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}

/// 外部分析进程调用器
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: Arc<AnalyzerConfig>,
    unavailable_reason: Option<String>,
    permits: Arc<Semaphore>,
}

impl Analyzer {
    /// 探测分析器是否可用（只在启动时调用一次）
    pub async fn probe(config: AnalyzerConfig) -> Self {
        let reason = probe_unavailable_reason(&config).await;
        match &reason {
            None => info!(
                "✅ [视频分析] 分析器可用: {} {}",
                config.program,
                config
                    .script
                    .as_ref()
                    .map(|s| s.display().to_string())
                    .unwrap_or_default()
            ),
            Some(reason) => warn!("⚠️  [视频分析] 分析器不可用，所有分析请求将返回零分: {}", reason),
        }
        Self::with_availability(config, reason)
    }

    /// 直接构造一个不可用的分析器
    pub fn unavailable(config: AnalyzerConfig, reason: impl Into<String>) -> Self {
        Self::with_availability(config, Some(reason.into()))
    }

    fn with_availability(config: AnalyzerConfig, unavailable_reason: Option<String>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config: Arc::new(config),
            unavailable_reason,
            permits,
        }
    }

    pub fn is_available(&self) -> bool {
        self.unavailable_reason.is_none()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// 分析一段视频
    pub async fn analyze(
        &self,
        payload: &[u8],
        scenario: Scenario,
        duration: f64,
    ) -> Result<AnalyzerReport, AnalysisError> {
        if !self.is_available() {
            return Err(AnalysisError::Unavailable);
        }

        // 超出并发上限的请求在这里排队
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AnalysisError::Unavailable)?;

        let temp_file = TempMediaFile::create(&self.config.temp_dir, payload)
            .await
            .map_err(|e| {
                error!("❌ [视频分析] 写入临时文件失败: {}", e);
                AnalysisError::TempFile(e)
            })?;
        info!(
            "⏳ [视频分析] 开始分析: file={}, size={} bytes, scenario={}, duration={}s",
            temp_file.path().display(),
            payload.len(),
            scenario,
            duration
        );

        let outcome = self.run_process(temp_file.path(), scenario, duration).await;
        temp_file.remove().await;
        outcome
    }

    async fn run_process(
        &self,
        video_path: &Path,
        scenario: Scenario,
        duration: f64,
    ) -> Result<AnalyzerReport, AnalysisError> {
        let start = Instant::now();

        let mut command = Command::new(&self.config.program);
        command.args(&self.config.args);
        if let Some(script) = &self.config.script {
            command.arg(script);
        }
        command
            .arg(video_path)
            .arg(scenario.label())
            .arg(duration.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            error!("❌ [视频分析] 启动分析进程失败: {}", e);
            AnalysisError::Spawn(e)
        })?;

        // 超时时 future 被丢弃，kill_on_drop 会终止子进程
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(AnalysisError::Spawn)?,
            Err(_) => {
                error!(
                    "❌ [视频分析] 分析超时（{:?}），已终止分析进程",
                    self.config.timeout
                );
                return Err(AnalysisError::Timeout(self.config.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            error!(
                "❌ [视频分析] 分析进程失败: code={:?}, stderr={}",
                output.status.code(),
                stderr
            );
            return Err(AnalysisError::ProcessFailure {
                code: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!("[视频分析] 分析进程 stderr: {}", stderr);
        }

        let report = parse_output(&output.stdout).map_err(|e| {
            error!("❌ [视频分析] {}", e);
            e
        })?;
        info!(
            "✅ [视频分析] 分析完成，耗时: {:.2}秒",
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}

/// 返回 None 表示可用，否则返回不可用原因
async fn probe_unavailable_reason(config: &AnalyzerConfig) -> Option<String> {
    if let Some(script) = &config.script {
        if tokio::fs::metadata(script).await.is_err() {
            return Some(format!("analysis script not found: {}", script.display()));
        }
    }

    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .args(&config.probe_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(config.probe_timeout, command.status()).await {
        Ok(Ok(status)) if status.success() => None,
        Ok(Ok(status)) => Some(format!(
            "{} exited with {:?} during probe",
            config.program,
            status.code()
        )),
        Ok(Err(e)) => Some(format!("{} could not be started: {}", config.program, e)),
        Err(_) => Some(format!(
            "{} did not answer the probe within {:?}",
            config.program, config.probe_timeout
        )),
    }
}
