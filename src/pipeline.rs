use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::analyzer::Analyzer;
use crate::error::AnalysisError;
use crate::models::NewVideoAnalysis;
use crate::scenario::Scenario;
use crate::scoring;

/// 待分析视频的来源
#[derive(Debug, Clone)]
pub enum VideoSource {
    /// 请求体中携带的视频内容
    Buffer(Vec<u8>),
    /// 需要服务端下载的 http(s) 地址
    Url(String),
}

/// 一次分析任务
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub user_id: Option<i64>,
    pub scenario: Scenario,
    /// 录制时长（秒）
    pub duration: f64,
    pub source: VideoSource,
}

/// 分析流水线：获取视频 → 调用分析器 → 评分/降级
///
/// 总是返回结构完整的结果，分析器侧的任何失败都会降级为零分结果。
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    analyzer: Analyzer,
    http: reqwest::Client,
    max_video_bytes: usize,
}

impl AnalysisPipeline {
    pub fn new(analyzer: Analyzer, max_video_bytes: usize) -> Self {
        // 不跟随重定向，下载地址只能是校验过的那个
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            analyzer,
            http,
            max_video_bytes,
        }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub async fn run(&self, job: AnalysisJob) -> NewVideoAnalysis {
        let total_start = Instant::now();
        info!(
            "🎬 [分析流水线] 收到分析任务: scenario={}, duration={}s, user={:?}",
            job.scenario, job.duration, job.user_id
        );

        // 分析器不可用时不下载、不写临时文件
        let outcome = if !self.analyzer.is_available() {
            Err(AnalysisError::Unavailable)
        } else {
            match self.load_video(job.source).await {
                Ok(payload) => {
                    self.analyzer
                        .analyze(&payload, job.scenario, job.duration)
                        .await
                }
                Err(e) => Err(e),
            }
        };

        let result = match outcome {
            Ok(report) => scoring::success_result(job.user_id, job.scenario, job.duration, report),
            Err(e) => {
                // stderr 等诊断信息只进日志，不进返回给客户端的结果
                error!("❌ [分析流水线] 分析失败: {}", e);
                scoring::failure_result(job.user_id, job.scenario, job.duration, &e)
            }
        };

        info!(
            "✅ [分析流水线] 完成，总耗时: {:.2}秒, overall={}, confidence={:.2}",
            total_start.elapsed().as_secs_f64(),
            result.scores.overall,
            result.confidence
        );
        result
    }

    async fn load_video(&self, source: VideoSource) -> Result<Vec<u8>, AnalysisError> {
        match source {
            VideoSource::Buffer(bytes) => Ok(bytes),
            VideoSource::Url(url) => self.download(&url).await,
        }
    }

    /// 下载视频，超过大小上限立即中止
    async fn download(&self, url: &str) -> Result<Vec<u8>, AnalysisError> {
        let start = Instant::now();
        info!("⏳ [分析流水线] 正在下载视频: {}", url);
        ensure_public_host(url).await?;

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AnalysisError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnalysisError::Download(format!(
                "server answered {}",
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_video_bytes {
                return Err(AnalysisError::Download(format!(
                    "video is {} bytes, limit is {}",
                    length, self.max_video_bytes
                )));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AnalysisError::Download(e.to_string()))?
        {
            if bytes.len() + chunk.len() > self.max_video_bytes {
                return Err(AnalysisError::Download(format!(
                    "video exceeds limit of {} bytes",
                    self.max_video_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        info!(
            "✅ [分析流水线] 下载完成: {} bytes，耗时: {:.2}秒",
            bytes.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(bytes)
    }
}

/// 是否是公网地址（回环、私有、链路本地、保留段都不是）
pub fn is_public_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                // 100.64.0.0/10 运营商共享地址
                || (a == 100 && (64..=127).contains(&b))
                || a == 0)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public_address(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 唯一本地地址
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 链路本地地址
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

/// 下载前解析主机名，任何一个解析结果不是公网地址都拒绝
async fn ensure_public_host(url: &str) -> Result<(), AnalysisError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| AnalysisError::Download(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AnalysisError::Download("url has no host".to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);

    let addresses: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| AnalysisError::Download(format!("cannot resolve {}: {}", host, e)))?
        .map(|addr| addr.ip())
        .collect();
    if addresses.is_empty() || !addresses.iter().copied().all(is_public_address) {
        return Err(AnalysisError::Download(format!(
            "{} does not resolve to a public address",
            host
        )));
    }
    Ok(())
}
