use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use practice_analysis::{
    config::{AppConfig, CliOverrides, ConfigLoader, StorageBackend},
    pipeline::{AnalysisJob, AnalysisPipeline, VideoSource},
    storage, Analyzer, AppState, CaptureSession, FileMediaSource, HttpUploadTransport, Scenario,
};

/// 视频练习分析服务 - 录制、上传并分析沟通练习视频
#[derive(Parser, Debug)]
#[command(name = "practice-analysis")]
#[command(about = "视频练习分析服务：调用外部分析器为练习视频评分并保存历史记录", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Web 服务模式：启动 HTTP 服务器
    Serve {
        /// 监听地址（默认从环境变量 PRACTICE_BIND / PORT 读取，否则 0.0.0.0:9000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// 存储后端（memory 或 postgres）
        #[arg(long)]
        storage: Option<StorageBackend>,
    },
    /// CLI 模式：在本地分析一个视频文件，输出结果 JSON
    Analyze {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 练习场景
        #[arg(short, long, default_value_t = Scenario::default())]
        scenario: Scenario,

        /// 录制时长（秒）
        #[arg(short, long, default_value_t = 0.0)]
        duration: f64,

        /// 配置文件路径
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 客户端模式：把视频文件当作一次录制提交给分析服务
    Submit {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 分析服务地址
        #[arg(long, default_value = "http://127.0.0.1:9000")]
        server: String,

        /// 练习场景
        #[arg(short, long, default_value_t = Scenario::default())]
        scenario: Scenario,

        /// 录制时长（秒），不指定时按录制计时
        #[arg(short, long)]
        duration: Option<f64>,

        /// 用户 ID
        #[arg(long)]
        user_id: Option<i64>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 输出路径
        #[arg(short, long, default_value = "practice-analysis.ini")]
        output: PathBuf,
    },
}

fn init_logging(level: &str) {
    // RUST_LOG 优先，否则使用配置中的日志级别
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},tower_http=info", level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve {
            bind,
            config: config_file,
            storage: storage_backend,
        } => {
            let config = ConfigLoader::load(
                config_file.as_deref(),
                CliOverrides {
                    bind,
                    storage_backend,
                    ..CliOverrides::default()
                },
            )
            .context("加载配置失败")?;
            init_logging(&config.log_level);
            serve(config).await?;
        }
        Commands::Analyze {
            input,
            scenario,
            duration,
            config: config_file,
        } => {
            let config = ConfigLoader::load(config_file.as_deref(), CliOverrides::default())
                .context("加载配置失败")?;
            init_logging(&config.log_level);

            let payload = tokio::fs::read(&input)
                .await
                .context(format!("读取视频文件失败: {}", input.display()))?;
            let analyzer = Analyzer::probe(config.analyzer.clone()).await;
            let pipeline = AnalysisPipeline::new(analyzer, config.server.max_upload_bytes());
            let result = pipeline
                .run(AnalysisJob {
                    user_id: None,
                    scenario,
                    duration,
                    source: VideoSource::Buffer(payload),
                })
                .await;

            let scores = result.scores;
            let output = serde_json::json!({
                "scenario": result.scenario,
                "overallScore": scores.overall,
                "eyeContactScore": scores.eye_contact,
                "facialExpressionScore": scores.facial_expression,
                "gestureScore": scores.gesture,
                "postureScore": scores.posture,
                "feedback": result.feedback,
                "confidence": result.confidence,
                "analysisDetails": result.analysis_details,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Submit {
            input,
            server,
            scenario,
            duration,
            user_id,
        } => {
            init_logging("info");

            let source = FileMediaSource::new(&input).with_duration(duration);
            let transport = HttpUploadTransport::new(&server).context("创建上传客户端失败")?;
            let session = CaptureSession::new(Arc::new(source), Arc::new(transport), scenario)
                .with_user_id(user_id);

            session.start_recording().await.context("打开视频文件失败")?;
            let clip = session.stop_recording().await.context("读取录制内容失败")?;
            println!("录制: {} ({} bytes, {})", clip.preview_url(), clip.data().len(), session.elapsed_display());

            let result = session
                .submit_for_analysis()
                .await
                .context("提交分析失败")?;
            println!("综合评分: {}/100 (置信度 {:.0}%)", result.overall_score, result.confidence * 100.0);
            println!(
                "目光接触 {} | 面部表情 {} | 手势 {} | 姿态 {}",
                result.eye_contact_score,
                result.facial_expression_score,
                result.gesture_score,
                result.posture_score
            );
            for line in &result.feedback {
                println!("  • {}", line);
            }
        }
        Commands::InitConfig { output } => {
            ConfigLoader::create_default_config(&output)
                .context(format!("生成配置文件失败: {}", output.display()))?;
            println!("✓ 已生成默认配置文件: {}", output.display());
        }
    }

    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let store = storage::connect(&config.storage).await?;
    let analyzer = Analyzer::probe(config.analyzer.clone()).await;
    let max_upload_bytes = config.server.max_upload_bytes();
    let pipeline = AnalysisPipeline::new(analyzer, max_upload_bytes);
    let state = AppState::new(store, pipeline, max_upload_bytes);

    practice_analysis::start_web_server(&config.server.bind, state).await
}
