use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::analyzer::AnalyzerConfig;

/// 配置文件名（不含前缀点）
const CONFIG_FILE_NAME: &str = "practice-analysis.ini";

/// 默认请求体上限（MB），与前端提示的 “MP4, WebM up to 100MB” 一致
const DEFAULT_MAX_UPLOAD_MB: usize = 100;

/// HTTP 服务配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 监听地址
    pub bind: String,
    /// 请求体上限（MB）
    pub max_upload_mb: usize,
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9000".to_string(),
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
        }
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" | "pg" => Ok(StorageBackend::Postgres),
            other => Err(anyhow::anyhow!("未知的存储后端: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Postgres 连接串
    pub database_url: Option<String>,
}

/// 完整的应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub analyzer: AnalyzerConfig,
    pub storage: StorageConfig,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

/// 单一来源（文件或环境变量）读到的配置，None 表示该来源未设置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialConfig {
    pub bind: Option<String>,
    pub max_upload_mb: Option<usize>,
    pub analyzer_program: Option<String>,
    pub analyzer_args: Option<Vec<String>>,
    pub analyzer_script: Option<String>,
    pub analyzer_probe_args: Option<Vec<String>>,
    pub analyzer_timeout_secs: Option<u64>,
    pub analyzer_max_concurrent: Option<usize>,
    pub temp_dir: Option<PathBuf>,
    pub storage_backend: Option<StorageBackend>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
}

impl PartialConfig {
    /// 用 `self` 覆盖 `lower` 中的同名字段
    fn over(self, lower: PartialConfig) -> PartialConfig {
        PartialConfig {
            bind: self.bind.or(lower.bind),
            max_upload_mb: self.max_upload_mb.or(lower.max_upload_mb),
            analyzer_program: self.analyzer_program.or(lower.analyzer_program),
            analyzer_args: self.analyzer_args.or(lower.analyzer_args),
            analyzer_script: self.analyzer_script.or(lower.analyzer_script),
            analyzer_probe_args: self.analyzer_probe_args.or(lower.analyzer_probe_args),
            analyzer_timeout_secs: self.analyzer_timeout_secs.or(lower.analyzer_timeout_secs),
            analyzer_max_concurrent: self.analyzer_max_concurrent.or(lower.analyzer_max_concurrent),
            temp_dir: self.temp_dir.or(lower.temp_dir),
            storage_backend: self.storage_backend.or(lower.storage_backend),
            database_url: self.database_url.or(lower.database_url),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    /// 合并到默认值之上
    fn into_app_config(self) -> AppConfig {
        let defaults = AppConfig::default_values();
        let analyzer_defaults = defaults.analyzer;

        // script 设为空字符串表示直接调用 program，不追加脚本参数
        let script = match self.analyzer_script {
            Some(script) if script.trim().is_empty() => None,
            Some(script) => Some(PathBuf::from(script)),
            None => analyzer_defaults.script,
        };

        AppConfig {
            server: ServerConfig {
                bind: self.bind.unwrap_or(defaults.server.bind),
                max_upload_mb: self.max_upload_mb.unwrap_or(defaults.server.max_upload_mb),
            },
            analyzer: AnalyzerConfig {
                program: self.analyzer_program.unwrap_or(analyzer_defaults.program),
                args: self.analyzer_args.unwrap_or(analyzer_defaults.args),
                script,
                probe_args: self.analyzer_probe_args.unwrap_or(analyzer_defaults.probe_args),
                timeout: self
                    .analyzer_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(analyzer_defaults.timeout),
                probe_timeout: analyzer_defaults.probe_timeout,
                max_concurrent: self
                    .analyzer_max_concurrent
                    .unwrap_or(analyzer_defaults.max_concurrent)
                    .max(1),
                temp_dir: self.temp_dir.unwrap_or(analyzer_defaults.temp_dir),
            },
            storage: StorageConfig {
                backend: self.storage_backend.unwrap_or(defaults.storage.backend),
                database_url: self.database_url.or(defaults.storage.database_url),
            },
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_values()
    }
}

impl AppConfig {
    fn default_values() -> Self {
        Self {
            server: ServerConfig::default(),
            analyzer: AnalyzerConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// 命令行参数中可覆盖的配置
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub storage_backend: Option<StorageBackend>,
    pub analyzer_program: Option<String>,
    pub analyzer_script: Option<String>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load(config_file: Option<&Path>, overrides: CliOverrides) -> Result<AppConfig> {
        // 1. 配置文件：显式指定的文件必须能读取，默认位置找不到则忽略
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };

        // 2. 环境变量
        let env_config = Self::load_from_env(|key| env::var(key).ok())?;

        // 3. 命令行
        let cli_config = PartialConfig {
            bind: overrides.bind,
            storage_backend: overrides.storage_backend,
            analyzer_program: overrides.analyzer_program,
            analyzer_script: overrides.analyzer_script,
            ..PartialConfig::default()
        };

        Ok(cli_config.over(env_config.over(file_config)).into_app_config())
    }

    /// 从环境变量加载配置（`lookup` 便于测试时替换环境）
    pub fn load_from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<PartialConfig> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = get("PRACTICE_BIND").or_else(|| get("PORT").map(|port| format!("0.0.0.0:{}", port)));

        Ok(PartialConfig {
            bind,
            max_upload_mb: parse_opt(get("PRACTICE_MAX_UPLOAD_MB"), "PRACTICE_MAX_UPLOAD_MB")?,
            analyzer_program: get("PRACTICE_ANALYZER_PROGRAM"),
            analyzer_args: get("PRACTICE_ANALYZER_ARGS").map(|v| split_args(&v)),
            // 空字符串在这里也有意义（不使用脚本），所以不过滤
            analyzer_script: lookup("PRACTICE_ANALYZER_SCRIPT"),
            analyzer_probe_args: get("PRACTICE_ANALYZER_PROBE_ARGS").map(|v| split_args(&v)),
            analyzer_timeout_secs: parse_opt(
                get("PRACTICE_ANALYZER_TIMEOUT_SECS"),
                "PRACTICE_ANALYZER_TIMEOUT_SECS",
            )?,
            analyzer_max_concurrent: parse_opt(
                get("PRACTICE_ANALYZER_MAX_CONCURRENT"),
                "PRACTICE_ANALYZER_MAX_CONCURRENT",
            )?,
            temp_dir: get("PRACTICE_TEMP_DIR").map(PathBuf::from),
            storage_backend: parse_opt(get("PRACTICE_STORAGE_BACKEND"), "PRACTICE_STORAGE_BACKEND")?,
            database_url: get("DATABASE_URL"),
            log_level: get("LOG_LEVEL"),
        })
    }

    /// 从 INI 配置文件加载配置
    pub fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 先读指定节，没有则回退到 [DEFAULT] 节
        let get = |section: &str, key: &str| {
            ini.get(section, key)
                .or_else(|| ini.get("DEFAULT", key))
                .filter(|v| !v.trim().is_empty())
        };

        Ok(PartialConfig {
            bind: get("server", "bind"),
            max_upload_mb: parse_opt(get("server", "max_upload_mb"), "server.max_upload_mb")?,
            analyzer_program: get("analyzer", "program"),
            analyzer_args: get("analyzer", "args").map(|v| split_args(&v)),
            analyzer_script: ini.get("analyzer", "script"),
            analyzer_probe_args: get("analyzer", "probe_args").map(|v| split_args(&v)),
            analyzer_timeout_secs: parse_opt(get("analyzer", "timeout_secs"), "analyzer.timeout_secs")?,
            analyzer_max_concurrent: parse_opt(
                get("analyzer", "max_concurrent"),
                "analyzer.max_concurrent",
            )?,
            temp_dir: get("analyzer", "temp_dir").map(PathBuf::from),
            storage_backend: parse_opt(get("storage", "backend"), "storage.backend")?,
            database_url: get("storage", "database_url"),
            log_level: get("logging", "level"),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        // 1. 当前目录
        let current_dir_config = PathBuf::from(CONFIG_FILE_NAME);
        if current_dir_config.exists() {
            return Self::load_from_file(&current_dir_config);
        }

        // 2. 当前目录的隐藏文件
        let hidden_config = PathBuf::from(format!(".{}", CONFIG_FILE_NAME));
        if hidden_config.exists() {
            return Self::load_from_file(&hidden_config);
        }

        // 3. 用户主目录
        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home).join(format!(".{}", CONFIG_FILE_NAME));
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        // 4. /etc (Linux/macOS)
        let etc_config = PathBuf::from("/etc").join(CONFIG_FILE_NAME);
        if etc_config.exists() {
            return Self::load_from_file(&etc_config);
        }

        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = AppConfig::default_values();
        let mut ini = configparser::ini::Ini::new();
        ini.set("server", "bind", Some(defaults.server.bind));
        ini.set("server", "max_upload_mb", Some(defaults.server.max_upload_mb.to_string()));
        ini.set("analyzer", "program", Some(defaults.analyzer.program));
        ini.set("analyzer", "args", Some(defaults.analyzer.args.join(" ")));
        ini.set(
            "analyzer",
            "script",
            Some(
                defaults
                    .analyzer
                    .script
                    .map(|s| s.display().to_string())
                    .unwrap_or_default(),
            ),
        );
        ini.set("analyzer", "probe_args", Some(defaults.analyzer.probe_args.join(" ")));
        ini.set(
            "analyzer",
            "timeout_secs",
            Some(defaults.analyzer.timeout.as_secs().to_string()),
        );
        ini.set(
            "analyzer",
            "max_concurrent",
            Some(defaults.analyzer.max_concurrent.to_string()),
        );
        ini.set(
            "analyzer",
            "temp_dir",
            Some(defaults.analyzer.temp_dir.display().to_string()),
        );
        ini.set("storage", "backend", Some("memory".to_string()));
        ini.set("storage", "database_url", Some("".to_string()));
        ini.set("logging", "level", Some(defaults.log_level));

        ini.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_opt<T>(value: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("配置项 {} 的值无效: {} ({})", key, v, e))
        })
        .transpose()
}
