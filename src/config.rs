//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VOICE_CMD__*` 覆盖（双下划线表示嵌套，如 `VOICE_CMD__POLLING__MAX_ATTEMPTS=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::command::PollOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendSection,
    pub polling: PollingSection,
    pub console: ConsoleSection,
}

/// 后端实现选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Http,
    /// 本地模拟后端，不发网络请求
    Simulated,
}

/// [backend] 段：指令 API 地址与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub mode: BackendMode,
    pub base_url: String,
    pub submit_path: String,
    /// `{id}` 会被替换为任务 ID
    pub status_path: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            mode: BackendMode::Http,
            base_url: "http://127.0.0.1:8000".to_string(),
            submit_path: "/api/voice-commands/".to_string(),
            status_path: "/api/voice-commands/{id}/status/".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// [polling] 段：状态轮询的次数、退避与总时长预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// 单次退避上限
    pub max_delay_ms: u64,
    pub max_total_ms: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        let defaults = PollOptions::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            max_total_ms: defaults.max_total.as_millis() as u64,
        }
    }
}

impl PollingSection {
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_total: Duration::from_millis(self.max_total_ms),
        }
    }
}

/// [console] 段：编排器的展示与容错行为
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleSection {
    /// 即时成功时 Generating → Success 的过渡时长（纯展示用）
    pub reveal_delay_ms: u64,
    /// 无法识别的提交响应是否按失败处理（默认宽松：视为成功）
    pub strict_responses: bool,
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self {
            reveal_delay_ms: 800,
            strict_responses: false,
        }
    }
}

impl ConsoleSection {
    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }
}

/// 从 config 目录加载配置，环境变量 VOICE_CMD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VOICE_CMD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VOICE_CMD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
