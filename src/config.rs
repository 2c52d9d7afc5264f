//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `EMU__*` 覆盖（双下划线表示嵌套，如 `EMU__CONTACT__TCP__BIND=0.0.0.0:7010`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub contact: ContactSection,
    #[serde(default)]
    pub planner: PlannerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 关闭时清理任务的超时（秒）
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// [contact] 段：各接入通道
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContactSection {
    #[serde(default)]
    pub tcp: TcpSection,
}

/// [contact.tcp] 段：监听地址、节拍、帧大小上限
#[derive(Debug, Clone, Deserialize)]
pub struct TcpSection {
    #[serde(default = "default_tcp_bind")]
    pub bind: String,
    /// BeaconLoop 节拍（秒）
    #[serde(default = "default_beacon_interval_secs")]
    pub beacon_interval_secs: u64,
    /// 存活探测间隔（秒）
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// 探测字节与命令之间的等待（毫秒）
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// 握手读取与首条 paw 交换的超时（秒）
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_max_handshake_bytes")]
    pub max_handshake_bytes: usize,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_tcp_bind() -> String {
    "0.0.0.0:7010".to_string()
}

fn default_beacon_interval_secs() -> u64 {
    20
}

fn default_refresh_interval_secs() -> u64 {
    20
}

fn default_settle_delay_ms() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    5
}

fn default_max_handshake_bytes() -> usize {
    64 * 1024
}

fn default_max_response_bytes() -> usize {
    4096
}

impl Default for TcpSection {
    fn default() -> Self {
        Self {
            bind: default_tcp_bind(),
            beacon_interval_secs: default_beacon_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_handshake_bytes: default_max_handshake_bytes(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl TcpSection {
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_secs(self.beacon_interval_secs)
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    /// 默认规划策略
    #[serde(default = "default_planner_name")]
    pub name: String,
    /// Link 下发为指令时的单次发送超时（秒）
    #[serde(default = "default_instruction_timeout_secs")]
    pub instruction_timeout_secs: u64,
    /// 等待 Link 结果的上限（秒），超时仍未下发的 Link 记为 Discarded
    #[serde(default = "default_link_timeout_secs")]
    pub link_timeout_secs: u64,
}

fn default_planner_name() -> String {
    "atomic".to_string()
}

fn default_instruction_timeout_secs() -> u64 {
    60
}

fn default_link_timeout_secs() -> u64 {
    300
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            name: default_planner_name(),
            instruction_timeout_secs: default_instruction_timeout_secs(),
            link_timeout_secs: default_link_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 EMU__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 EMU__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("EMU")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
