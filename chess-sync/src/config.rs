//! 同步层设置
//!
//! 设置文件位于 `<config_dir>/ar-chess/settings.json`，缺失的字段使用默认值，
//! 环境变量可以覆盖部分字段。启动时必须先通过 `validate()`。

use std::path::{Path, PathBuf};
use std::time::Duration;

use protocol::{
    NetworkConfig, Side, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS, MAX_FRAME_SIZE,
    MAX_PENDING_MOVES, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 环境变量：中继主机
pub const ENV_RELAY_HOST: &str = "AR_CHESS_RELAY_HOST";
/// 环境变量：中继端口
pub const ENV_RELAY_PORT: &str = "AR_CHESS_RELAY_PORT";
/// 环境变量：连接超时（毫秒）
pub const ENV_CONNECT_TIMEOUT_MS: &str = "AR_CHESS_CONNECT_TIMEOUT_MS";
/// 环境变量：本方执棋方
pub const ENV_LOCAL_SIDE: &str = "AR_CHESS_LOCAL_SIDE";
/// 环境变量：日志级别
pub const ENV_LOG: &str = "AR_CHESS_LOG";

/// 设置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file I/O failed {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// 重连策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// 连续失败多少次后放弃
    pub max_attempts: u32,
    /// 首次退避（毫秒）
    pub base_delay_ms: u64,
    /// 退避上限（毫秒）
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: RECONNECT_BASE_DELAY_MS,
            max_delay_ms: RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// 心跳设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 无出站流量多久后发送心跳（毫秒）
    pub interval_ms: u64,
    /// 无入站流量多久后判定断线（毫秒）
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: HEARTBEAT_INTERVAL_SECS * 1000,
            timeout_ms: HEARTBEAT_TIMEOUT_SECS * 1000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 同步层设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// 中继服务器
    pub network: NetworkConfig,
    /// 重连策略
    pub reconnect: ReconnectPolicy,
    /// 心跳
    pub heartbeat: HeartbeatConfig,
    /// 单帧负载上限（字节）
    pub max_frame_size: usize,
    /// 乱序消息缓冲上限
    pub max_pending_moves: usize,
    /// 本方执棋方
    pub local_side: Side,
    /// 日志级别（tracing 指令，如 "info"、"debug"）
    pub log_level: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            max_frame_size: MAX_FRAME_SIZE,
            max_pending_moves: MAX_PENDING_MOVES,
            local_side: Side::White,
            log_level: "info".to_string(),
        }
    }
}

impl SyncSettings {
    /// 获取设置文件路径
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ar-chess").join("settings.json"))
    }

    /// 加载设置：设置文件（若存在）+ 环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match Self::settings_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            Some(_) => {
                tracing::info!("Settings file not found, using defaults");
                Self::default()
            }
            None => {
                tracing::warn!("Unable to determine config directory, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// 从指定文件加载
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded settings: {:?}", path);
        Ok(settings)
    }

    /// 保存设置到文件
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 应用进程环境变量覆盖
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// 按给定查找函数应用覆盖
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_RELAY_HOST) {
            self.network.host = host;
        }
        if let Some(value) = lookup(ENV_RELAY_PORT) {
            self.network.port = parse_env(ENV_RELAY_PORT, value)?;
        }
        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            self.network.connect_timeout_ms = parse_env(ENV_CONNECT_TIMEOUT_MS, value)?;
        }
        if let Some(value) = lookup(ENV_LOCAL_SIDE) {
            self.local_side = parse_env(ENV_LOCAL_SIDE, value)?;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log_level = level;
        }
        Ok(())
    }

    /// 校验设置
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate().map_err(ConfigError::Invalid)?;

        let reconnect = &self.reconnect;
        if reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.max_attempts must be at least 1".to_string(),
            ));
        }
        if reconnect.base_delay_ms == 0 || reconnect.base_delay_ms > reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect delays must satisfy 0 < base ({}) <= max ({})",
                reconnect.base_delay_ms, reconnect.max_delay_ms
            )));
        }

        let heartbeat = &self.heartbeat;
        if heartbeat.interval_ms == 0 || heartbeat.interval_ms >= heartbeat.timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat interval ({}) must be positive and below timeout ({})",
                heartbeat.interval_ms, heartbeat.timeout_ms
            )));
        }

        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size out of range: {}",
                self.max_frame_size
            )));
        }
        if self.max_pending_moves == 0 {
            return Err(ConfigError::Invalid(
                "max_pending_moves must be at least 1".to_string(),
            ));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { name, value })
}
