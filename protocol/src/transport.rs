//! 传输层抽象
//!
//! `Connector` trait 使上层连接管理与具体字节流解耦，
//! 测试中可以换成内存管道或故意失败的连接器。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::constants::{CONNECT_TIMEOUT_MS, DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT};
use crate::error::{ProtocolError, Result};

/// 中继服务器网络配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// 连接超时（毫秒），必须大于 0
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RELAY_HOST.to_string(),
            port: DEFAULT_RELAY_PORT,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    /// 创建指定地址的配置
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port` 形式的地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 校验配置
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("relay host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("relay port must be in 1..=65535".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// 连接器 trait：建立一条双向字节流
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// 建立连接（超时由调用方控制）
    async fn connect(&self, addr: &str) -> Result<Self::Stream>;
}

/// TCP 连接器
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: &str) -> Result<Self::Stream> {
        let stream = TcpStream::connect(addr).await.map_err(ProtocolError::Io)?;
        stream.set_nodelay(true)?;
        tracing::debug!("TCP stream open: {}", addr);
        Ok(stream)
    }
}
