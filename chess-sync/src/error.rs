//! 同步层错误类型

use protocol::{ErrorCode, Move, ProtocolError};
use thiserror::Error;

use crate::config::ConfigError;

/// 同步层错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 连续重连失败，连接进入终止状态
    #[error("Relay unreachable after {attempts} attempts")]
    Connectivity { attempts: u32 },

    /// 已建立的连接出错（读写失败、对端关闭）
    #[error("Transport error: {0}")]
    Transport(ProtocolError),

    /// 超过心跳超时未收到任何数据
    #[error("No traffic from relay within heartbeat timeout")]
    HeartbeatTimeout,

    /// 乱序缓冲溢出，本地状态已无法按序追上
    #[error("Desynchronized: {buffered} buffered messages (capacity {capacity})")]
    Desync { buffered: usize, capacity: usize },

    /// 规则拒绝的走法
    #[error("Illegal move: {0}")]
    IllegalMove(Move),

    /// 不是本方回合
    #[error("Not your turn")]
    NotYourTurn,

    /// 当前没有对局
    #[error("No active session")]
    NoSession,

    /// 对端发来的错误
    #[error("Peer error ({}): {message}", code_label(.code))]
    Remote {
        code: Option<ErrorCode>,
        message: String,
    },

    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 设置无效
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 同步任务已停止
    #[error("Sync client stopped")]
    ClientStopped,
}

impl SyncError {
    /// 是否导致会话无法继续
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity { .. } | SyncError::Config(_) | SyncError::ClientStopped
        )
    }
}

fn code_label(code: &Option<ErrorCode>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
}

/// 同步层结果类型
pub type Result<T> = std::result::Result<T, SyncError>;
