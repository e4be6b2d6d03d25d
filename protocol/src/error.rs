//! 错误类型定义

use thiserror::Error;

/// 象棋数据错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChessError {
    /// 无效的格子
    #[error("Invalid square: {0:?}")]
    InvalidSquare(String),

    /// 无效的 FEN 字符串
    #[error("Invalid FEN string: {reason}")]
    InvalidFen { reason: String },

    /// 无效的易位权限
    #[error("Invalid castling rights: {0:?}")]
    InvalidCastling(String),
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 消息结构无效
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// 未知的消息类型标签
    #[error("Unknown message type: {0:?}")]
    UnknownMessageType(String),

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 未连接
    #[error("Not connected")]
    NotConnected,

    /// 象棋数据错误
    #[error("Chess error: {0}")]
    Chess(#[from] ChessError),
}

impl ProtocolError {
    /// 单条消息损坏：丢弃该消息即可，连接保持
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooLarge { .. }
                | ProtocolError::MalformedMessage(_)
                | ProtocolError::UnknownMessageType(_)
        )
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
