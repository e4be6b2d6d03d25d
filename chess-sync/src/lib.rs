//! AR 国际象棋实时同步层
//!
//! 包含:
//! - 中继连接管理 (RelayConnection)：状态机、指数退避重连、单写队列
//! - 同步协调器 (SyncCoordinator)：序列号、乱序缓存、快照重置
//! - 心跳检测
//! - 对外接口 (SyncClient) 和回调 (SyncObserver, ChessRules)
//! - 设置加载

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod sync;

pub use client::SyncClient;
pub use config::{ConfigError, HeartbeatConfig, ReconnectPolicy, SyncSettings};
pub use error::{Result, SyncError};
pub use network::{ConnectionEvent, ConnectionState, RelayConnection};
pub use sync::{
    ChessRules, GameSession, LoggingObserver, MoveOrigin, MoveRecord, NoopObserver,
    SessionEndReason, StandardRules, SyncCoordinator, SyncObserver,
};
