//! 协议常量定义

use std::time::Duration;

/// 棋盘边长（8x8）
pub const BOARD_SIZE: usize = 8;

/// 帧头大小：4 字节大端长度
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 默认中继服务器地址
pub const DEFAULT_RELAY_HOST: &str = "127.0.0.1";

/// 默认中继服务器端口
pub const DEFAULT_RELAY_PORT: u16 = 4243;

/// 连接超时（毫秒）
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// 客户端心跳间隔（秒）
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// 心跳超时（秒）- 超过此时间无任何入站流量则视为断线
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// 最大连续重连次数
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// 重连初始退避（毫秒）
pub const RECONNECT_BASE_DELAY_MS: u64 = 500;

/// 重连退避上限（毫秒）
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// 乱序走法缓冲上限
pub const MAX_PENDING_MOVES: usize = 32;

/// 单次 socket 读取的缓冲区大小
pub const READ_CHUNK_SIZE: usize = 4096;

/// 心跳间隔 Duration
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);

/// 心跳超时 Duration
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(CONNECT_TIMEOUT_MS);
