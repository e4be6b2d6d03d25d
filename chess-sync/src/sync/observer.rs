//! UI 回调接口

use protocol::BoardState;

use super::session::{GameSession, MoveRecord, SessionEndReason};
use crate::error::SyncError;
use crate::network::ConnectionState;

/// 同步层事件观察者，所有方法默认为空
///
/// 回调在接收任务中同步调用，实现不应阻塞。
pub trait SyncObserver: Send + Sync {
    /// 一步走法已在本地棋盘生效（本方或对方）
    fn on_move_applied(&self, _record: &MoveRecord) {}

    /// 检测到序号缺口，已请求快照
    fn on_desync(&self) {}

    fn on_connection_state_changed(&self, _state: ConnectionState) {}

    fn on_session_started(&self, _session: &GameSession) {}

    fn on_session_ended(&self, _reason: SessionEndReason) {}

    /// 快照覆盖了本地棋盘
    fn on_board_reset(&self, _state: &BoardState) {}

    fn on_error(&self, _error: &SyncError) {}
}

/// 不处理任何事件
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// 将事件写入日志
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SyncObserver for LoggingObserver {
    fn on_move_applied(&self, record: &MoveRecord) {
        tracing::info!(
            "Move {} ({:?}, seq {}) applied",
            record.mv,
            record.origin,
            record.seq
        );
    }

    fn on_desync(&self) {
        tracing::warn!("Out of sync with peer, snapshot requested");
    }

    fn on_connection_state_changed(&self, state: ConnectionState) {
        tracing::info!("Connection {}", state);
    }

    fn on_session_started(&self, session: &GameSession) {
        tracing::info!("Game started, playing {}", session.local_side);
    }

    fn on_session_ended(&self, reason: SessionEndReason) {
        tracing::info!("Game ended: {}", reason);
    }

    fn on_board_reset(&self, state: &BoardState) {
        tracing::info!(
            "Board reset from snapshot: {}",
            protocol::Fen::to_string(state)
        );
    }

    fn on_error(&self, error: &SyncError) {
        if error.is_fatal() {
            tracing::error!("{}", error);
        } else {
            tracing::warn!("{}", error);
        }
    }
}
