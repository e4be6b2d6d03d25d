//! 对局会话

use chrono::{DateTime, Utc};
use protocol::{BoardState, Move, Seq, Side};
use serde::Serialize;
use tokio::sync::watch;

use crate::network::ConnectionState;

/// 走法来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOrigin {
    Local,
    Remote,
}

/// 已执行的走法
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    pub mv: Move,
    /// 发送方分配的序列号
    pub seq: Seq,
    pub origin: MoveOrigin,
    pub applied_at: DateTime<Utc>,
}

impl MoveRecord {
    pub fn new(mv: Move, seq: Seq, origin: MoveOrigin) -> Self {
        Self {
            mv,
            seq,
            origin,
            applied_at: Utc::now(),
        }
    }
}

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// 本方离开
    LocalLeft,
    /// 对方离开
    PeerLeft,
    /// 连接彻底断开
    ConnectionLost,
    /// 新的加入替换了旧对局
    Replaced,
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionEndReason::LocalLeft => "left",
            SessionEndReason::PeerLeft => "peer left",
            SessionEndReason::ConnectionLost => "connection lost",
            SessionEndReason::Replaced => "replaced by a new game",
        };
        f.write_str(text)
    }
}

/// 一局对局的状态
#[derive(Debug, Clone)]
pub struct GameSession {
    /// 当前局面
    pub state: BoardState,
    /// 走法记录（按执行顺序）
    pub history: Vec<MoveRecord>,
    /// 最后收到的对方序列号，首条带序号的消息之前未知
    pub peer_seq: Option<Seq>,
    pub local_side: Side,
    /// 对方声明的执棋方
    pub peer_side: Option<Side>,
    pub started_at: DateTime<Utc>,
    /// 被快照重置的次数
    pub resync_count: u32,
    connection: watch::Receiver<ConnectionState>,
}

impl GameSession {
    /// 从初始局面开始新对局
    pub fn new(local_side: Side, connection: watch::Receiver<ConnectionState>) -> Self {
        Self::with_state(BoardState::initial(), local_side, connection)
    }

    /// 从指定局面开始
    pub fn with_state(
        state: BoardState,
        local_side: Side,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            state,
            history: Vec::new(),
            peer_seq: None,
            local_side,
            peer_side: None,
            started_at: Utc::now(),
            resync_count: 0,
            connection,
        }
    }

    /// 当前连接状态
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// 是否轮到本方走棋
    pub fn is_local_turn(&self) -> bool {
        self.state.side_to_move == self.local_side
    }

    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.history.last()
    }

    /// 序列号大于 `ack` 的本方走法（对方尚未确认）
    pub fn unacked_local_moves(&self, ack: Seq) -> Vec<(Seq, Move)> {
        self.history
            .iter()
            .filter(|record| record.origin == MoveOrigin::Local && record.seq > ack)
            .map(|record| (record.seq, record.mv))
            .collect()
    }
}
