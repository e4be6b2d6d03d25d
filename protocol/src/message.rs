//! 消息类型定义
//!
//! 线上 JSON 通过 `type` 字段区分变体，每条消息都带有发送方分配的 `seq`。

use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardState, CastlingRights};
use crate::moves::Move;
use crate::piece::{PieceType, Side, Square};

/// 序列号（每个发送方单调递增）
pub type Seq = u64;

/// 双方经中继交换的协议消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// 加入对局
    Join {
        seq: Seq,
        /// 发送方执棋方
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
    },
    /// 离开对局
    Leave { seq: Seq },
    /// 走棋
    Move {
        seq: Seq,
        from: Square,
        to: Square,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        promotion: Option<PieceType>,
        side: Side,
    },
    /// 请求完整快照
    SyncRequest { seq: Seq },
    /// 完整快照（权威重置）
    SyncState {
        seq: Seq,
        board: Board,
        side_to_move: Side,
        /// 发送方最后收到的接收方序列号
        #[serde(default)]
        ack: Seq,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        castling: Option<CastlingRights>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        en_passant: Option<Square>,
    },
    /// 错误通知
    Error {
        seq: Seq,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
    /// 心跳
    Heartbeat { seq: Seq },
}

/// 消息类型（不含字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Leave,
    Move,
    SyncRequest,
    SyncState,
    Error,
    Heartbeat,
}

impl MessageKind {
    /// 全部消息类型
    pub const ALL: [MessageKind; 7] = [
        MessageKind::Join,
        MessageKind::Leave,
        MessageKind::Move,
        MessageKind::SyncRequest,
        MessageKind::SyncState,
        MessageKind::Error,
        MessageKind::Heartbeat,
    ];

    /// 线上 `type` 标签
    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::Move => "move",
            MessageKind::SyncRequest => "sync_request",
            MessageKind::SyncState => "sync_state",
            MessageKind::Error => "error",
            MessageKind::Heartbeat => "heartbeat",
        }
    }

    /// 从 `type` 标签解析
    pub fn from_tag(tag: &str) -> Option<MessageKind> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// 错误码定义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// 走法被规则拒绝
    IllegalMove,
    /// 当前没有对局
    NoSession,
    /// 消息无法解析
    Malformed,
    /// 状态不同步
    Desync,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ProtocolMessage {
    /// 消息类型
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::Join { .. } => MessageKind::Join,
            ProtocolMessage::Leave { .. } => MessageKind::Leave,
            ProtocolMessage::Move { .. } => MessageKind::Move,
            ProtocolMessage::SyncRequest { .. } => MessageKind::SyncRequest,
            ProtocolMessage::SyncState { .. } => MessageKind::SyncState,
            ProtocolMessage::Error { .. } => MessageKind::Error,
            ProtocolMessage::Heartbeat { .. } => MessageKind::Heartbeat,
        }
    }

    /// 发送方序列号
    pub fn seq(&self) -> Seq {
        match self {
            ProtocolMessage::Join { seq, .. }
            | ProtocolMessage::Leave { seq }
            | ProtocolMessage::Move { seq, .. }
            | ProtocolMessage::SyncRequest { seq }
            | ProtocolMessage::SyncState { seq, .. }
            | ProtocolMessage::Error { seq, .. }
            | ProtocolMessage::Heartbeat { seq } => *seq,
        }
    }

    /// 由走法构造消息
    pub fn from_move(seq: Seq, mv: &Move) -> Self {
        ProtocolMessage::Move {
            seq,
            from: mv.from,
            to: mv.to,
            promotion: mv.promotion,
            side: mv.side,
        }
    }

    /// 提取走法
    pub fn as_move(&self) -> Option<Move> {
        match self {
            ProtocolMessage::Move {
                from,
                to,
                promotion,
                side,
                ..
            } => Some(Move {
                from: *from,
                to: *to,
                promotion: *promotion,
                side: *side,
            }),
            _ => None,
        }
    }

    /// 由棋盘状态构造快照消息
    pub fn snapshot(seq: Seq, ack: Seq, state: &BoardState) -> Self {
        ProtocolMessage::SyncState {
            seq,
            board: state.board.clone(),
            side_to_move: state.side_to_move,
            ack,
            castling: Some(state.castling),
            en_passant: state.en_passant,
        }
    }

    /// 从快照消息还原棋盘状态，缺省的易位权限按棋盘推断
    pub fn snapshot_state(&self) -> Option<BoardState> {
        match self {
            ProtocolMessage::SyncState {
                board,
                side_to_move,
                castling,
                en_passant,
                ..
            } => Some(BoardState {
                board: board.clone(),
                side_to_move: *side_to_move,
                castling: castling.unwrap_or_else(|| CastlingRights::infer(board)),
                en_passant: *en_passant,
            }),
            _ => None,
        }
    }
}
