//! AR 国际象棋中继协议库
//!
//! 包含:
//! - 棋子、棋盘、格子等核心数据结构
//! - 走法生成和规则验证
//! - 消息类型定义 (ProtocolMessage)
//! - 帧编解码 (Framer, Codec)
//! - 传输层抽象 (Connector trait)
//! - 局面格式 (FEN)

mod board;
mod codec;
mod constants;
mod error;
mod fen;
mod framing;
mod message;
mod moves;
mod piece;
mod transport;

pub use board::{Board, BoardState, CastlingRights};
pub use codec::Codec;
pub use constants::*;
pub use error::{ChessError, ProtocolError, Result};
pub use fen::{Fen, INITIAL_FEN};
pub use framing::{encode_frame, Frame, Framer, Frames};
pub use message::{ErrorCode, MessageKind, ProtocolMessage, Seq};
pub use moves::{Move, MoveGenerator};
pub use piece::{Piece, PieceType, Side, Square};
pub use transport::{Connector, NetworkConfig, TcpConnector};
