//! FEN 格式解析和生成
//!
//! 国际象棋 FEN 格式：
//! `<棋子布局> <走子方> <易位权限> <吃过路兵目标格> [<半回合计数> <回合数>]`
//!
//! 示例：
//! `rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1`
//!
//! 同步快照只在线上传输棋子布局字段，其余字段单独携带。

use crate::board::{Board, BoardState, CastlingRights};
use crate::constants::BOARD_SIZE;
use crate::error::ChessError;
use crate::piece::{Piece, Side, Square};

/// 初始局面 FEN
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// FEN 格式处理
pub struct Fen;

impl Fen {
    /// 解析 FEN 字符串为棋盘状态（半回合计数和回合数可省略）
    pub fn parse(fen: &str) -> Result<BoardState, ChessError> {
        let parts: Vec<&str> = fen.split_whitespace().collect();
        if parts.is_empty() {
            return Err(ChessError::InvalidFen {
                reason: "Empty FEN string".to_string(),
            });
        }

        let board = Self::parse_placement(parts[0])?;

        // 走子方（默认白方）
        let side_to_move = match parts.get(1) {
            Some(&"w") | None => Side::White,
            Some(&"b") => Side::Black,
            Some(other) => {
                return Err(ChessError::InvalidFen {
                    reason: format!("Invalid side to move: {}", other),
                })
            }
        };

        // 易位权限（缺省时按王车位置推断）
        let castling = match parts.get(2) {
            Some(field) => CastlingRights::try_from(field.to_string())?,
            None => CastlingRights::infer(&board),
        };

        let en_passant = match parts.get(3) {
            Some(&"-") | None => None,
            Some(field) => Some(field.parse::<Square>()?),
        };

        Ok(BoardState {
            board,
            side_to_move,
            castling,
            en_passant,
        })
    }

    /// 解析棋子布局字段
    pub fn parse_placement(placement: &str) -> Result<Board, ChessError> {
        let mut board = Board::empty();
        let rows: Vec<&str> = placement.split('/').collect();

        if rows.len() != BOARD_SIZE {
            return Err(ChessError::InvalidFen {
                reason: format!("Expected 8 rows, got {}", rows.len()),
            });
        }

        // FEN 从上到下是 rank 8 到 rank 1
        for (row_idx, row) in rows.iter().enumerate() {
            let rank = (BOARD_SIZE - 1 - row_idx) as u8;
            let mut file = 0u8;

            for c in row.chars() {
                if file as usize >= BOARD_SIZE {
                    return Err(ChessError::InvalidFen {
                        reason: format!("Row {} has too many columns", row_idx),
                    });
                }

                if let Some(empty_count) = c.to_digit(10) {
                    if empty_count == 0 {
                        return Err(ChessError::InvalidFen {
                            reason: format!("Row {} has a zero gap", row_idx),
                        });
                    }
                    file += empty_count as u8;
                } else if let Some(piece) = Piece::from_fen_char(c) {
                    board.set(Square::new_unchecked(file, rank), Some(piece));
                    file += 1;
                } else {
                    return Err(ChessError::InvalidFen {
                        reason: format!("Invalid piece character: {}", c),
                    });
                }
            }

            if file as usize != BOARD_SIZE {
                return Err(ChessError::InvalidFen {
                    reason: format!("Row {} has {} columns, expected 8", row_idx, file),
                });
            }
        }

        Ok(board)
    }

    /// 将棋盘状态转换为 FEN 字符串
    pub fn to_string(state: &BoardState) -> String {
        let en_passant = state
            .en_passant
            .map(|sq| sq.to_string())
            .unwrap_or_else(|| "-".to_string());
        let side = match state.side_to_move {
            Side::White => 'w',
            Side::Black => 'b',
        };
        format!(
            "{} {} {} {}",
            Self::placement(&state.board),
            side,
            state.castling,
            en_passant
        )
    }

    /// 将棋盘转换为 FEN 棋子布局字段
    pub fn placement(board: &Board) -> String {
        let mut rows = Vec::with_capacity(BOARD_SIZE);

        for rank in (0..BOARD_SIZE as u8).rev() {
            let mut row = String::new();
            let mut empty_count = 0;

            for file in 0..BOARD_SIZE as u8 {
                if let Some(piece) = board.get(Square::new_unchecked(file, rank)) {
                    if empty_count > 0 {
                        row.push_str(&empty_count.to_string());
                        empty_count = 0;
                    }
                    row.push(piece.to_fen_char());
                } else {
                    empty_count += 1;
                }
            }

            if empty_count > 0 {
                row.push_str(&empty_count.to_string());
            }

            rows.push(row);
        }

        rows.join("/")
    }

    /// 解析初始局面
    pub fn initial() -> BoardState {
        BoardState::initial()
    }
}
