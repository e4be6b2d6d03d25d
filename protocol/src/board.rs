//! 棋盘状态

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;
use crate::error::ChessError;
use crate::fen::Fen;
use crate::piece::{Piece, PieceType, Side, Square};

/// 棋盘，线上格式为 FEN 的棋子布局字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Board {
    /// 8x8 棋盘，索引为 rank * 8 + file
    squares: Vec<Option<Piece>>,
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self {
            squares: vec![None; BOARD_SIZE * BOARD_SIZE],
        }
    }

    /// 创建初始棋盘
    pub fn initial() -> Self {
        let mut board = Self::empty();
        let back_rank = [
            PieceType::Rook,
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Queen,
            PieceType::King,
            PieceType::Bishop,
            PieceType::Knight,
            PieceType::Rook,
        ];

        for side in [Side::White, Side::Black] {
            for (file, piece_type) in back_rank.iter().enumerate() {
                board.set(
                    Square::new_unchecked(file as u8, side.back_rank()),
                    Some(Piece::new(*piece_type, side)),
                );
                board.set(
                    Square::new_unchecked(file as u8, side.pawn_rank()),
                    Some(Piece::new(PieceType::Pawn, side)),
                );
            }
        }

        board
    }

    /// 获取指定格子的棋子
    pub fn get(&self, square: Square) -> Option<Piece> {
        if square.is_valid() {
            self.squares[square.to_index()]
        } else {
            None
        }
    }

    /// 设置指定格子的棋子
    pub fn set(&mut self, square: Square, piece: Option<Piece>) {
        if square.is_valid() {
            self.squares[square.to_index()] = piece;
        }
    }

    /// 移动棋子（不检查规则），返回被吃的棋子
    pub fn move_piece(&mut self, from: Square, to: Square) -> Option<Piece> {
        let piece = self.get(from);
        let captured = self.get(to);
        self.set(from, None);
        self.set(to, piece);
        captured
    }

    /// 查找指定阵营的王
    pub fn find_king(&self, side: Side) -> Option<Square> {
        Square::all().find(|sq| {
            self.get(*sq) == Some(Piece::new(PieceType::King, side))
        })
    }

    /// 获取指定阵营的所有棋子
    pub fn pieces(&self, side: Side) -> Vec<(Square, Piece)> {
        Square::all()
            .filter_map(|sq| self.get(sq).map(|piece| (sq, piece)))
            .filter(|(_, piece)| piece.side == side)
            .collect()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl TryFrom<String> for Board {
    type Error = ChessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fen::parse_placement(&value)
    }
}

impl From<Board> for String {
    fn from(board: Board) -> Self {
        Fen::placement(&board)
    }
}

/// 易位权限，线上格式为 FEN 易位字段（"KQkq" / "-"）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CastlingRights {
    pub white_king_side: bool,
    pub white_queen_side: bool,
    pub black_king_side: bool,
    pub black_queen_side: bool,
}

impl CastlingRights {
    /// 全部权限
    pub const ALL: CastlingRights = CastlingRights {
        white_king_side: true,
        white_queen_side: true,
        black_king_side: true,
        black_queen_side: true,
    };

    /// 无权限
    pub const NONE: CastlingRights = CastlingRights {
        white_king_side: false,
        white_queen_side: false,
        black_king_side: false,
        black_queen_side: false,
    };

    /// 根据王车是否在原位推断权限（快照未携带易位字段时使用）
    pub fn infer(board: &Board) -> Self {
        let at_home = |file: u8, side: Side, piece_type: PieceType| {
            board.get(Square::new_unchecked(file, side.back_rank()))
                == Some(Piece::new(piece_type, side))
        };
        let white_king = at_home(4, Side::White, PieceType::King);
        let black_king = at_home(4, Side::Black, PieceType::King);
        Self {
            white_king_side: white_king && at_home(7, Side::White, PieceType::Rook),
            white_queen_side: white_king && at_home(0, Side::White, PieceType::Rook),
            black_king_side: black_king && at_home(7, Side::Black, PieceType::Rook),
            black_queen_side: black_king && at_home(0, Side::Black, PieceType::Rook),
        }
    }

    /// 王翼易位权限
    pub fn king_side(&self, side: Side) -> bool {
        match side {
            Side::White => self.white_king_side,
            Side::Black => self.black_king_side,
        }
    }

    /// 后翼易位权限
    pub fn queen_side(&self, side: Side) -> bool {
        match side {
            Side::White => self.white_queen_side,
            Side::Black => self.black_queen_side,
        }
    }

    /// 王移动后取消该方全部权限
    pub fn revoke(&mut self, side: Side) {
        match side {
            Side::White => {
                self.white_king_side = false;
                self.white_queen_side = false;
            }
            Side::Black => {
                self.black_king_side = false;
                self.black_queen_side = false;
            }
        }
    }

    /// 车离开或在原位被吃时取消对应权限
    pub fn revoke_rook_square(&mut self, square: Square) {
        match (square.file, square.rank) {
            (0, 0) => self.white_queen_side = false,
            (7, 0) => self.white_king_side = false,
            (0, 7) => self.black_queen_side = false,
            (7, 7) => self.black_king_side = false,
            _ => {}
        }
    }
}

impl Default for CastlingRights {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::fmt::Display for CastlingRights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        if self.white_king_side {
            s.push('K');
        }
        if self.white_queen_side {
            s.push('Q');
        }
        if self.black_king_side {
            s.push('k');
        }
        if self.black_queen_side {
            s.push('q');
        }
        if s.is_empty() {
            s.push('-');
        }
        f.write_str(&s)
    }
}

impl TryFrom<String> for CastlingRights {
    type Error = ChessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "-" {
            return Ok(Self::NONE);
        }
        if value.is_empty() {
            return Err(ChessError::InvalidCastling(value));
        }
        let mut rights = Self::NONE;
        for c in value.chars() {
            let flag = match c {
                'K' => &mut rights.white_king_side,
                'Q' => &mut rights.white_queen_side,
                'k' => &mut rights.black_king_side,
                'q' => &mut rights.black_queen_side,
                _ => return Err(ChessError::InvalidCastling(value)),
            };
            if *flag {
                return Err(ChessError::InvalidCastling(value));
            }
            *flag = true;
        }
        Ok(rights)
    }
}

impl From<CastlingRights> for String {
    fn from(rights: CastlingRights) -> Self {
        rights.to_string()
    }
}

/// 完整的棋盘状态（包含走子方、易位权限、吃过路兵目标格）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    /// 棋盘
    pub board: Board,
    /// 当前走子方
    pub side_to_move: Side,
    /// 易位权限
    pub castling: CastlingRights,
    /// 吃过路兵的目标格
    pub en_passant: Option<Square>,
}

impl BoardState {
    /// 创建初始状态
    pub fn initial() -> Self {
        Self {
            board: Board::initial(),
            side_to_move: Side::White,
            castling: CastlingRights::ALL,
            en_passant: None,
        }
    }

    /// 从棋盘创建状态，易位权限按王车位置推断
    pub fn from_board(board: Board, side_to_move: Side) -> Self {
        let castling = CastlingRights::infer(&board);
        Self {
            board,
            side_to_move,
            castling,
            en_passant: None,
        }
    }
}

impl Default for BoardState {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[test]
    fn test_initial_board() {
        let board = Board::initial();

        assert_eq!(board.get(sq("e1")), Some(Piece::new(PieceType::King, Side::White)));
        assert_eq!(board.get(sq("d8")), Some(Piece::new(PieceType::Queen, Side::Black)));
        assert_eq!(board.get(sq("e2")), Some(Piece::new(PieceType::Pawn, Side::White)));
        assert_eq!(board.get(sq("g7")), Some(Piece::new(PieceType::Pawn, Side::Black)));
        assert_eq!(board.get(sq("e4")), None);
        assert_eq!(board.pieces(Side::White).len(), 16);
        assert_eq!(board.pieces(Side::Black).len(), 16);
    }

    #[test]
    fn test_move_piece() {
        let mut board = Board::initial();

        let captured = board.move_piece(sq("e2"), sq("e4"));
        assert!(captured.is_none());
        assert!(board.get(sq("e2")).is_none());
        assert_eq!(board.get(sq("e4")), Some(Piece::new(PieceType::Pawn, Side::White)));
    }

    #[test]
    fn test_find_king() {
        let board = Board::initial();
        assert_eq!(board.find_king(Side::White), Some(sq("e1")));
        assert_eq!(board.find_king(Side::Black), Some(sq("e8")));
        assert_eq!(Board::empty().find_king(Side::White), None);
    }

    #[test]
    fn test_castling_rights_string() {
        assert_eq!(CastlingRights::ALL.to_string(), "KQkq");
        assert_eq!(CastlingRights::NONE.to_string(), "-");
        let rights = CastlingRights::try_from("Kq".to_string()).unwrap();
        assert!(rights.white_king_side);
        assert!(!rights.white_queen_side);
        assert!(!rights.black_king_side);
        assert!(rights.black_queen_side);
        assert!(CastlingRights::try_from("KK".to_string()).is_err());
        assert!(CastlingRights::try_from("X".to_string()).is_err());
        assert!(CastlingRights::try_from(String::new()).is_err());
    }

    #[test]
    fn test_castling_infer() {
        assert_eq!(CastlingRights::infer(&Board::initial()), CastlingRights::ALL);

        let mut board = Board::initial();
        board.set(sq("h1"), None);
        board.set(sq("e8"), None);
        let rights = CastlingRights::infer(&board);
        assert!(!rights.white_king_side);
        assert!(rights.white_queen_side);
        assert!(!rights.black_king_side);
        assert!(!rights.black_queen_side);
    }

    #[test]
    fn test_board_serde() {
        let json = serde_json::to_string(&Board::initial()).unwrap();
        assert_eq!(json, "\"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR\"");
        let board: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(board, Board::initial());
        assert!(serde_json::from_str::<Board>("\"8/8/8\"").is_err());
    }
}
