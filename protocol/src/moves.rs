//! 走法生成和验证

use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardState};
use crate::error::ChessError;
use crate::piece::{Piece, PieceType, Side, Square};

/// 走法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// 起始格
    pub from: Square,
    /// 目标格
    pub to: Square,
    /// 升变棋子（兵到达底线时，缺省为后）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceType>,
    /// 走棋方
    pub side: Side,
}

impl Move {
    /// 创建新走法
    pub fn new(from: Square, to: Square, side: Side) -> Self {
        Self {
            from,
            to,
            promotion: None,
            side,
        }
    }

    /// 创建升变走法
    pub fn with_promotion(from: Square, to: Square, side: Side, promotion: PieceType) -> Self {
        Self {
            from,
            to,
            promotion: Some(promotion),
            side,
        }
    }

    /// 解析坐标记法（"e2e4"、"e7e8q"）
    pub fn parse_coordinate(text: &str, side: Side) -> Result<Self, ChessError> {
        let text = text.trim();
        if !text.is_ascii() || !(4..=5).contains(&text.len()) {
            return Err(ChessError::InvalidSquare(text.to_string()));
        }
        let from: Square = text[0..2].parse()?;
        let to: Square = text[2..4].parse()?;
        let promotion = match text[4..].chars().next() {
            None => None,
            Some(c) => match PieceType::from_fen_char(c) {
                Some((piece_type, _)) if piece_type.is_promotion_target() => Some(piece_type),
                _ => return Err(ChessError::InvalidSquare(text.to_string())),
            },
        };
        Ok(Self {
            from,
            to,
            promotion,
            side,
        })
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(promotion) = self.promotion {
            write!(f, "{}", promotion.to_fen_char(Side::Black))?;
        }
        Ok(())
    }
}

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

const KING_OFFSETS: [(i8, i8); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

const ROOK_DIRECTIONS: [(i8, i8); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];

const BISHOP_DIRECTIONS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// 走法生成器
pub struct MoveGenerator;

impl MoveGenerator {
    /// 生成走子方的所有伪合法走法（不考虑是否送将）
    pub fn generate_pseudo_legal(state: &BoardState) -> Vec<Move> {
        let mut moves = Vec::with_capacity(64);
        let side = state.side_to_move;

        for (square, piece) in state.board.pieces(side) {
            match piece.piece_type {
                PieceType::Pawn => Self::generate_pawn_moves(state, square, side, &mut moves),
                PieceType::Knight => {
                    Self::generate_step_moves(&state.board, square, side, &KNIGHT_OFFSETS, &mut moves)
                }
                PieceType::Bishop => {
                    Self::generate_slide_moves(&state.board, square, side, &BISHOP_DIRECTIONS, &mut moves)
                }
                PieceType::Rook => {
                    Self::generate_slide_moves(&state.board, square, side, &ROOK_DIRECTIONS, &mut moves)
                }
                PieceType::Queen => {
                    Self::generate_slide_moves(&state.board, square, side, &ROOK_DIRECTIONS, &mut moves);
                    Self::generate_slide_moves(&state.board, square, side, &BISHOP_DIRECTIONS, &mut moves);
                }
                PieceType::King => {
                    Self::generate_step_moves(&state.board, square, side, &KING_OFFSETS, &mut moves);
                    Self::generate_castling_moves(state, square, side, &mut moves);
                }
            }
        }

        moves
    }

    /// 生成走子方的所有合法走法（过滤掉会让己方王被将的走法）
    pub fn generate_legal(state: &BoardState) -> Vec<Move> {
        Self::generate_pseudo_legal(state)
            .into_iter()
            .filter(|mv| {
                let next = Self::apply(state, mv);
                !Self::is_in_check(&next.board, state.side_to_move)
            })
            .collect()
    }

    /// 检查走法是否合法
    pub fn is_legal(state: &BoardState, mv: &Move) -> bool {
        if mv.side != state.side_to_move {
            return false;
        }
        let normalized = Self::normalize_promotion(&state.board, mv);
        Self::generate_legal(state).contains(&normalized)
    }

    /// 执行走法（不检查合法性），处理吃过路兵、易位和升变
    pub fn apply(state: &BoardState, mv: &Move) -> BoardState {
        let mut next = state.clone();
        let Some(piece) = state.board.get(mv.from) else {
            return next;
        };

        let captured = next.board.move_piece(mv.from, mv.to);

        match piece.piece_type {
            PieceType::Pawn => {
                // 吃过路兵：斜走到空的过路格，移除被越过的兵
                if captured.is_none()
                    && mv.from.file != mv.to.file
                    && state.en_passant == Some(mv.to)
                {
                    next.board
                        .set(Square::new_unchecked(mv.to.file, mv.from.rank), None);
                }
                if mv.to.rank == piece.side.opponent().back_rank() {
                    let promoted = mv.promotion.unwrap_or(PieceType::Queen);
                    next.board.set(mv.to, Some(Piece::new(promoted, piece.side)));
                }
            }
            PieceType::King => {
                let df = mv.to.file as i8 - mv.from.file as i8;
                if df.abs() == 2 {
                    let rank = mv.from.rank;
                    let (rook_from, rook_to) = if df > 0 { (7, 5) } else { (0, 3) };
                    next.board.move_piece(
                        Square::new_unchecked(rook_from, rank),
                        Square::new_unchecked(rook_to, rank),
                    );
                }
                next.castling.revoke(piece.side);
            }
            _ => {}
        }

        next.castling.revoke_rook_square(mv.from);
        next.castling.revoke_rook_square(mv.to);

        next.en_passant = if piece.piece_type == PieceType::Pawn
            && (mv.to.rank as i8 - mv.from.rank as i8).abs() == 2
        {
            Some(Square::new_unchecked(mv.from.file, (mv.from.rank + mv.to.rank) / 2))
        } else {
            None
        };

        next.side_to_move = state.side_to_move.opponent();
        next
    }

    /// 检查指定阵营的王是否被将
    pub fn is_in_check(board: &Board, side: Side) -> bool {
        match board.find_king(side) {
            Some(king) => Self::is_square_attacked(board, king, side.opponent()),
            None => false, // 没有王，视为不被将
        }
    }

    /// 检查格子是否被指定阵营攻击
    pub fn is_square_attacked(board: &Board, target: Square, by: Side) -> bool {
        let attacker_at = |square: Option<Square>, types: &[PieceType]| {
            square
                .and_then(|sq| board.get(sq))
                .is_some_and(|piece| piece.side == by && types.contains(&piece.piece_type))
        };

        // 兵从反方向斜线攻击
        let pawn_rank = -by.forward();
        if attacker_at(target.offset(1, pawn_rank), &[PieceType::Pawn])
            || attacker_at(target.offset(-1, pawn_rank), &[PieceType::Pawn])
        {
            return true;
        }

        if KNIGHT_OFFSETS
            .iter()
            .any(|(df, dr)| attacker_at(target.offset(*df, *dr), &[PieceType::Knight]))
        {
            return true;
        }

        if KING_OFFSETS
            .iter()
            .any(|(df, dr)| attacker_at(target.offset(*df, *dr), &[PieceType::King]))
        {
            return true;
        }

        let slides = [
            (&ROOK_DIRECTIONS, [PieceType::Rook, PieceType::Queen]),
            (&BISHOP_DIRECTIONS, [PieceType::Bishop, PieceType::Queen]),
        ];
        for (directions, types) in slides {
            for (df, dr) in directions.iter() {
                let mut current = target;
                while let Some(next) = current.offset(*df, *dr) {
                    if let Some(piece) = board.get(next) {
                        if piece.side == by && types.contains(&piece.piece_type) {
                            return true;
                        }
                        break;
                    }
                    current = next;
                }
            }
        }

        false
    }

    /// 检查走子方是否被将死
    pub fn is_checkmate(state: &BoardState) -> bool {
        Self::is_in_check(&state.board, state.side_to_move) && Self::generate_legal(state).is_empty()
    }

    /// 检查走子方是否逼和（无子可动但未被将）
    pub fn is_stalemate(state: &BoardState) -> bool {
        !Self::is_in_check(&state.board, state.side_to_move) && Self::generate_legal(state).is_empty()
    }

    /// 兵走到底线但未指定升变时按升后处理
    fn normalize_promotion(board: &Board, mv: &Move) -> Move {
        let is_pawn = board
            .get(mv.from)
            .is_some_and(|piece| piece.piece_type == PieceType::Pawn);
        if is_pawn && mv.promotion.is_none() && mv.to.rank == mv.side.opponent().back_rank() {
            Move::with_promotion(mv.from, mv.to, mv.side, PieceType::Queen)
        } else {
            *mv
        }
    }

    /// 生成兵的走法
    fn generate_pawn_moves(state: &BoardState, from: Square, side: Side, moves: &mut Vec<Move>) {
        let board = &state.board;
        let forward = side.forward();

        // 前进一格，起始位置可前进两格
        if let Some(one) = from.offset(0, forward) {
            if board.get(one).is_none() {
                Self::push_pawn_move(from, one, side, moves);
                if from.rank == side.pawn_rank() {
                    if let Some(two) = from.offset(0, forward * 2) {
                        if board.get(two).is_none() {
                            moves.push(Move::new(from, two, side));
                        }
                    }
                }
            }
        }

        // 斜吃，包括吃过路兵
        for df in [-1i8, 1i8] {
            if let Some(to) = from.offset(df, forward) {
                let enemy = board.get(to).is_some_and(|piece| piece.side != side);
                if enemy || state.en_passant == Some(to) {
                    Self::push_pawn_move(from, to, side, moves);
                }
            }
        }
    }

    /// 添加兵的走法，到达底线时展开为四种升变
    fn push_pawn_move(from: Square, to: Square, side: Side, moves: &mut Vec<Move>) {
        if to.rank == side.opponent().back_rank() {
            for promotion in PieceType::PROMOTIONS {
                moves.push(Move::with_promotion(from, to, side, promotion));
            }
        } else {
            moves.push(Move::new(from, to, side));
        }
    }

    /// 生成马、王的单步走法
    fn generate_step_moves(
        board: &Board,
        from: Square,
        side: Side,
        offsets: &[(i8, i8)],
        moves: &mut Vec<Move>,
    ) {
        for (df, dr) in offsets {
            if let Some(to) = from.offset(*df, *dr) {
                if !matches!(board.get(to), Some(target) if target.side == side) {
                    moves.push(Move::new(from, to, side));
                }
            }
        }
    }

    /// 生成车、象、后的滑行走法
    fn generate_slide_moves(
        board: &Board,
        from: Square,
        side: Side,
        directions: &[(i8, i8)],
        moves: &mut Vec<Move>,
    ) {
        for (df, dr) in directions {
            let mut current = from;
            while let Some(to) = current.offset(*df, *dr) {
                if let Some(target) = board.get(to) {
                    if target.side != side {
                        moves.push(Move::new(from, to, side));
                    }
                    break;
                }
                moves.push(Move::new(from, to, side));
                current = to;
            }
        }
    }

    /// 生成易位走法：王车未动、中间无子、王不在被将中也不经过被攻击的格子
    fn generate_castling_moves(state: &BoardState, from: Square, side: Side, moves: &mut Vec<Move>) {
        let board = &state.board;
        let rank = side.back_rank();
        if from != Square::new_unchecked(4, rank) {
            return;
        }
        let enemy = side.opponent();
        if Self::is_square_attacked(board, from, enemy) {
            return;
        }

        let rook = Some(Piece::new(PieceType::Rook, side));
        let empty = |files: &[u8]| {
            files
                .iter()
                .all(|file| board.get(Square::new_unchecked(*file, rank)).is_none())
        };
        let safe = |files: &[u8]| {
            files
                .iter()
                .all(|file| !Self::is_square_attacked(board, Square::new_unchecked(*file, rank), enemy))
        };

        if state.castling.king_side(side)
            && board.get(Square::new_unchecked(7, rank)) == rook
            && empty(&[5, 6])
            && safe(&[5, 6])
        {
            moves.push(Move::new(from, Square::new_unchecked(6, rank), side));
        }

        if state.castling.queen_side(side)
            && board.get(Square::new_unchecked(0, rank)) == rook
            && empty(&[1, 2, 3])
            && safe(&[2, 3])
        {
            moves.push(Move::new(from, Square::new_unchecked(2, rank), side));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::Fen;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn mv(text: &str, side: Side) -> Move {
        Move::parse_coordinate(text, side).unwrap()
    }

    #[test]
    fn test_initial_moves() {
        let state = BoardState::initial();
        let moves = MoveGenerator::generate_legal(&state);

        // 16 步兵 + 4 步马
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn test_pawn_double_push() {
        let state = BoardState::initial();
        let e4 = mv("e2e4", Side::White);
        assert!(MoveGenerator::is_legal(&state, &e4));

        let next = MoveGenerator::apply(&state, &e4);
        assert_eq!(next.board.get(sq("e4")), Some(Piece::new(PieceType::Pawn, Side::White)));
        assert_eq!(next.board.get(sq("e2")), None);
        assert_eq!(next.en_passant, Some(sq("e3")));
        assert_eq!(next.side_to_move, Side::Black);
    }

    #[test]
    fn test_wrong_side_rejected() {
        let state = BoardState::initial();
        assert!(!MoveGenerator::is_legal(&state, &mv("e7e5", Side::Black)));
        // 白方走棋但标记为黑方
        assert!(!MoveGenerator::is_legal(&state, &mv("e2e4", Side::Black)));
    }

    #[test]
    fn test_blocked_and_illegal_moves() {
        let state = BoardState::initial();
        assert!(!MoveGenerator::is_legal(&state, &mv("a1a3", Side::White)));
        assert!(!MoveGenerator::is_legal(&state, &mv("e2e5", Side::White)));
        assert!(!MoveGenerator::is_legal(&state, &mv("d1d4", Side::White)));
    }

    #[test]
    fn test_knight_moves() {
        let state = BoardState::initial();
        assert!(MoveGenerator::is_legal(&state, &mv("g1f3", Side::White)));
        assert!(MoveGenerator::is_legal(&state, &mv("b1c3", Side::White)));
        assert!(!MoveGenerator::is_legal(&state, &mv("g1e2", Side::White)));
    }

    #[test]
    fn test_en_passant() {
        let state = Fen::parse("4k3/8/8/3pP3/8/8/8/4K3 w - d6").unwrap();
        let capture = mv("e5d6", Side::White);
        assert!(MoveGenerator::is_legal(&state, &capture));

        let next = MoveGenerator::apply(&state, &capture);
        assert_eq!(next.board.get(sq("d5")), None);
        assert_eq!(next.board.get(sq("d6")), Some(Piece::new(PieceType::Pawn, Side::White)));
    }

    #[test]
    fn test_en_passant_expires() {
        let state = Fen::parse("4k3/8/8/3pP3/8/8/8/4K3 w - -").unwrap();
        assert!(!MoveGenerator::is_legal(&state, &mv("e5d6", Side::White)));
    }

    #[test]
    fn test_castling() {
        let state = Fen::parse("r3k2r/8/8/8/8/8/8/R3K2R w KQkq -").unwrap();
        let short = mv("e1g1", Side::White);
        let long = mv("e1c1", Side::White);
        assert!(MoveGenerator::is_legal(&state, &short));
        assert!(MoveGenerator::is_legal(&state, &long));

        let next = MoveGenerator::apply(&state, &short);
        assert_eq!(next.board.get(sq("g1")), Some(Piece::new(PieceType::King, Side::White)));
        assert_eq!(next.board.get(sq("f1")), Some(Piece::new(PieceType::Rook, Side::White)));
        assert_eq!(next.board.get(sq("h1")), None);
        assert!(!next.castling.white_king_side);
        assert!(!next.castling.white_queen_side);
        assert!(next.castling.black_king_side);
    }

    #[test]
    fn test_castling_through_check() {
        // 黑车控制 f1
        let state = Fen::parse("4kr2/8/8/8/8/8/8/R3K2R w KQ -").unwrap();
        assert!(!MoveGenerator::is_legal(&state, &mv("e1g1", Side::White)));
        assert!(MoveGenerator::is_legal(&state, &mv("e1c1", Side::White)));
    }

    #[test]
    fn test_castling_without_rights() {
        let state = Fen::parse("r3k2r/8/8/8/8/8/8/R3K2R w kq -").unwrap();
        assert!(!MoveGenerator::is_legal(&state, &mv("e1g1", Side::White)));
    }

    #[test]
    fn test_rook_capture_revokes_rights() {
        let state = Fen::parse("r3k2r/8/8/8/8/8/8/R3K2R w KQkq -").unwrap();
        let next = MoveGenerator::apply(&state, &mv("a1a8", Side::White));
        assert!(!next.castling.white_queen_side);
        assert!(!next.castling.black_queen_side);
        assert!(next.castling.black_king_side);
    }

    #[test]
    fn test_promotion_defaults_to_queen() {
        let state = Fen::parse("4k3/P7/8/8/8/8/8/4K3 w - -").unwrap();
        let push = mv("a7a8", Side::White);
        assert!(MoveGenerator::is_legal(&state, &push));

        let next = MoveGenerator::apply(&state, &push);
        assert_eq!(next.board.get(sq("a8")), Some(Piece::new(PieceType::Queen, Side::White)));

        let under = mv("a7a8n", Side::White);
        assert!(MoveGenerator::is_legal(&state, &under));
        let next = MoveGenerator::apply(&state, &under);
        assert_eq!(next.board.get(sq("a8")), Some(Piece::new(PieceType::Knight, Side::White)));
    }

    #[test]
    fn test_promotion_on_normal_move_rejected() {
        let state = BoardState::initial();
        assert!(!MoveGenerator::is_legal(&state, &mv("e2e4q", Side::White)));
    }

    #[test]
    fn test_pinned_piece() {
        // e2 的车被 e8 的车钉住
        let state = Fen::parse("4r1k1/8/8/8/8/8/4R3/4K3 w - -").unwrap();
        assert!(!MoveGenerator::is_legal(&state, &mv("e2d2", Side::White)));
        assert!(MoveGenerator::is_legal(&state, &mv("e2e5", Side::White)));
    }

    #[test]
    fn test_check_detection() {
        let state = Fen::parse("4k3/8/8/8/8/8/8/4KR2 b - -").unwrap();
        assert!(!MoveGenerator::is_in_check(&state.board, Side::Black));

        let state = Fen::parse("4k3/8/8/8/8/8/8/4R1K1 b - -").unwrap();
        assert!(MoveGenerator::is_in_check(&state.board, Side::Black));

        let state = Fen::parse("4k3/3P4/8/8/8/8/8/4K3 b - -").unwrap();
        assert!(MoveGenerator::is_in_check(&state.board, Side::Black));
    }

    #[test]
    fn test_checkmate() {
        // 愚人杀
        let mut state = BoardState::initial();
        for (text, side) in [
            ("f2f3", Side::White),
            ("e7e5", Side::Black),
            ("g2g4", Side::White),
            ("d8h4", Side::Black),
        ] {
            let m = mv(text, side);
            assert!(MoveGenerator::is_legal(&state, &m), "{text} should be legal");
            state = MoveGenerator::apply(&state, &m);
        }
        assert!(MoveGenerator::is_checkmate(&state));
        assert!(!MoveGenerator::is_stalemate(&state));
    }

    #[test]
    fn test_stalemate() {
        let state = Fen::parse("7k/5Q2/6K1/8/8/8/8/8 b - -").unwrap();
        assert!(MoveGenerator::is_stalemate(&state));
        assert!(!MoveGenerator::is_checkmate(&state));
    }

    #[test]
    fn test_parse_coordinate() {
        let m = mv("e7e8q", Side::White);
        assert_eq!(m.promotion, Some(PieceType::Queen));
        assert_eq!(m.to_string(), "e7e8q");
        assert!(Move::parse_coordinate("e7e8k", Side::White).is_err());
        assert!(Move::parse_coordinate("e2", Side::White).is_err());
        assert!(Move::parse_coordinate("z2e4", Side::White).is_err());
    }
}
