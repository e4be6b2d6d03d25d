//! 规则校验接口

use protocol::{BoardState, Move, MoveGenerator};

/// 本地规则校验（同步层只通过此接口判断和执行走法）
pub trait ChessRules: Send + Sync {
    /// 走法在当前局面下是否合法
    fn is_legal(&self, state: &BoardState, mv: &Move) -> bool;

    /// 执行走法，返回新局面（调用前应已通过 `is_legal`）
    fn apply_move(&self, state: &BoardState, mv: &Move) -> BoardState;
}

/// 标准国际象棋规则
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl ChessRules for StandardRules {
    fn is_legal(&self, state: &BoardState, mv: &Move) -> bool {
        MoveGenerator::is_legal(state, mv)
    }

    fn apply_move(&self, state: &BoardState, mv: &Move) -> BoardState {
        MoveGenerator::apply(state, mv)
    }
}

impl<R: ChessRules + ?Sized> ChessRules for std::sync::Arc<R> {
    fn is_legal(&self, state: &BoardState, mv: &Move) -> bool {
        (**self).is_legal(state, mv)
    }

    fn apply_move(&self, state: &BoardState, mv: &Move) -> BoardState {
        (**self).apply_move(state, mv)
    }
}
