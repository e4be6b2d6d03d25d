//! 同步协调器
//!
//! 纯同步状态机：输入对方消息、本地操作和连接状态，输出待发送的消息
//! （`take_outbox`）和观察者回调。不做任何 I/O，由接收任务驱动。
//!
//! 对方序列号规则：
//! - `Move` 必须按 `last + 1` 顺序执行，超前的先缓存并请求快照，
//!   不大于 `last` 的视为重放直接丢弃。
//! - 其他消息立即处理，但同样推进序列号，缺口照样触发快照请求。
//! - `Join` 和 `SyncState` 重置序列号基线。

use std::collections::BTreeMap;
use std::sync::Arc;

use protocol::{BoardState, ErrorCode, Move, ProtocolMessage, Seq, Side};
use tokio::sync::watch;

use super::observer::SyncObserver;
use super::rules::ChessRules;
use super::session::{GameSession, MoveOrigin, MoveRecord, SessionEndReason};
use crate::error::{Result, SyncError};
use crate::network::ConnectionState;

/// 缓存的超前消息
#[derive(Debug, Clone, Copy)]
enum Pending {
    /// 等待按序执行的走法
    Move(Move),
    /// 已处理的非走法消息，只占位
    Marker,
}

/// 对方序列号相对于基线的位置
enum Order {
    Stale,
    Next,
    Ahead,
}

/// 同步协调器
pub struct SyncCoordinator<R: ChessRules> {
    rules: R,
    observer: Arc<dyn SyncObserver>,
    local_side: Side,
    /// 下一条出站消息的序列号
    next_seq: Seq,
    session: Option<GameSession>,
    /// 最后按序处理的对方序列号
    last_seen: Option<Seq>,
    pending: BTreeMap<Seq, Pending>,
    max_pending: usize,
    /// 当前缺口是否已经请求过快照
    gap_requested: bool,
    outbox: Vec<ProtocolMessage>,
    connection: watch::Receiver<ConnectionState>,
    reconnecting: bool,
    published: watch::Sender<Option<GameSession>>,
}

impl<R: ChessRules> SyncCoordinator<R> {
    pub fn new(
        rules: R,
        observer: Arc<dyn SyncObserver>,
        local_side: Side,
        max_pending: usize,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            rules,
            observer,
            local_side,
            next_seq: 1,
            session: None,
            last_seen: None,
            pending: BTreeMap::new(),
            max_pending,
            gap_requested: false,
            outbox: Vec::new(),
            connection,
            reconnecting: false,
            published,
        }
    }

    /// 订阅会话快照
    pub fn subscribe(&self) -> watch::Receiver<Option<GameSession>> {
        self.published.subscribe()
    }

    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    pub fn local_side(&self) -> Side {
        self.local_side
    }

    /// 最后按序处理的对方序列号
    pub fn last_seen(&self) -> Option<Seq> {
        self.last_seen
    }

    /// 缓存中的超前消息数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 取出待发送的消息
    pub fn take_outbox(&mut self) -> Vec<ProtocolMessage> {
        std::mem::take(&mut self.outbox)
    }

    // ========================================================================
    // 本地操作
    // ========================================================================

    /// 开始新对局并通知对方
    pub fn join(&mut self) {
        if self.session.is_some() {
            self.end_session(SessionEndReason::Replaced);
        }
        self.clear_pending();

        let session = GameSession::new(self.local_side, self.connection.clone());
        tracing::info!("Joining game as {}", self.local_side);
        let side = Some(self.local_side);
        self.emit(|seq| ProtocolMessage::Join { seq, side });
        self.start_session(session);
    }

    /// 走一步本方棋
    pub fn send_local_move(&mut self, mv: Move) -> Result<()> {
        let local_side = self.local_side;
        let session = self.session.as_ref().ok_or(SyncError::NoSession)?;

        if session.state.side_to_move != local_side {
            return Err(SyncError::NotYourTurn);
        }
        if mv.side != local_side || !self.rules.is_legal(&session.state, &mv) {
            return Err(SyncError::IllegalMove(mv));
        }

        let seq = self.emit(|seq| ProtocolMessage::from_move(seq, &mv));
        self.apply_move(mv, seq, MoveOrigin::Local);
        self.publish();
        Ok(())
    }

    /// 离开当前对局
    pub fn leave(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(SyncError::NoSession);
        }
        self.emit(|seq| ProtocolMessage::Leave { seq });
        self.end_session(SessionEndReason::LocalLeft);
        Ok(())
    }

    /// 发送心跳
    pub fn heartbeat(&mut self) {
        self.emit(|seq| ProtocolMessage::Heartbeat { seq });
    }

    // ========================================================================
    // 连接状态
    // ========================================================================

    pub fn handle_connection_state(&mut self, state: ConnectionState) {
        self.observer.on_connection_state_changed(state);

        match state {
            ConnectionState::Reconnecting => self.reconnecting = true,
            ConnectionState::Connected => {
                if std::mem::take(&mut self.reconnecting) && self.session.is_some() {
                    tracing::info!("Reconnected, requesting snapshot from peer");
                    self.request_sync();
                }
            }
            ConnectionState::Disconnected => {
                self.reconnecting = false;
                if self.session.is_some() {
                    self.end_session(SessionEndReason::ConnectionLost);
                }
                self.last_seen = None;
                self.clear_pending();
            }
            ConnectionState::Connecting => {}
        }

        self.publish();
    }

    // ========================================================================
    // 对方消息
    // ========================================================================

    /// 处理一条对方消息
    pub fn handle_message(&mut self, msg: ProtocolMessage) {
        tracing::debug!("Received {} seq={}", msg.kind(), msg.seq());

        match msg {
            ProtocolMessage::Join { seq, side } => self.on_peer_join(seq, side),
            ProtocolMessage::Leave { seq } => self.on_peer_leave(seq),
            ProtocolMessage::Move {
                seq,
                from,
                to,
                promotion,
                side,
            } => self.on_peer_move(
                seq,
                Move {
                    from,
                    to,
                    promotion,
                    side,
                },
            ),
            ProtocolMessage::SyncRequest { seq } => self.on_sync_request(seq),
            ProtocolMessage::SyncState { seq, ack, .. } => {
                // snapshot_state 只对 SyncState 返回 Some
                if let Some(state) = msg.snapshot_state() {
                    self.on_sync_state(seq, ack, state);
                }
            }
            ProtocolMessage::Error { seq, message, code } => self.on_peer_error(seq, message, code),
            ProtocolMessage::Heartbeat { seq } => {
                self.sequence_marker(seq);
            }
        }

        self.publish();
    }

    fn on_peer_join(&mut self, seq: Seq, side: Option<Side>) {
        if side == Some(self.local_side) {
            tracing::warn!("Peer joined as {}, same side as us", self.local_side);
        }
        if self.session.is_some() {
            self.end_session(SessionEndReason::Replaced);
        }
        self.clear_pending();
        self.last_seen = Some(seq);

        let mut session = GameSession::new(self.local_side, self.connection.clone());
        session.peer_side = side;
        tracing::info!("Peer joined (seq {}), starting new game", seq);
        self.start_session(session);
        self.send_snapshot();
    }

    fn on_peer_leave(&mut self, seq: Seq) {
        if matches!(self.order(seq), Order::Stale) {
            tracing::debug!("Ignoring stale leave seq={}", seq);
            return;
        }
        self.last_seen = Some(seq);
        self.clear_pending();
        if self.session.is_some() {
            tracing::info!("Peer left the game");
            self.end_session(SessionEndReason::PeerLeft);
        }
    }

    fn on_peer_move(&mut self, seq: Seq, mv: Move) {
        match self.order(seq) {
            Order::Stale => {
                tracing::debug!("Discarding replayed move {} seq={}", mv, seq);
            }
            Order::Next => {
                self.last_seen = Some(seq);
                self.apply_remote(seq, mv);
                self.drain_pending();
            }
            Order::Ahead => self.buffer(seq, Pending::Move(mv)),
        }
    }

    fn on_sync_request(&mut self, seq: Seq) {
        if !self.sequence_marker(seq) {
            return;
        }
        if self.session.is_some() {
            self.send_snapshot();
        } else {
            self.emit(|seq| ProtocolMessage::Error {
                seq,
                message: "no active game".to_string(),
                code: Some(ErrorCode::NoSession),
            });
        }
    }

    fn on_sync_state(&mut self, seq: Seq, ack: Seq, state: BoardState) {
        if self.last_seen.is_some_and(|last| seq <= last) {
            tracing::debug!("Discarding stale snapshot seq={}", seq);
            return;
        }

        self.last_seen = Some(seq);
        self.pending.retain(|&buffered, _| buffered > seq);
        self.gap_requested = false;

        match self.session.as_mut() {
            Some(session) => {
                let unacked = session.unacked_local_moves(ack);
                let mut board = state;
                let mut history = Vec::with_capacity(unacked.len());
                for (local_seq, mv) in unacked {
                    if self.rules.is_legal(&board, &mv) {
                        board = self.rules.apply_move(&board, &mv);
                        history.push(MoveRecord::new(mv, local_seq, MoveOrigin::Local));
                    } else {
                        tracing::warn!("Dropping local move {} rejected by snapshot", mv);
                    }
                }
                session.state = board;
                session.history = history;
                session.resync_count += 1;
                tracing::info!(
                    "Board reset from snapshot seq={} (resync #{})",
                    seq,
                    session.resync_count
                );
                self.observer.on_board_reset(&session.state);
            }
            None => {
                let session =
                    GameSession::with_state(state, self.local_side, self.connection.clone());
                tracing::info!("Adopted game from snapshot seq={}", seq);
                self.start_session(session);
                if let Some(session) = &self.session {
                    self.observer.on_board_reset(&session.state);
                }
            }
        }

        self.drain_pending();
    }

    fn on_peer_error(&mut self, seq: Seq, message: String, code: Option<ErrorCode>) {
        if !self.sequence_marker(seq) {
            return;
        }
        tracing::warn!("Peer reported error {:?}: {}", code, message);
        self.observer.on_error(&SyncError::Remote { code, message });

        if code == Some(ErrorCode::IllegalMove) && self.session.is_some() {
            // 对方拒绝了我们的走法，以对方局面为准
            self.observer.on_desync();
            self.request_sync();
        }
    }

    // ========================================================================
    // 序列号处理
    // ========================================================================

    /// 对方序列号未知时，首条消息建立基线
    fn order(&self, seq: Seq) -> Order {
        match self.last_seen {
            None => Order::Next,
            Some(last) if seq <= last => Order::Stale,
            Some(last) if seq == last + 1 => Order::Next,
            Some(_) => Order::Ahead,
        }
    }

    /// 推进非走法消息的序列号，返回该消息是否应被处理（非重放）
    fn sequence_marker(&mut self, seq: Seq) -> bool {
        match self.order(seq) {
            Order::Stale => {
                tracing::debug!("Discarding replayed message seq={}", seq);
                false
            }
            Order::Next => {
                self.last_seen = Some(seq);
                self.drain_pending();
                true
            }
            Order::Ahead => {
                self.buffer(seq, Pending::Marker);
                true
            }
        }
    }

    fn buffer(&mut self, seq: Seq, entry: Pending) {
        if self.pending.contains_key(&seq) {
            tracing::debug!("Already buffered seq={}", seq);
            return;
        }

        if self.pending.len() >= self.max_pending {
            let error = SyncError::Desync {
                buffered: self.pending.len(),
                capacity: self.max_pending,
            };
            tracing::warn!("{}, dropping buffer", error);
            self.observer.on_error(&error);
            self.observer.on_desync();
            self.clear_pending();
            self.request_sync();
            return;
        }

        tracing::debug!(
            "Buffered seq={} (last seen {:?}, {} pending)",
            seq,
            self.last_seen,
            self.pending.len() + 1
        );
        self.pending.insert(seq, entry);

        if !self.gap_requested {
            self.observer.on_desync();
            self.request_sync();
        }
    }

    /// 依次执行缓存中已连续的消息
    fn drain_pending(&mut self) {
        while let Some(next) = self.last_seen.and_then(|last| last.checked_add(1)) {
            let Some(entry) = self.pending.remove(&next) else {
                break;
            };
            self.last_seen = Some(next);
            if let Pending::Move(mv) = entry {
                self.apply_remote(next, mv);
            }
        }
        if self.pending.is_empty() {
            self.gap_requested = false;
        }
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.gap_requested = false;
    }

    // ========================================================================
    // 辅助
    // ========================================================================

    /// 执行一步对方走法；非法时回复错误，不修改棋盘
    fn apply_remote(&mut self, seq: Seq, mv: Move) {
        let Some(session) = self.session.as_ref() else {
            tracing::warn!("Move {} seq={} arrived without a game", mv, seq);
            self.emit(|seq| ProtocolMessage::Error {
                seq,
                message: format!("no active game for move {}", mv),
                code: Some(ErrorCode::NoSession),
            });
            return;
        };

        if mv.side == self.local_side || !self.rules.is_legal(&session.state, &mv) {
            tracing::warn!("Rejecting illegal move {} seq={}", mv, seq);
            self.observer.on_error(&SyncError::IllegalMove(mv));
            self.emit(|seq| ProtocolMessage::Error {
                seq,
                message: format!("illegal move {}", mv),
                code: Some(ErrorCode::IllegalMove),
            });
            return;
        }

        self.apply_move(mv, seq, MoveOrigin::Remote);
    }

    fn apply_move(&mut self, mv: Move, seq: Seq, origin: MoveOrigin) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state = self.rules.apply_move(&session.state, &mv);
        let record = MoveRecord::new(mv, seq, origin);
        tracing::debug!("Applied {:?} move {} seq={}", origin, mv, seq);
        self.observer.on_move_applied(&record);
        session.history.push(record);
    }

    fn send_snapshot(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let ack = self.last_seen.unwrap_or(0);
        let state = session.state.clone();
        self.emit(|seq| ProtocolMessage::snapshot(seq, ack, &state));
    }

    fn request_sync(&mut self) {
        self.gap_requested = true;
        self.emit(|seq| ProtocolMessage::SyncRequest { seq });
    }

    fn start_session(&mut self, session: GameSession) {
        self.observer.on_session_started(&session);
        self.session = Some(session);
        self.publish();
    }

    fn end_session(&mut self, reason: SessionEndReason) {
        if self.session.take().is_some() {
            tracing::info!("Game ended: {}", reason);
            self.observer.on_session_ended(reason);
            self.publish();
        }
    }

    /// 分配序列号并放入待发送队列
    fn emit(&mut self, build: impl FnOnce(Seq) -> ProtocolMessage) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outbox.push(build(seq));
        seq
    }

    fn publish(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.peer_seq = self.last_seen;
        }
        self.published.send_replace(self.session.clone());
    }
}
