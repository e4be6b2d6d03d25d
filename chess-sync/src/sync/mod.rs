//! 对局同步

mod coordinator;
mod heartbeat;
mod observer;
mod rules;
mod session;

pub use coordinator::SyncCoordinator;
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use observer::{LoggingObserver, NoopObserver, SyncObserver};
pub use rules::{ChessRules, StandardRules};
pub use session::{GameSession, MoveOrigin, MoveRecord, SessionEndReason};
