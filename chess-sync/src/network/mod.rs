//! 中继网络连接

mod backoff;
mod connection;

pub use backoff::Backoff;
pub use connection::{ConnectionEvent, ConnectionState, RelayConnection};
