//! 心跳检测

use std::time::Duration;

use tokio::time::Instant;

use crate::config::HeartbeatConfig;

/// 一次检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    /// 出站空闲超过间隔，应发送心跳
    SendHeartbeat,
    /// 入站空闲超过超时，视为断线
    TimedOut,
}

/// 记录收发时间，判断是否需要心跳或已超时
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_inbound: Instant,
    last_outbound: Instant,
}

impl HeartbeatMonitor {
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        Self {
            interval: config.interval(),
            timeout: config.timeout(),
            last_inbound: now,
            last_outbound: now,
        }
    }

    pub fn record_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
    }

    pub fn record_outbound(&mut self, now: Instant) {
        self.last_outbound = now;
    }

    /// 新连接建立时重新计时
    pub fn reset(&mut self, now: Instant) {
        self.last_inbound = now;
        self.last_outbound = now;
    }

    pub fn check(&self, now: Instant) -> HeartbeatAction {
        if now.saturating_duration_since(self.last_inbound) >= self.timeout {
            HeartbeatAction::TimedOut
        } else if now.saturating_duration_since(self.last_outbound) >= self.interval {
            HeartbeatAction::SendHeartbeat
        } else {
            HeartbeatAction::Idle
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
