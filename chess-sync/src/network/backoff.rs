//! 重连退避
//!
//! 第 n 次连续失败后等待 `min(base * 2^(n-1), cap)`，
//! 连续失败达到 `max_attempts` 次后放弃。

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// 指数退避计数器
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            base: policy.base_delay(),
            cap: policy.max_delay(),
            max_attempts: policy.max_attempts,
            failures: 0,
        }
    }

    /// 记录一次失败，返回下次重试前的等待时间；已达上限时返回 `None`
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            return None;
        }
        Some(self.delay_for(self.failures))
    }

    /// 第 n 次失败后的等待时间
    pub fn delay_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// 连续失败次数
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// 连接成功后清零
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
