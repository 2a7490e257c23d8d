//! 入站命令限速
//!
//! 无令牌的串行限速器：命令到达快于下限间隔时，睡掉差额再转发，
//! 不丢弃也不合并。持续的命令洪峰会让延迟无界累积；有界队列 +
//! 丢最旧是已知的替代方案，当前保留延迟语义。

use std::time::{Duration, Instant};

/// 命令间隔限速器
pub struct CommandPacer {
    min_interval: Duration,
    last: Option<Instant>,
}

impl CommandPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// 距满足最小间隔还差的时长（首条命令无需等待）
    pub fn shortfall(&self, now: Instant) -> Duration {
        match self.last {
            None => Duration::ZERO,
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    /// 睡掉差额并推进内部时钟
    pub fn pace(&mut self) {
        let wait = self.shortfall(Instant::now());
        if !wait.is_zero() {
            spin_sleep::sleep(wait);
        }
        self.last = Some(Instant::now());
    }
}
