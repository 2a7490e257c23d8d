//! 延迟命令调度器
//!
//! 延迟命令以显式调度记录 `{fire_at, epoch, command}` 表示，由单一
//! 定时驱动的分发线程处理：触发时比较记录携带的纪元与当前取消纪元，
//! 不一致则静默丢弃。取消依赖比较而非销毁定时器，不存在取消与触发
//! 之间的竞态窗口。
//!
//! 周期性任务（存活检查、恢复节拍）不携带纪元，不受取消影响；
//! 它们触发后自行重新入队，构成单一逻辑时间线。

use crate::link::LinkShared;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use d1_protocol::PowerMode;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// 可调度的链路命令
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkCommand {
    /// 单关节角度（触发时按当前限位重新夹取）
    JointAngle { id: usize, angle: f64, delay_ms: u32 },
    /// 电源模式
    PowerMode { mode: PowerMode },
    /// 固定单关节于触发时刻的当前角度
    HoldJoint { id: usize, transition_ms: u32 },
    /// 展开为一组 HoldJoint（错峰下发）
    HoldPosition {
        start_delay_ms: u64,
        stagger_ms: u64,
        transition_ms: u32,
    },
    /// 周期性存活检查（触发后自行重排）
    ConnectionCheck,
    /// 恢复流程节拍（运行中时自行重排）
    RecoveryTick,
}

/// 调度记录
///
/// `epoch` 为 `None` 的记录是周期性任务，不参与取消比较。
#[derive(Debug)]
pub(crate) struct ScheduledCommand {
    pub fire_at: Instant,
    pub epoch: Option<u64>,
    pub command: LinkCommand,
    /// 同一触发时刻内保持先进先出
    pub order: u64,
}

impl PartialEq for ScheduledCommand {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.order == other.order
    }
}

impl Eq for ScheduledCommand {}

impl PartialOrd for ScheduledCommand {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledCommand {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at.cmp(&other.fire_at).then(self.order.cmp(&other.order))
    }
}

/// 空闲时的最大等待时长（同时决定关闭时的响应速度）
const IDLE_WAIT: Duration = Duration::from_millis(200);

/// 调度器线程主循环
///
/// 最小堆按触发时刻排序；通道既接收新的调度记录，也充当睡眠定时器
/// （`recv_timeout` 到下一个触发时刻）。
pub(crate) fn scheduler_loop(
    shared: Arc<LinkShared>,
    rx: Receiver<ScheduledCommand>,
    running: Arc<AtomicBool>,
) {
    let mut heap: BinaryHeap<Reverse<ScheduledCommand>> = BinaryHeap::new();

    while running.load(Ordering::Acquire) {
        let timeout = heap
            .peek()
            .map(|Reverse(cmd)| cmd.fire_at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT)
            .min(IDLE_WAIT);

        match rx.recv_timeout(timeout) {
            Ok(cmd) => heap.push(Reverse(cmd)),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(cmd)| cmd.fire_at <= now) {
            if let Some(Reverse(cmd)) = heap.pop() {
                execute(&shared, cmd);
            }
        }
    }
}

/// 执行一条到期的调度记录
fn execute(shared: &Arc<LinkShared>, cmd: ScheduledCommand) {
    // 纪元比较：取消发生在调度之后的记录一律静默丢弃
    if let Some(epoch) = cmd.epoch
        && epoch != shared.current_epoch()
    {
        trace!(command = ?cmd.command, "dropping stale scheduled command");
        return;
    }

    match cmd.command {
        LinkCommand::JointAngle { id, angle, delay_ms } => {
            if shared.is_stopped() {
                return;
            }
            shared.send_joint_angle(id, angle, delay_ms);
        },
        LinkCommand::PowerMode { mode } => {
            if shared.is_stopped() {
                return;
            }
            shared.send_power_mode(mode);
        },
        LinkCommand::HoldJoint { id, transition_ms } => {
            if shared.is_stopped() || !shared.is_connected() {
                return;
            }
            let angle = shared.snapshot().joints[id].angle;
            shared.send_joint_angle(id, angle, transition_ms);
        },
        LinkCommand::HoldPosition {
            start_delay_ms,
            stagger_ms,
            transition_ms,
        } => {
            if shared.is_stopped() || !shared.is_connected() {
                return;
            }
            shared.schedule_hold(cmd.epoch, start_delay_ms, stagger_ms, transition_ms);
        },
        LinkCommand::ConnectionCheck => {
            shared.run_connection_check();
            shared.schedule_in(
                shared.config().connection_check_interval,
                None,
                LinkCommand::ConnectionCheck,
            );
        },
        LinkCommand::RecoveryTick => {
            if shared.run_recovery_tick() {
                shared.schedule_in(shared.config().recovery_tick, None, LinkCommand::RecoveryTick);
            }
        },
    }
}
