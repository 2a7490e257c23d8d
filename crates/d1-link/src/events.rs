//! 链路事件
//!
//! 所有事件均为边沿触发（仅在值变化时发出一次），消费者不能假设
//! 周期性投递。

/// 链路事件
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// 断连后收到第一包反馈
    Connected,
    /// 反馈静默超过存活超时
    Disconnected,
    /// 电源状态翻转
    PowerChanged(bool),
    /// 固件报告非零故障码
    DeviceError(i32),
    /// 恢复流程启动
    RecoveryStarted,
    /// 恢复流程结束（以最终一步时的连接状态判定成败）
    RecoveryFinished(bool),
}
