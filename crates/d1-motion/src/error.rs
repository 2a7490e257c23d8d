//! 动作层错误类型定义

use thiserror::Error;

/// 动作层错误类型
///
/// 这些错误同时会以事件形式通知订阅者；调用方也可以在下发意图前
/// 自行轮询链路的连接/故障标志。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotionError {
    /// 机械臂未连接
    #[error("Robot is not connected")]
    NotConnected,

    /// 动作不含任何关键帧
    #[error("Motion has no keyframes")]
    EmptyMotion,

    /// 已有录制在进行中
    #[error("Recording already in progress")]
    AlreadyRecording,

    /// 当前没有录制
    #[error("No recording in progress")]
    NotRecording,
}
