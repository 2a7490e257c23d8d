//! # D1 Motion
//!
//! 在 [`d1_link::ArmLink`] 之上实现动作回放与动作录制。
//!
//! ## 模块
//!
//! - `player`: 关键帧回放（速度缩放、循环衔接、距离配速）
//! - `recorder`: 关键帧录制（按间隔打时间戳，支持自动采样）
//!
//! 两者都只通过链路的值拷贝快照读取状态，并在每个节拍检查急停、
//! 连接与故障标志；链路层故障以事件通知，不在调用栈中向上抛出。

pub mod error;
pub mod player;
pub mod recorder;

pub use error::MotionError;
pub use player::{MotionPlayer, PlayerEvent, PlayerStatus};
pub use recorder::{MotionRecorder, RecorderEvent};
