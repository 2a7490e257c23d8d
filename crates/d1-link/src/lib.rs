//! 链路层模块
//!
//! 本模块是机械臂连接、状态与安全契约的唯一所有者，包括：
//! - 双向 UDP 通道（出站命令 / 入站反馈）
//! - 状态同步（写侧互斥 + ArcSwap 快照读取）
//! - 急停与命令取消（单调递增的取消纪元）
//! - 连接存活检测（反馈超时，边沿触发通知）
//! - 多步恢复流程（显式状态机，固定 100ms 节拍）
//!
//! # 使用场景
//!
//! 所有发往机械臂的意图（单关节、全关节、回 home、电源）都必须经过
//! [`ArmLink`]；上层（动作回放、录制、UI）只通过值拷贝快照读取状态，
//! 绝不持有内部引用。

mod config;
mod error;
pub mod events;
mod link;
pub mod monitor;
pub mod recovery;
mod scheduler;
pub mod state;

pub use config::LinkConfig;
pub use error::LinkError;
pub use events::LinkEvent;
pub use link::ArmLink;
pub use recovery::RecoveryStage;
pub use state::{ArmState, JointState, PowerStatus};
