//! # D1 Protocol
//!
//! 机械臂 UDP 文本协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 端口、地址和总线主题常量
//! - `command`: 命令帧构建与解析（funcode 1 / 5）
//! - `feedback`: 反馈帧解析（funcode 4）
//!
//! ## 编码
//!
//! 协议为 UTF-8 JSON 文本，每个 UDP 数据报承载一个对象：
//!
//! ```text
//! {"seq":<u32>,"address":1,"funcode":<1|4|5>,"data":{...}}
//! ```
//!
//! 命令方向（控制端 → relay）使用 funcode 1（设置单关节角度）和
//! funcode 5（电源模式）；反馈方向（relay → 控制端）固定 funcode 4。

pub mod command;
pub mod error;
pub mod feedback;
pub mod ids;

// 重新导出常用类型
pub use command::*;
pub use error::ProtocolError;
pub use feedback::*;
pub use ids::*;
