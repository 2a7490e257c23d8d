//! # D1 Tools
//!
//! 共享数据结构与持久化（无套接字、无线程依赖）
//!
//! ## 模块
//!
//! - `calibration`: 每关节标定数据与软限位
//! - `motion`: 关键帧动作及动作库
//! - `pose`: 单帧姿态及姿态库
//!
//! 所有持久化文档均为 JSON，整体读写；缺失字段在加载时回落到默认值，
//! 以容忍旧版本文件。

pub mod calibration;
pub mod motion;
pub mod pose;

pub use calibration::{CalibrationData, JointCalibration};
pub use motion::{Motion, MotionKeyframe, MotionLibrary};
pub use pose::{Pose, PoseLibrary};
