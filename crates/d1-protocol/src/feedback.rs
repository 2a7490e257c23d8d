//! 反馈帧解析
//!
//! relay 在每次收到舵机角度更新后，把已知的最新角度和电源/故障标志
//! 重新编码为一条 funcode 4 数据报推送给控制端。
//!
//! 所有字段均为可选：残缺数据报中缺失的字段在链路层保留旧值，
//! 不会重置为默认值。

use crate::error::ProtocolError;
use crate::ids::{NUM_JOINTS, ROBOT_ADDRESS};
use serde::{Deserialize, Serialize};

/// 反馈数据体
///
/// 字段名与固件端输出一致（`angle0`..`angle6`）。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedbackData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_status: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_status: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle0: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle3: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle4: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle5: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle6: Option<f64>,
}

impl FeedbackData {
    /// 按关节索引展开角度字段
    pub fn angles(&self) -> [Option<f64>; NUM_JOINTS] {
        [
            self.angle0,
            self.angle1,
            self.angle2,
            self.angle3,
            self.angle4,
            self.angle5,
            self.angle6,
        ]
    }

    /// 从完整角度数组构建数据体（relay 端使用）
    pub fn from_full(power_status: i32, error_status: i32, angles: [f64; NUM_JOINTS]) -> Self {
        Self {
            power_status: Some(power_status),
            error_status: Some(error_status),
            angle0: Some(angles[0]),
            angle1: Some(angles[1]),
            angle2: Some(angles[2]),
            angle3: Some(angles[3]),
            angle4: Some(angles[4]),
            angle5: Some(angles[5]),
            angle6: Some(angles[6]),
        }
    }
}

/// 反馈帧（funcode 固定为 4）
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackFrame {
    pub seq: u32,
    pub address: u8,
    pub data: FeedbackData,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    seq: u32,
    address: u8,
    funcode: u8,
    data: FeedbackData,
}

impl FeedbackFrame {
    /// 反馈帧的功能码
    pub const FUNCODE: u8 = 4;

    pub fn new(seq: u32, data: FeedbackData) -> Self {
        Self {
            seq,
            address: ROBOT_ADDRESS,
            data,
        }
    }

    /// 编码为一行紧凑 JSON
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let envelope = Envelope {
            seq: self.seq,
            address: self.address,
            funcode: Self::FUNCODE,
            data: self.data.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// 从 UDP 数据报文本解析反馈帧
    ///
    /// 非 funcode 4 的数据报在反馈方向上无效。
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        if envelope.funcode != Self::FUNCODE {
            return Err(ProtocolError::WrongDirection {
                funcode: envelope.funcode,
            });
        }

        Ok(Self {
            seq: envelope.seq,
            address: envelope.address,
            data: envelope.data,
        })
    }
}

/// 舵机角度总线消息（7 个数值字段）
///
/// 固件在 `current_servo_angle` 主题上发布的结构化消息形状。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ServoAngles {
    pub servo0: f64,
    pub servo1: f64,
    pub servo2: f64,
    pub servo3: f64,
    pub servo4: f64,
    pub servo5: f64,
    pub servo6: f64,
}

impl ServoAngles {
    /// 按关节索引展开
    pub fn to_array(&self) -> [f64; NUM_JOINTS] {
        [
            self.servo0,
            self.servo1,
            self.servo2,
            self.servo3,
            self.servo4,
            self.servo5,
            self.servo6,
        ]
    }
}
