//! 命令帧构建与解析
//!
//! 命令方向（控制端 → relay → 固件）只使用两个功能码：
//!
//! - funcode 1：设置单关节角度 + 过渡时间
//! - funcode 5：电源模式（0 = 关，1 = 开）
//!
//! 每条命令携带单调递增的 `seq`（线路层编号，与链路层的取消纪元无关）。

use crate::error::ProtocolError;
use crate::ids::ROBOT_ADDRESS;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

/// 协议功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    /// 设置单关节角度
    SetJointAngle = 1,
    /// 状态反馈（仅反馈方向）
    Feedback = 4,
    /// 电源模式
    SetPowerMode = 5,
}

/// 电源模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum PowerMode {
    Off = 0,
    On = 1,
}

/// 命令负载（按功能码区分）
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// funcode 1：单关节目标角度
    JointAngle {
        /// 关节索引（0-6）
        id: u8,
        /// 目标角度（度）
        angle: f64,
        /// 过渡时间（毫秒）
        delay_ms: u32,
    },
    /// funcode 5：电源模式
    PowerMode { mode: PowerMode },
}

impl CommandPayload {
    /// 负载对应的功能码
    pub fn funcode(&self) -> FunctionCode {
        match self {
            CommandPayload::JointAngle { .. } => FunctionCode::SetJointAngle,
            CommandPayload::PowerMode { .. } => FunctionCode::SetPowerMode,
        }
    }
}

/// 命令帧
///
/// `seq` 为线路层序号，由链路在发送时填入；`address` 恒为 1。
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    pub seq: u32,
    pub address: u8,
    pub payload: CommandPayload,
}

/// JSON 信封（序列化中间表示）
#[derive(Serialize, Deserialize)]
struct Envelope {
    seq: u32,
    address: u8,
    funcode: u8,
    data: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct JointAngleData {
    id: u8,
    angle: f64,
    delay_ms: u32,
}

#[derive(Serialize, Deserialize)]
struct PowerModeData {
    mode: u8,
}

/// 角度按两位小数上线（与固件端解析精度一致）
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl CommandFrame {
    /// 构建命令帧
    pub fn new(seq: u32, payload: CommandPayload) -> Self {
        Self {
            seq,
            address: ROBOT_ADDRESS,
            payload,
        }
    }

    /// 编码为一行紧凑 JSON（UDP 数据报内容）
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match &self.payload {
            CommandPayload::JointAngle {
                id,
                angle,
                delay_ms,
            } => serde_json::to_value(JointAngleData {
                id: *id,
                angle: round2(*angle),
                delay_ms: *delay_ms,
            })?,
            CommandPayload::PowerMode { mode } => serde_json::to_value(PowerModeData {
                mode: *mode as u8,
            })?,
        };

        let envelope = Envelope {
            seq: self.seq,
            address: self.address,
            funcode: self.payload.funcode() as u8,
            data,
        };

        Ok(serde_json::to_string(&envelope)?)
    }

    /// 从 UDP 数据报文本解析命令帧
    ///
    /// relay 端用于识别转发的命令；未知 funcode 或反馈方向的
    /// funcode 4 均报错。
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        let funcode = FunctionCode::try_from(envelope.funcode)
            .map_err(|_| ProtocolError::UnknownFuncode {
                funcode: envelope.funcode,
            })?;

        let payload = match funcode {
            FunctionCode::SetJointAngle => {
                let data: JointAngleData = serde_json::from_value(envelope.data)?;
                CommandPayload::JointAngle {
                    id: data.id,
                    angle: data.angle,
                    delay_ms: data.delay_ms,
                }
            },
            FunctionCode::SetPowerMode => {
                let data: PowerModeData = serde_json::from_value(envelope.data)?;
                let mode = PowerMode::try_from(data.mode).map_err(|_| {
                    ProtocolError::OutOfRange {
                        field: "mode",
                        value: data.mode as i64,
                    }
                })?;
                CommandPayload::PowerMode { mode }
            },
            FunctionCode::Feedback => {
                return Err(ProtocolError::WrongDirection {
                    funcode: envelope.funcode,
                });
            },
        };

        Ok(Self {
            seq: envelope.seq,
            address: envelope.address,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_angle_encode() {
        let frame = CommandFrame::new(
            7,
            CommandPayload::JointAngle {
                id: 2,
                angle: 45.5,
                delay_ms: 500,
            },
        );
        let text = frame.encode().unwrap();
        assert!(text.contains("\"seq\":7"));
        assert!(text.contains("\"address\":1"));
        assert!(text.contains("\"funcode\":1"));
        assert!(text.contains("\"id\":2"));
        assert!(text.contains("\"delay_ms\":500"));
    }

    #[test]
    fn test_power_mode_encode() {
        let frame = CommandFrame::new(1, CommandPayload::PowerMode { mode: PowerMode::On });
        let text = frame.encode().unwrap();
        assert!(text.contains("\"funcode\":5"));
        assert!(text.contains("\"mode\":1"));
    }

    #[test]
    fn test_round_trip() {
        let frame = CommandFrame::new(
            42,
            CommandPayload::JointAngle {
                id: 0,
                angle: -90.25,
                delay_ms: 1000,
            },
        );
        let decoded = CommandFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_angle_rounded_to_two_decimals() {
        let frame = CommandFrame::new(
            1,
            CommandPayload::JointAngle {
                id: 1,
                angle: 12.345678,
                delay_ms: 300,
            },
        );
        let decoded = CommandFrame::decode(&frame.encode().unwrap()).unwrap();
        match decoded.payload {
            CommandPayload::JointAngle { angle, .. } => assert_eq!(angle, 12.35),
            _ => panic!("Expected JointAngle payload"),
        }
    }

    #[test]
    fn test_unknown_funcode_rejected() {
        let text = r#"{"seq":1,"address":1,"funcode":9,"data":{}}"#;
        let err = CommandFrame::decode(text).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownFuncode { funcode: 9 }));
    }

    #[test]
    fn test_feedback_funcode_rejected_in_command_direction() {
        let text = r#"{"seq":1,"address":1,"funcode":4,"data":{}}"#;
        let err = CommandFrame::decode(text).unwrap_err();
        assert!(matches!(err, ProtocolError::WrongDirection { funcode: 4 }));
    }

    #[test]
    fn test_invalid_power_mode_rejected() {
        let text = r#"{"seq":1,"address":1,"funcode":5,"data":{"mode":3}}"#;
        let err = CommandFrame::decode(text).unwrap_err();
        assert!(matches!(err, ProtocolError::OutOfRange { field: "mode", .. }));
    }
}
