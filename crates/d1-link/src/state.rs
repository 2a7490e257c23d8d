//! 机械臂状态快照类型
//!
//! [`ArmState`] 由链路独占拥有：反馈解析是唯一写入者，所有其它
//! 消费者只拿到值拷贝快照，避免并发更新下的撕裂读取。

use d1_protocol::NUM_JOINTS;

/// 电源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerStatus {
    #[default]
    Off,
    On,
}

impl PowerStatus {
    /// 从线路值映射（1 = 开，其余 = 关）
    pub fn from_wire(value: i32) -> Self {
        if value == 1 { PowerStatus::On } else { PowerStatus::Off }
    }

    pub fn is_on(self) -> bool {
        self == PowerStatus::On
    }
}

/// 单关节状态
///
/// `velocity` 与 `torque` 为占位字段：当前反馈通道不携带这两项，
/// 保留字段以保持快照形状稳定。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointState {
    /// 当前角度（度）
    pub angle: f64,
    pub velocity: f64,
    pub torque: f64,
    /// 软限位下界（度）
    pub min_limit: f64,
    /// 软限位上界（度）
    pub max_limit: f64,
}

impl Default for JointState {
    fn default() -> Self {
        Self {
            angle: 0.0,
            velocity: 0.0,
            torque: 0.0,
            min_limit: -180.0,
            max_limit: 180.0,
        }
    }
}

/// 整臂状态快照
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArmState {
    pub joints: [JointState; NUM_JOINTS],
    pub power_status: PowerStatus,
    /// 0 = 正常，非零为固件故障码
    pub error_status: i32,
    pub connected: bool,
    /// 最近一次反馈的接收时刻（应用启动起算的微秒）
    pub last_feedback_us: u64,
}

impl ArmState {
    /// D1-550 出厂物理限位
    pub const DEFAULT_LIMITS: [(f64, f64); NUM_JOINTS] = [
        (-135.0, 135.0), // J0: 基座
        (-90.0, 90.0),   // J1: 肩
        (-90.0, 90.0),   // J2: 肘
        (-135.0, 135.0), // J3: 前臂
        (-90.0, 90.0),   // J4: 腕俯仰
        (-135.0, 135.0), // J5: 腕旋转
        (0.0, 100.0),    // J6: 夹爪（0-100%）
    ];

    /// 以默认物理限位构建初始状态
    pub fn with_default_limits() -> Self {
        let mut state = Self::default();
        for (joint, (min_limit, max_limit)) in state.joints.iter_mut().zip(Self::DEFAULT_LIMITS) {
            joint.min_limit = min_limit;
            joint.max_limit = max_limit;
        }
        state
    }

    pub fn has_error(&self) -> bool {
        self.error_status != 0
    }

    /// 7 个关节角度的数组视图
    pub fn joint_angles(&self) -> [f64; NUM_JOINTS] {
        let mut angles = [0.0; NUM_JOINTS];
        for (slot, joint) in angles.iter_mut().zip(self.joints.iter()) {
            *slot = joint.angle;
        }
        angles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_status_from_wire() {
        assert_eq!(PowerStatus::from_wire(1), PowerStatus::On);
        assert_eq!(PowerStatus::from_wire(0), PowerStatus::Off);
        assert_eq!(PowerStatus::from_wire(7), PowerStatus::Off);
    }

    #[test]
    fn test_default_limits_applied() {
        let state = ArmState::with_default_limits();
        assert_eq!(state.joints[0].min_limit, -135.0);
        assert_eq!(state.joints[1].max_limit, 90.0);
        assert_eq!(state.joints[6].min_limit, 0.0);
        assert_eq!(state.joints[6].max_limit, 100.0);
        assert!(!state.connected);
        assert!(!state.has_error());
    }

    #[test]
    fn test_joint_angles_view() {
        let mut state = ArmState::with_default_limits();
        state.joints[2].angle = 42.5;
        let angles = state.joint_angles();
        assert_eq!(angles[2], 42.5);
        assert_eq!(angles[0], 0.0);
    }
}
