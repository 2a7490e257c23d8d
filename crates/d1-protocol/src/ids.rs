//! 端口、地址与总线主题常量定义

/// 关节数量（6 个臂关节 + 1 个夹爪）
pub const NUM_JOINTS: usize = 7;

/// 夹爪关节索引
pub const GRIPPER_JOINT: usize = 6;

/// 命令端口（控制端 → relay）
pub const UDP_CMD_PORT: u16 = 8888;

/// 反馈端口（relay → 控制端）
pub const UDP_FEEDBACK_PORT: u16 = 8889;

/// 机械臂地址（协议中恒为 1）
pub const ROBOT_ADDRESS: u8 = 1;

/// 命令主题（relay → 固件）
pub const CMD_TOPIC: &str = "rt/arm_Command";

/// 状态反馈主题（固件 → relay，字符串编码）
pub const FEEDBACK_TOPIC: &str = "rt/arm_Feedback";

/// 舵机角度主题（固件 → relay，7 个数值字段）
pub const SERVO_TOPIC: &str = "current_servo_angle";
