//! 标定数据模型
//!
//! 纯数据：每关节的软限位、home 角度、角度偏置、方向与速度系数，
//! 加上全局速度系数和默认过渡时间。由链路和动作层在构建命令时应用，
//! 本模块自身不做任何 I/O。
//!
//! 所有 setter 都会把输入夹到合法范围（速度系数 0.1–2.0，
//! 默认过渡时间 100–5000 毫秒），保证数据在任何时刻都可直接使用。

use anyhow::{Context, Result};
use d1_protocol::NUM_JOINTS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 单关节标定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointCalibration {
    /// 软限位下界（度）
    pub min_angle: f64,
    /// 软限位上界（度）
    pub max_angle: f64,
    /// home 角度（度）
    pub home_angle: f64,
    /// 角度偏置（度）
    pub offset: f64,
    /// 速度系数（0.1–2.0）
    pub speed_factor: f64,
    /// 方向反转
    pub reversed: bool,
}

impl Default for JointCalibration {
    fn default() -> Self {
        Self {
            min_angle: -180.0,
            max_angle: 180.0,
            home_angle: 0.0,
            offset: 0.0,
            speed_factor: 1.0,
            reversed: false,
        }
    }
}

/// 整臂标定数据
///
/// `auto_recovery_enabled` 被建模、持久化并对外暴露，但刻意不用于
/// 自动触发恢复流程：自动恢复在实际使用中会误触发，默认禁用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationData {
    pub joints: [JointCalibration; NUM_JOINTS],
    pub global_speed_factor: f64,
    pub default_delay_ms: u32,
    pub soft_limits_enabled: bool,
    pub auto_recovery_enabled: bool,
}

impl Default for CalibrationData {
    fn default() -> Self {
        // D1-550 物理限位（出厂文档值）
        let limits: [(f64, f64, f64); NUM_JOINTS] = [
            (-135.0, 135.0, 0.0),  // J0: 基座
            (-90.0, 90.0, 0.0),    // J1: 肩
            (-90.0, 90.0, 0.0),    // J2: 肘
            (-135.0, 135.0, 0.0),  // J3: 前臂
            (-90.0, 90.0, 0.0),    // J4: 腕俯仰
            (-135.0, 135.0, 0.0),  // J5: 腕旋转
            (0.0, 100.0, 50.0),    // J6: 夹爪（0-100%）
        ];

        let joints = limits.map(|(min_angle, max_angle, home_angle)| JointCalibration {
            min_angle,
            max_angle,
            home_angle,
            ..JointCalibration::default()
        });

        Self {
            joints,
            global_speed_factor: 1.0,
            default_delay_ms: 500,
            soft_limits_enabled: true,
            auto_recovery_enabled: true,
        }
    }
}

impl CalibrationData {
    /// 从 JSON 文件整体加载（缺失字段回落默认值）
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read calibration file {:?}", path.as_ref()))?;
        let data = serde_json::from_str(&text).context("failed to parse calibration file")?;
        Ok(data)
    }

    /// 整体保存到 JSON 文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to serialize calibration")?;
        std::fs::write(path.as_ref(), text)
            .with_context(|| format!("failed to write calibration file {:?}", path.as_ref()))?;
        tracing::debug!(path = ?path.as_ref(), "calibration saved");
        Ok(())
    }

    /// 单关节标定（越界索引返回默认值）
    pub fn joint(&self, joint: usize) -> JointCalibration {
        self.joints.get(joint).copied().unwrap_or_default()
    }

    pub fn set_joint_limits(&mut self, joint: usize, min_angle: f64, max_angle: f64) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.min_angle = min_angle;
            j.max_angle = max_angle;
        }
    }

    pub fn set_joint_home(&mut self, joint: usize, home_angle: f64) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.home_angle = home_angle;
        }
    }

    pub fn set_joint_offset(&mut self, joint: usize, offset: f64) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.offset = offset;
        }
    }

    pub fn set_joint_speed_factor(&mut self, joint: usize, factor: f64) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.speed_factor = factor.clamp(0.1, 2.0);
        }
    }

    pub fn set_joint_reversed(&mut self, joint: usize, reversed: bool) {
        if let Some(j) = self.joints.get_mut(joint) {
            j.reversed = reversed;
        }
    }

    pub fn set_global_speed_factor(&mut self, factor: f64) {
        self.global_speed_factor = factor.clamp(0.1, 2.0);
    }

    pub fn set_default_delay(&mut self, delay_ms: u32) {
        self.default_delay_ms = delay_ms.clamp(100, 5000);
    }

    pub fn set_soft_limits_enabled(&mut self, enabled: bool) {
        self.soft_limits_enabled = enabled;
    }

    pub fn set_auto_recovery_enabled(&mut self, enabled: bool) {
        self.auto_recovery_enabled = enabled;
    }

    /// 原始角度 → 标定角度（先加偏置，再按需取反）
    pub fn apply(&self, joint: usize, raw_angle: f64) -> f64 {
        let Some(calib) = self.joints.get(joint) else {
            return raw_angle;
        };
        let angle = raw_angle + calib.offset;
        if calib.reversed { -angle } else { angle }
    }

    /// 标定角度 → 原始角度（`apply` 的逆变换）
    pub fn unapply(&self, joint: usize, calibrated_angle: f64) -> f64 {
        let Some(calib) = self.joints.get(joint) else {
            return calibrated_angle;
        };
        let angle = if calib.reversed {
            -calibrated_angle
        } else {
            calibrated_angle
        };
        angle - calib.offset
    }

    /// 按软限位夹取（软限位关闭时恒等）
    pub fn clamp(&self, joint: usize, angle: f64) -> f64 {
        if !self.soft_limits_enabled {
            return angle;
        }
        match self.joints.get(joint) {
            Some(calib) => angle.clamp(calib.min_angle, calib.max_angle),
            None => angle,
        }
    }

    /// 按角度差和速度系数推算过渡时间
    ///
    /// 基准为默认过渡时间，除以关节与全局速度系数，再按位移放大
    /// （每 90° 额外增加一个基准时长），最终夹到 100–5000 毫秒。
    pub fn transition_delay(&self, joint: usize, angle_delta: f64) -> u32 {
        let mut delay = self.default_delay_ms as f64;

        if let Some(calib) = self.joints.get(joint) {
            delay /= calib.speed_factor;
        }
        delay /= self.global_speed_factor;

        let move_factor = angle_delta.abs() / 90.0;
        delay *= 1.0 + move_factor;

        delay.clamp(100.0, 5000.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_gripper_limits() {
        let data = CalibrationData::default();
        let gripper = data.joint(6);
        assert_eq!(gripper.min_angle, 0.0);
        assert_eq!(gripper.max_angle, 100.0);
        assert_eq!(gripper.home_angle, 50.0);
    }

    #[test]
    fn test_setters_clamp_to_valid_ranges() {
        let mut data = CalibrationData::default();

        data.set_joint_speed_factor(0, 99.0);
        assert_eq!(data.joint(0).speed_factor, 2.0);
        data.set_joint_speed_factor(0, 0.0);
        assert_eq!(data.joint(0).speed_factor, 0.1);

        data.set_global_speed_factor(5.0);
        assert_eq!(data.global_speed_factor, 2.0);

        data.set_default_delay(1);
        assert_eq!(data.default_delay_ms, 100);
        data.set_default_delay(60_000);
        assert_eq!(data.default_delay_ms, 5000);
    }

    #[test]
    fn test_apply_unapply_inverse() {
        let mut data = CalibrationData::default();
        data.set_joint_offset(1, 12.5);
        data.set_joint_reversed(1, true);

        for raw in [-90.0, -1.25, 0.0, 33.3, 90.0] {
            let applied = data.apply(1, raw);
            let back = data.unapply(1, applied);
            assert!((back - raw).abs() < 1e-12, "raw={raw} back={back}");
        }
    }

    #[test]
    fn test_clamp_respects_soft_limit_switch() {
        let mut data = CalibrationData::default();
        assert_eq!(data.clamp(0, 500.0), 135.0);
        assert_eq!(data.clamp(0, -500.0), -135.0);

        data.set_soft_limits_enabled(false);
        assert_eq!(data.clamp(0, 500.0), 500.0);
    }

    #[test]
    fn test_transition_delay_bounds() {
        let data = CalibrationData::default();
        // 零位移：正好一个基准时长
        assert_eq!(data.transition_delay(0, 0.0), 500);
        // 90° 位移：两倍基准
        assert_eq!(data.transition_delay(0, 90.0), 1000);
        // 巨大位移：夹到上界
        assert_eq!(data.transition_delay(0, 100_000.0), 5000);
    }

    #[test]
    fn test_transition_delay_uses_speed_factors() {
        let mut data = CalibrationData::default();
        data.set_joint_speed_factor(2, 2.0);
        data.set_global_speed_factor(2.0);
        // 500 / 2 / 2 = 125，零位移不放大
        assert_eq!(data.transition_delay(2, 0.0), 125);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let mut data = CalibrationData::default();
        data.set_joint_limits(3, -42.0, 42.0);
        data.set_joint_offset(3, 1.5);
        data.set_joint_reversed(5, true);
        data.set_soft_limits_enabled(false);

        data.save(&path).unwrap();
        let loaded = CalibrationData::load(&path).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_load_with_missing_fields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, r#"{"global_speed_factor":1.5}"#).unwrap();

        let loaded = CalibrationData::load(&path).unwrap();
        assert_eq!(loaded.global_speed_factor, 1.5);
        assert_eq!(loaded.default_delay_ms, 500);
        assert!(loaded.soft_limits_enabled);
        assert_eq!(loaded.joint(0).min_angle, -135.0); // 整体默认值中的 J0 限位
    }
}
