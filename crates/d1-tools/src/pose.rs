//! 姿态数据模型与姿态库
//!
//! 姿态是关键帧的单帧版本：7 个关节角度加夹爪开合百分比，
//! 生命周期独立于动作。

use anyhow::{Context, Result};
use d1_protocol::NUM_JOINTS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 单帧姿态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pose {
    pub name: String,
    pub joint_angles: [f64; NUM_JOINTS],
    /// 夹爪开合（0-100%）
    pub gripper_percent: u32,
    pub description: String,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            name: String::new(),
            joint_angles: [0.0; NUM_JOINTS],
            gripper_percent: 50,
            description: String::new(),
        }
    }
}

/// 姿态库（整体读写）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseLibrary {
    poses: Vec<Pose>,
    home_pose: Pose,
}

impl PoseLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read pose library {:?}", path.as_ref()))?;
        let library = serde_json::from_str(&text).context("failed to parse pose library")?;
        Ok(library)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to serialize poses")?;
        std::fs::write(path.as_ref(), text)
            .with_context(|| format!("failed to write pose library {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn add(&mut self, pose: Pose) {
        self.poses.push(pose);
    }

    pub fn update(&mut self, index: usize, pose: Pose) {
        if let Some(slot) = self.poses.get_mut(index) {
            *slot = pose;
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Pose> {
        if index < self.poses.len() {
            Some(self.poses.remove(index))
        } else {
            None
        }
    }

    pub fn rename(&mut self, index: usize, new_name: &str) {
        if let Some(pose) = self.poses.get_mut(index) {
            pose.name = new_name.to_string();
        }
    }

    pub fn get(&self, index: usize) -> Option<&Pose> {
        self.poses.get(index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Pose> {
        self.poses.iter().find(|p| p.name == name)
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.poses.iter().position(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn set_home_pose(&mut self, pose: Pose) {
        self.home_pose = pose;
    }

    pub fn home_pose(&self) -> &Pose {
        &self.home_pose
    }
}
