//! 动作数据模型与动作库
//!
//! 一个动作是一串关键帧：每帧包含 7 个关节目标角度，以及从上一帧
//! 过渡到该帧所允许的时间（毫秒）。少于 2 帧的动作不具备回放意义，
//! 不会被持久化。

use anyhow::{Context, Result};
use d1_protocol::NUM_JOINTS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 动作关键帧
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionKeyframe {
    /// 7 个关节的目标角度（度）
    pub joint_angles: [f64; NUM_JOINTS],
    /// 从上一帧过渡到本帧的时间（毫秒）
    pub transition_ms: u32,
}

/// 动作：有序关键帧序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Motion {
    pub name: String,
    pub description: String,
    pub keyframes: Vec<MotionKeyframe>,
    /// 循环回放
    pub looping: bool,
    /// 默认回放速度（100 = 1x）
    pub default_speed: u32,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            keyframes: Vec::new(),
            looping: true,
            default_speed: 100,
        }
    }
}

impl Motion {
    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 少于 2 帧的动作不可持久化
    pub fn is_persistable(&self) -> bool {
        self.keyframes.len() >= 2
    }

    /// 所有过渡时间之和（毫秒）
    pub fn total_duration_ms(&self) -> u64 {
        self.keyframes.iter().map(|kf| kf.transition_ms as u64).sum()
    }
}

/// 动作库（整体读写）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionLibrary {
    motions: Vec<Motion>,
}

impl MotionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文件整体加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read motion library {:?}", path.as_ref()))?;
        let library = serde_json::from_str(&text).context("failed to parse motion library")?;
        Ok(library)
    }

    /// 整体保存到 JSON 文件
    ///
    /// 不可持久化的动作（< 2 帧）在保存时被丢弃。
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let persistable = MotionLibrary {
            motions: self.motions.iter().filter(|m| m.is_persistable()).cloned().collect(),
        };
        let dropped = self.motions.len() - persistable.motions.len();
        if dropped > 0 {
            tracing::warn!(dropped, "skipping non-persistable motions on save");
        }

        let text =
            serde_json::to_string_pretty(&persistable).context("failed to serialize motions")?;
        std::fs::write(path.as_ref(), text)
            .with_context(|| format!("failed to write motion library {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn add(&mut self, motion: Motion) {
        self.motions.push(motion);
    }

    pub fn update(&mut self, index: usize, motion: Motion) {
        if let Some(slot) = self.motions.get_mut(index) {
            *slot = motion;
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Motion> {
        if index < self.motions.len() {
            Some(self.motions.remove(index))
        } else {
            None
        }
    }

    pub fn rename(&mut self, index: usize, new_name: &str) {
        if let Some(motion) = self.motions.get_mut(index) {
            motion.name = new_name.to_string();
        }
    }

    pub fn get(&self, index: usize) -> Option<&Motion> {
        self.motions.get(index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Motion> {
        self.motions.iter().find(|m| m.name == name)
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.motions.iter().position(|m| m.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.motions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Motion> {
        self.motions.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.motions.iter().map(|m| m.name.clone()).collect()
    }
}
