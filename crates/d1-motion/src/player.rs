//! 动作回放引擎
//!
//! 状态机：`Idle → Playing ⇄ Paused → Idle`。回放在独立线程上运行，
//! 控制通道的 `recv_timeout` 同时充当关键帧定时器。
//!
//! 任何一次运行的第一帧都从任意当前姿态出发，录制的过渡时间对它
//! 没有意义，因此首帧与循环衔接帧一律使用距离配速（按最大角度差
//! 计时）；其余帧使用录制时间经速度缩放后的值。
//!
//! 每个节拍按顺序检查急停标志、连接标志、设备故障标志；任一命中
//! 即发出描述性错误事件、取消链路上未触发的命令并回到 Idle。

use crate::error::MotionError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use d1_link::ArmLink;
use d1_protocol::{GRIPPER_JOINT, NUM_JOINTS};
use d1_tools::Motion;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 速度百分比范围（25% – 400%，即 0.25x – 4x）
const SPEED_MIN_PERCENT: u32 = 25;
const SPEED_MAX_PERCENT: u32 = 400;

/// 速度缩放后的过渡时间下限（毫秒）
const MIN_TRANSITION_MS: u32 = 300;

/// 距离配速：约 30°/s ≈ 33ms/°
const MS_PER_DEGREE: f64 = 33.0;
/// 距离配速的裸时长范围（毫秒，速度缩放前）
const DISTANCE_MIN_MS: u32 = 500;
const DISTANCE_MAX_MS: u32 = 3000;

/// 普通帧调度余量 / 循环衔接帧调度余量（毫秒）
const TICK_MARGIN_MS: u64 = 100;
const LOOP_TICK_MARGIN_MS: u64 = 150;

/// 录制过渡时间经速度缩放
///
/// speed 100% 不变；200% 减半；50% 翻倍。缩放结果不低于安全下限。
pub fn adjusted_transition_ms(recorded_ms: u32, speed_percent: u32) -> u32 {
    if speed_percent == 0 {
        return recorded_ms;
    }
    let adjusted = (recorded_ms as u64 * 100 / speed_percent as u64) as u32;
    adjusted.max(MIN_TRANSITION_MS)
}

/// 距离配速的过渡时间
///
/// 取所有非夹爪关节的最大角度差，乘以每度毫秒数，夹到安全范围，
/// 再做速度缩放。仅用于首帧与循环衔接帧。
pub fn distance_transition_ms(
    current: &[f64; NUM_JOINTS],
    target: &[f64; NUM_JOINTS],
    speed_percent: u32,
) -> u32 {
    let mut max_delta: f64 = 0.0;
    for joint in 0..NUM_JOINTS {
        if joint == GRIPPER_JOINT {
            continue;
        }
        max_delta = max_delta.max((target[joint] - current[joint]).abs());
    }

    let raw = ((max_delta * MS_PER_DEGREE) as u32).clamp(DISTANCE_MIN_MS, DISTANCE_MAX_MS);
    adjusted_transition_ms(raw, speed_percent)
}

/// 回放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// 回放事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Started(String),
    /// 当前帧索引与总帧数
    KeyframeChanged { index: usize, total: usize },
    /// 进度（百分比）
    Progress(u32),
    /// 完成一轮循环（从 1 开始计数）
    LoopCompleted(u32),
    Paused,
    Resumed,
    Stopped,
    Error(String),
}

enum PlayerCtrl {
    Stop,
    Pause,
    Resume,
}

struct PlayerInner {
    link: Arc<ArmLink>,
    status: Mutex<PlayerStatus>,
    speed_percent: AtomicU32,
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
    ctrl_tx: Mutex<Option<Sender<PlayerCtrl>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerInner {
    fn emit(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn speed(&self) -> u32 {
        self.speed_percent.load(Ordering::Relaxed)
    }

    /// 下发一个关键帧，返回到下一帧的调度等待时长
    fn execute_keyframe(&self, motion: &Motion, index: usize, distance_based: bool) -> Duration {
        let keyframe = &motion.keyframes[index];
        let total = motion.keyframe_count();

        self.emit(PlayerEvent::KeyframeChanged { index, total });
        let progress = if distance_based {
            0
        } else {
            (index * 100 / total) as u32
        };
        self.emit(PlayerEvent::Progress(progress));

        let transition_ms = if distance_based {
            let current = self.link.snapshot().joint_angles();
            let ms = distance_transition_ms(&current, &keyframe.joint_angles, self.speed());
            debug!(index, transition_ms = ms, "distance-paced keyframe");
            ms
        } else {
            adjusted_transition_ms(keyframe.transition_ms, self.speed())
        };

        // 固件侧插值：一条共享过渡时间的命令
        self.link
            .set_all_joint_angles_interpolated(keyframe.joint_angles, transition_ms);

        let margin = if distance_based { LOOP_TICK_MARGIN_MS } else { TICK_MARGIN_MS };
        Duration::from_millis(transition_ms as u64 + margin)
    }

    /// 每个节拍的故障检查；返回命中的错误描述
    fn tick_fault(&self) -> Option<&'static str> {
        if self.link.is_emergency_stopped() {
            Some("emergency stop - playback aborted")
        } else if !self.link.is_connected() {
            Some("robot disconnected during playback")
        } else if self.link.has_error() {
            Some("robot error during playback")
        } else {
            None
        }
    }

    /// 回放线程收尾：回到 Idle，取消链路上未触发的命令
    fn finish(&self) {
        *self.status.lock() = PlayerStatus::Idle;
        *self.ctrl_tx.lock() = None;
        self.link.cancel_all_pending();
        self.emit(PlayerEvent::Stopped);
    }
}

/// 回放线程主循环
fn playback_loop(inner: Arc<PlayerInner>, motion: Motion, ctrl_rx: Receiver<PlayerCtrl>) {
    let mut index = 0usize;
    let mut loop_count = 0u32;

    // 首帧：距离配速
    let mut wait = inner.execute_keyframe(&motion, index, true);

    loop {
        match ctrl_rx.recv_timeout(wait) {
            Ok(PlayerCtrl::Stop) | Err(RecvTimeoutError::Disconnected) => {
                debug!("playback stopped");
                inner.finish();
                return;
            },
            Ok(PlayerCtrl::Pause) => {
                *inner.status.lock() = PlayerStatus::Paused;
                inner.emit(PlayerEvent::Paused);

                // 阻塞等待 Resume / Stop
                loop {
                    match ctrl_rx.recv() {
                        Ok(PlayerCtrl::Resume) => {
                            *inner.status.lock() = PlayerStatus::Playing;
                            inner.emit(PlayerEvent::Resumed);
                            // 从当前帧继续
                            wait = inner.execute_keyframe(&motion, index, false);
                            break;
                        },
                        Ok(PlayerCtrl::Stop) | Err(_) => {
                            inner.finish();
                            return;
                        },
                        Ok(PlayerCtrl::Pause) => continue,
                    }
                }
                continue;
            },
            Ok(PlayerCtrl::Resume) => continue, // 未暂停时忽略
            Err(RecvTimeoutError::Timeout) => {},
        }

        // 节拍：急停 → 连接 → 设备故障，依序检查
        if let Some(fault) = inner.tick_fault() {
            warn!(fault, "playback aborted");
            inner.emit(PlayerEvent::Error(fault.to_string()));
            inner.finish();
            return;
        }

        index += 1;
        if index >= motion.keyframe_count() {
            loop_count += 1;
            inner.emit(PlayerEvent::LoopCompleted(loop_count));

            if motion.looping {
                // 循环衔接：距离配速吸收末帧与首帧之间的姿态差
                index = 0;
                debug!(loop_count, "loop completed, restarting");
                wait = inner.execute_keyframe(&motion, index, true);
                continue;
            }

            debug!("playback finished (non-looping)");
            inner.finish();
            return;
        }

        wait = inner.execute_keyframe(&motion, index, false);
    }
}

/// 动作回放器
pub struct MotionPlayer {
    inner: Arc<PlayerInner>,
}

impl MotionPlayer {
    pub fn new(link: Arc<ArmLink>) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                link,
                status: Mutex::new(PlayerStatus::Idle),
                speed_percent: AtomicU32::new(100),
                subscribers: Mutex::new(Vec::new()),
                ctrl_tx: Mutex::new(None),
                thread: Mutex::new(None),
            }),
        }
    }

    /// 订阅回放事件
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// 开始回放
    ///
    /// 空动作或链路断连时拒绝（错误事件 + 返回错误，状态不变）；
    /// 已在播放时先停止当前回放。
    pub fn play(&self, motion: Motion) -> Result<(), MotionError> {
        if motion.is_empty() {
            self.inner
                .emit(PlayerEvent::Error("motion has no keyframes".to_string()));
            return Err(MotionError::EmptyMotion);
        }
        if !self.inner.link.is_connected() {
            self.inner
                .emit(PlayerEvent::Error("robot is not connected".to_string()));
            return Err(MotionError::NotConnected);
        }

        // 已在播放：先停
        self.stop();

        info!(
            name = %motion.name,
            keyframes = motion.keyframe_count(),
            looping = motion.looping,
            "starting playback"
        );

        *self.inner.status.lock() = PlayerStatus::Playing;
        self.inner.emit(PlayerEvent::Started(motion.name.clone()));

        let (ctrl_tx, ctrl_rx) = unbounded();
        *self.inner.ctrl_tx.lock() = Some(ctrl_tx);

        let thread_inner = self.inner.clone();
        let handle = std::thread::spawn(move || playback_loop(thread_inner, motion, ctrl_rx));
        *self.inner.thread.lock() = Some(handle);

        Ok(())
    }

    /// 停止回放（幂等；等待回放线程退出）
    pub fn stop(&self) {
        let ctrl = self.inner.ctrl_tx.lock().take();
        if let Some(ctrl) = ctrl {
            let _ = ctrl.send(PlayerCtrl::Stop);
        }
        let handle = self.inner.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// 暂停（仅在 Playing 状态有效）
    pub fn pause(&self) {
        if self.status() != PlayerStatus::Playing {
            return;
        }
        let ctrl = self.inner.ctrl_tx.lock();
        if let Some(ctrl) = ctrl.as_ref() {
            let _ = ctrl.send(PlayerCtrl::Pause);
        }
    }

    /// 继续（仅在 Paused 状态有效）
    pub fn resume(&self) {
        if self.status() != PlayerStatus::Paused {
            return;
        }
        let ctrl = self.inner.ctrl_tx.lock();
        if let Some(ctrl) = ctrl.as_ref() {
            let _ = ctrl.send(PlayerCtrl::Resume);
        }
    }

    /// 设置回放速度（25–400%）
    pub fn set_speed(&self, percent: u32) {
        let clamped = percent.clamp(SPEED_MIN_PERCENT, SPEED_MAX_PERCENT);
        self.inner.speed_percent.store(clamped, Ordering::Relaxed);
        debug!(speed = clamped, "playback speed set");
    }

    pub fn speed(&self) -> u32 {
        self.inner.speed()
    }

    pub fn status(&self) -> PlayerStatus {
        *self.inner.status.lock()
    }

    pub fn is_playing(&self) -> bool {
        self.status() != PlayerStatus::Idle
    }
}

impl Drop for MotionPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_transition_speed_scaling() {
        // 100%：原样（但不低于下限）
        assert_eq!(adjusted_transition_ms(1000, 100), 1000);
        // 200%：减半
        assert_eq!(adjusted_transition_ms(1000, 200), 500);
        // 50%：翻倍
        assert_eq!(adjusted_transition_ms(1000, 50), 2000);
        // 下限保护
        assert_eq!(adjusted_transition_ms(100, 100), 300);
        assert_eq!(adjusted_transition_ms(1000, 400), 300);
        // speed 0 防御：原样返回
        assert_eq!(adjusted_transition_ms(700, 0), 700);
    }

    #[test]
    fn test_distance_transition_bounds() {
        let zero = [0.0; NUM_JOINTS];

        // 零距离：夹到下界
        assert_eq!(distance_transition_ms(&zero, &zero, 100), 500);

        // 30° 最大差：30 * 33 = 990ms
        let mut target = zero;
        target[2] = 30.0;
        assert_eq!(distance_transition_ms(&zero, &target, 100), 990);

        // 巨大差：夹到上界
        target[2] = 10_000.0;
        assert_eq!(distance_transition_ms(&zero, &target, 100), 3000);
    }

    #[test]
    fn test_distance_transition_ignores_gripper() {
        let zero = [0.0; NUM_JOINTS];
        let mut target = zero;
        target[GRIPPER_JOINT] = 100.0; // 只有夹爪动

        assert_eq!(distance_transition_ms(&zero, &target, 100), 500);
    }

    #[test]
    fn test_distance_transition_applies_speed() {
        let zero = [0.0; NUM_JOINTS];
        let mut target = zero;
        target[0] = 60.0; // 60 * 33 = 1980ms

        assert_eq!(distance_transition_ms(&zero, &target, 100), 1980);
        assert_eq!(distance_transition_ms(&zero, &target, 200), 990);
        // 400%：1980/4 = 495 → floor 300 之上
        assert_eq!(distance_transition_ms(&zero, &target, 400), 495);
    }

    #[test]
    fn test_loop_restart_uses_distance_not_recorded_time() {
        // 循环衔接帧的配速与录制值无关：录制 10000ms，但当前姿态
        // 与目标重合时距离配速只给出下界 500ms
        let zero = [0.0; NUM_JOINTS];
        let distance = distance_transition_ms(&zero, &zero, 100);
        let recorded = adjusted_transition_ms(10_000, 100);
        assert_eq!(distance, 500);
        assert_eq!(recorded, 10_000);
        assert_ne!(distance, recorded);
    }
}
