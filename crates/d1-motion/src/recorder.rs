//! 动作录制器
//!
//! 状态机：`Idle → Recording → Idle`（经 stop 或 cancel）。
//!
//! 每次采样把链路的状态快照存为一个关键帧，过渡时间取自上次采样
//! 以来的间隔（下限 100ms；首帧没有有意义的"距上次"，固定为下限）。
//! 录制期间链路断连会**取消**整段录制而非保留半成品。
//!
//! 自动采样是可选的固定间隔节拍，与手动采样可以在同一会话中混用。

use crate::error::MotionError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use d1_link::ArmLink;
use d1_tools::{Motion, MotionKeyframe};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// 关键帧过渡时间下限（毫秒）
const MIN_KEYFRAME_TRANSITION_MS: u32 = 100;

/// 自动采样间隔下限（毫秒）
const MIN_AUTO_CAPTURE_INTERVAL_MS: u64 = 50;

/// 录制事件
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Started(String),
    /// 已采样的关键帧数量
    KeyframeCaptured(usize),
    Stopped(Motion),
    Cancelled,
    Error(String),
}

struct RecordingSession {
    motion: Motion,
    started_at: Instant,
    /// 上次采样时刻（自录制开始的毫秒数）
    last_capture_ms: Option<u64>,
}

struct AutoCaptureConfig {
    enabled: bool,
    interval: Duration,
}

struct RecorderInner {
    link: Arc<ArmLink>,
    session: Mutex<Option<RecordingSession>>,
    auto_capture: Mutex<AutoCaptureConfig>,
    subscribers: Mutex<Vec<Sender<RecorderEvent>>>,
    ticker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl RecorderInner {
    fn emit(&self, event: RecorderEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// 采样一个关键帧
    ///
    /// 断连时取消整段录制（事件：Error + Cancelled）。
    fn capture(&self) -> Result<usize, MotionError> {
        let mut cancelled = false;
        let result = {
            let mut session_guard = self.session.lock();
            let Some(session) = session_guard.as_mut() else {
                return Err(MotionError::NotRecording);
            };

            if !self.link.is_connected() {
                *session_guard = None;
                cancelled = true;
                Err(MotionError::NotConnected)
            } else {
                let state = self.link.snapshot();
                let elapsed_ms = session.started_at.elapsed().as_millis() as u64;

                let transition_ms = match session.last_capture_ms {
                    None => MIN_KEYFRAME_TRANSITION_MS,
                    Some(last) => {
                        ((elapsed_ms - last) as u32).max(MIN_KEYFRAME_TRANSITION_MS)
                    },
                };
                session.last_capture_ms = Some(elapsed_ms);

                session.motion.keyframes.push(MotionKeyframe {
                    joint_angles: state.joint_angles(),
                    transition_ms,
                });

                let count = session.motion.keyframe_count();
                debug!(count, transition_ms, "keyframe captured");
                Ok(count)
            }
        };

        match result {
            Ok(count) => {
                self.emit(RecorderEvent::KeyframeCaptured(count));
                Ok(count)
            },
            Err(e) => {
                if cancelled {
                    warn!("robot disconnected during recording, cancelling");
                    self.emit(RecorderEvent::Error(
                        "robot disconnected during recording".to_string(),
                    ));
                    self.emit(RecorderEvent::Cancelled);
                }
                Err(e)
            },
        }
    }
}

/// 自动采样线程：固定间隔调用采样，录制结束后自行退出
fn ticker_loop(inner: Arc<RecorderInner>, interval: Duration, stop_rx: Receiver<()>) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {},
        }
        // 录制已结束（含断连取消）时退出
        if inner.capture().is_err() {
            return;
        }
    }
}

/// 动作录制器
pub struct MotionRecorder {
    inner: Arc<RecorderInner>,
}

impl MotionRecorder {
    pub fn new(link: Arc<ArmLink>) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                link,
                session: Mutex::new(None),
                auto_capture: Mutex::new(AutoCaptureConfig {
                    enabled: false,
                    interval: Duration::from_millis(500),
                }),
                subscribers: Mutex::new(Vec::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// 订阅录制事件
    pub fn subscribe(&self) -> Receiver<RecorderEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// 开始录制
    ///
    /// 已在录制或链路断连时拒绝（错误事件，状态不变）。名字缺省时
    /// 按开始时刻生成；立即采样首帧。
    pub fn start(&self, name: Option<&str>) -> Result<(), MotionError> {
        {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                warn!("recording already in progress");
                return Err(MotionError::AlreadyRecording);
            }
            if !self.inner.link.is_connected() {
                drop(session);
                self.inner.emit(RecorderEvent::Error(
                    "robot is not connected - cannot start recording".to_string(),
                ));
                return Err(MotionError::NotConnected);
            }

            let unix_secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let name = match name {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => format!("Motion_{}", unix_secs),
            };

            let motion = Motion {
                name: name.clone(),
                description: format!("Recorded at {}", unix_secs),
                looping: true,
                default_speed: 100,
                ..Motion::default()
            };

            *session = Some(RecordingSession {
                motion,
                started_at: Instant::now(),
                last_capture_ms: None,
            });

            info!(name = %name, "recording started");
            drop(session);
            self.inner.emit(RecorderEvent::Started(name));
        }

        // 首帧立即采样
        let _ = self.inner.capture();

        // 按需启动自动采样
        let auto = {
            let auto = self.inner.auto_capture.lock();
            auto.enabled.then_some(auto.interval)
        };
        if let Some(interval) = auto {
            self.start_ticker(interval);
        }

        Ok(())
    }

    /// 停止录制并返回完整动作
    ///
    /// 先采样末帧再落状态；少于 2 帧的动作由调用方丢弃
    /// （`Motion::is_persistable`）。
    pub fn stop(&self) -> Result<Motion, MotionError> {
        if self.inner.session.lock().is_none() {
            return Err(MotionError::NotRecording);
        }

        self.stop_ticker();

        // 末帧（断连时录制已被取消，按 NotRecording 处理）
        match self.inner.capture() {
            Ok(_) => {},
            Err(MotionError::NotRecording) | Err(MotionError::NotConnected) => {
                return Err(MotionError::NotRecording);
            },
            Err(e) => return Err(e),
        }

        let session = self.inner.session.lock().take().ok_or(MotionError::NotRecording)?;
        let motion = session.motion;

        info!(
            name = %motion.name,
            keyframes = motion.keyframe_count(),
            duration_ms = motion.total_duration_ms(),
            "recording stopped"
        );
        self.inner.emit(RecorderEvent::Stopped(motion.clone()));

        Ok(motion)
    }

    /// 取消录制并丢弃已采样的关键帧
    pub fn cancel(&self) {
        self.stop_ticker();

        let had_session = self.inner.session.lock().take().is_some();
        if had_session {
            info!("recording cancelled");
            self.inner.emit(RecorderEvent::Cancelled);
        }
    }

    /// 手动采样一个关键帧
    pub fn capture_keyframe(&self) -> Result<usize, MotionError> {
        self.inner.capture()
    }

    /// 配置自动采样（间隔下限 50ms）
    ///
    /// 录制进行中时立即生效。
    pub fn set_auto_capture(&self, enabled: bool, interval_ms: u64) {
        let interval = Duration::from_millis(interval_ms.max(MIN_AUTO_CAPTURE_INTERVAL_MS));
        {
            let mut auto = self.inner.auto_capture.lock();
            auto.enabled = enabled;
            auto.interval = interval;
        }
        debug!(enabled, interval_ms = interval.as_millis() as u64, "auto capture configured");

        if self.is_recording() {
            self.stop_ticker();
            if enabled {
                self.start_ticker(interval);
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn keyframe_count(&self) -> usize {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.motion.keyframe_count())
            .unwrap_or(0)
    }

    /// 录制已进行的时长（毫秒；未在录制时为 0）
    pub fn elapsed_ms(&self) -> u64 {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.started_at.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn start_ticker(&self, interval: Duration) {
        let (stop_tx, stop_rx) = unbounded();
        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || ticker_loop(inner, interval, stop_rx));
        *self.inner.ticker.lock() = Some((stop_tx, handle));
    }

    fn stop_ticker(&self) {
        let ticker = self.inner.ticker.lock().take();
        if let Some((stop_tx, handle)) = ticker {
            drop(stop_tx);
            let _ = handle.join();
        }
    }
}

impl Drop for MotionRecorder {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
