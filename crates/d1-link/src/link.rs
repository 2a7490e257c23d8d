//! Arm link 模块
//!
//! 对外提供 [`ArmLink`] 结构体，封装底层套接字线程与状态同步细节。
//!
//! 线程模型：
//! - RX 线程：阻塞接收反馈数据报，解析后合并进状态并发出边沿事件
//! - 调度线程：单一逻辑时间线，处理延迟命令、存活检查与恢复节拍
//!
//! 所有命令下发路径都遵守急停标志与取消纪元；初始化失败（端口被占）
//! 是唯一的致命错误，运行期发送失败仅记录日志。

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::LinkEvent;
use crate::monitor::ConnectionMonitor;
use crate::recovery::{RecoveryAction, RecoveryRun};
use crate::scheduler::{LinkCommand, ScheduledCommand, scheduler_loop};
use crate::state::{ArmState, PowerStatus};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use d1_protocol::{
    CommandFrame, CommandPayload, FeedbackFrame, GRIPPER_JOINT, NUM_JOINTS, PowerMode,
};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 回 home 的距离配速：约 30°/s ≈ 33ms/°
const HOME_MS_PER_DEGREE: f64 = 33.0;
/// 回 home 过渡时间下限 / 上限（毫秒）
const HOME_TRANSITION_MIN_MS: u32 = 1000;
const HOME_TRANSITION_MAX_MS: u32 = 4000;

/// 链路共享上下文
///
/// RX 线程、调度线程与公开 API 共享的全部可变状态。状态写入统一经过
/// `state` 互斥锁，随后以 `ArcSwap` 发布快照供无锁读取。
pub(crate) struct LinkShared {
    config: LinkConfig,
    cmd_socket: UdpSocket,
    state: Mutex<ArmState>,
    snapshot: ArcSwap<ArmState>,
    monitor: ConnectionMonitor,
    /// 线路层序号（每条命令递增）
    seq: AtomicU32,
    /// 取消纪元：cancel/急停时递增，调度记录触发时比较
    epoch: AtomicU64,
    /// 急停标志：置位期间所有命令下发路径变为 no-op
    stopped: AtomicBool,
    home_position: Mutex<[f64; NUM_JOINTS]>,
    subscribers: Mutex<Vec<Sender<LinkEvent>>>,
    recovery: Mutex<Option<RecoveryRun>>,
    sched_tx: Sender<ScheduledCommand>,
    sched_order: AtomicU64,
}

impl LinkShared {
    pub(crate) fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.snapshot.load().connected
    }

    pub(crate) fn snapshot(&self) -> ArmState {
        ArmState::clone(&self.snapshot.load())
    }

    /// 发布当前权威状态的快照
    fn publish(&self, state: &ArmState) {
        self.snapshot.store(Arc::new(state.clone()));
    }

    fn emit(&self, event: LinkEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// 按当前限位夹取角度（非法索引原样返回）
    pub(crate) fn clamp_angle(&self, joint: usize, angle: f64) -> f64 {
        let state = self.state.lock();
        match state.joints.get(joint) {
            Some(j) => angle.clamp(j.min_limit, j.max_limit),
            None => angle,
        }
    }

    /// 入队一条延迟命令
    pub(crate) fn schedule_in(&self, delay: Duration, epoch: Option<u64>, command: LinkCommand) {
        let record = ScheduledCommand {
            fire_at: std::time::Instant::now() + delay,
            epoch,
            command,
            order: self.sched_order.fetch_add(1, Ordering::Relaxed),
        };
        // 调度线程退出后 send 失败，此时链路正在关闭，丢弃即可
        let _ = self.sched_tx.send(record);
    }

    /// 错峰入队一组 HoldJoint
    pub(crate) fn schedule_hold(
        &self,
        epoch: Option<u64>,
        start_delay_ms: u64,
        stagger_ms: u64,
        transition_ms: u32,
    ) {
        let mut delay = start_delay_ms;
        for id in 0..NUM_JOINTS {
            if id == GRIPPER_JOINT {
                continue;
            }
            self.schedule_in(
                Duration::from_millis(delay),
                epoch,
                LinkCommand::HoldJoint { id, transition_ms },
            );
            delay += stagger_ms;
        }
    }

    /// 立即发送一条命令（编码失败记录 error，发送失败记录 warn）
    fn send_now(&self, payload: CommandPayload) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = CommandFrame::new(seq, payload);

        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode command: {}", e);
                return;
            },
        };

        if let Err(e) = self.cmd_socket.send_to(text.as_bytes(), self.config.command_addr) {
            // 瞬态传输故障：不致命，交给存活检查发现持续失败
            warn!("failed to send command datagram: {}", e);
        }
    }

    pub(crate) fn send_joint_angle(&self, joint: usize, angle: f64, delay_ms: u32) {
        let clamped = self.clamp_angle(joint, angle);
        self.send_now(CommandPayload::JointAngle {
            id: joint as u8,
            angle: clamped,
            delay_ms,
        });
    }

    pub(crate) fn send_power_mode(&self, mode: PowerMode) {
        self.send_now(CommandPayload::PowerMode { mode });
    }

    /// 上电序列：3 次上电命令错峰下发，600ms 后固定当前位置
    fn enable_motors_inner(&self) {
        let epoch = Some(self.current_epoch());
        for k in 0..3u64 {
            self.schedule_in(
                Duration::from_millis(k * 150),
                epoch,
                LinkCommand::PowerMode { mode: PowerMode::On },
            );
        }
        self.schedule_in(
            Duration::from_millis(600),
            epoch,
            LinkCommand::HoldPosition {
                start_delay_ms: 50,
                stagger_ms: 80,
                transition_ms: 100,
            },
        );
    }

    /// 故障复位：立即断电并清除本地故障码，500ms 后再补发一次断电
    fn reset_errors_inner(&self) {
        self.send_power_mode(PowerMode::Off);
        {
            let mut state = self.state.lock();
            state.error_status = 0;
            self.publish(&state);
        }
        self.schedule_in(
            Duration::from_millis(500),
            Some(self.current_epoch()),
            LinkCommand::PowerMode { mode: PowerMode::Off },
        );
    }

    /// 合并一包反馈
    ///
    /// 缺失字段保留旧值；电源/故障变化按边沿发出通知；断连后的第一包
    /// 反馈恰好触发一次 Connected。
    fn apply_feedback(&self, frame: FeedbackFrame) {
        let mut events = Vec::new();

        {
            let mut state = self.state.lock();

            if let Some(raw) = frame.data.power_status {
                let power = PowerStatus::from_wire(raw);
                if power != state.power_status {
                    state.power_status = power;
                    events.push(LinkEvent::PowerChanged(power.is_on()));
                }
            }

            if let Some(code) = frame.data.error_status
                && code != state.error_status
            {
                state.error_status = code;
                if code != 0 {
                    events.push(LinkEvent::DeviceError(code));
                }
            }

            for (joint, angle) in frame.data.angles().into_iter().enumerate() {
                if let Some(angle) = angle {
                    state.joints[joint].angle = angle;
                }
            }

            state.last_feedback_us = self.monitor.register_feedback();
            if !state.connected {
                state.connected = true;
                events.push(LinkEvent::Connected);
            }

            self.publish(&state);
        }

        for event in events {
            if event == LinkEvent::Connected {
                info!("robot connected");
            }
            self.emit(event);
        }
    }

    /// 周期存活检查：静默超过阈值则翻转连接标志（每次转换只通知一次）
    pub(crate) fn run_connection_check(&self) {
        let mut disconnected = false;
        {
            let mut state = self.state.lock();
            if state.connected && !self.monitor.is_alive() {
                state.connected = false;
                disconnected = true;
                self.publish(&state);
            }
        }

        if disconnected {
            info!(
                "robot disconnected (no feedback for {:?})",
                self.config.connection_timeout
            );
            self.emit(LinkEvent::Disconnected);
        }
    }

    /// 推进一次恢复节拍；返回是否继续排下一拍
    pub(crate) fn run_recovery_tick(&self) -> bool {
        let action = {
            let mut recovery = self.recovery.lock();
            let Some(run) = recovery.as_mut() else {
                return false;
            };

            let action = run.tick();
            if run.is_done() {
                *recovery = None;
                let success = self.is_connected();
                debug!(success, "recovery finished");
                drop(recovery);
                self.emit(LinkEvent::RecoveryFinished(success));
                return false;
            }
            action
        };

        if let Some(action) = action {
            self.run_recovery_action(action);
        }
        true
    }

    fn run_recovery_action(&self, action: RecoveryAction) {
        if self.is_stopped() {
            return;
        }

        match action {
            RecoveryAction::DisableMotors => self.send_power_mode(PowerMode::Off),
            RecoveryAction::ResetErrors => self.reset_errors_inner(),
            RecoveryAction::EnableMotors => self.enable_motors_inner(),
            RecoveryAction::RetryEnableIfPowerOff => {
                if !self.snapshot().power_status.is_on() {
                    debug!("recovery: power still off, retrying enable");
                    self.enable_motors_inner();
                }
            },
            RecoveryAction::HoldPosition => {
                self.schedule_hold(Some(self.current_epoch()), 0, 30, 500);
            },
        }
    }
}

/// RX 线程主循环：阻塞接收反馈数据报并合并进状态
fn rx_loop(socket: UdpSocket, shared: Arc<LinkShared>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 4096];

    while running.load(Ordering::Acquire) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _peer)) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            },
            Err(e) => {
                error!("feedback receive error: {}", e);
                continue;
            },
        };

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            trace!("ignoring non-UTF-8 feedback datagram");
            continue;
        };

        match FeedbackFrame::decode(text) {
            Ok(frame) => shared.apply_feedback(frame),
            // 残缺/畸形数据报：记录后丢弃，已有状态保持不变
            Err(e) => trace!("ignoring malformed feedback: {}", e),
        }
    }
}

/// 以 SO_REUSEADDR 绑定反馈套接字（容忍快速重启）
fn bind_reuse(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    use nix::sys::socket::{
        AddressFamily, SockFlag, SockType, SockaddrIn, bind, setsockopt, socket, sockopt::ReuseAddr,
    };

    let SocketAddr::V4(addr_v4) = addr else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "IPv6 feedback bind is not supported",
        ));
    };

    let fd = socket(AddressFamily::Inet, SockType::Datagram, SockFlag::empty(), None)
        .map_err(std::io::Error::from)?;
    setsockopt(&fd, ReuseAddr, &true).map_err(std::io::Error::from)?;
    bind(fd.as_raw_fd(), &SockaddrIn::from(addr_v4)).map_err(std::io::Error::from)?;

    Ok(UdpSocket::from(fd))
}

/// D1 机械臂链路（对外 API）
///
/// 连接、状态与安全契约的唯一所有者。状态只以值拷贝快照对外暴露。
pub struct ArmLink {
    shared: Arc<LinkShared>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    sched_thread: Option<JoinHandle<()>>,
    feedback_addr: SocketAddr,
}

impl ArmLink {
    /// 创建链路并启动后台线程
    ///
    /// # 错误
    ///
    /// - [`LinkError::Bind`]: 反馈端口无法绑定（如已被占用）。致命，
    ///   直接上报调用方，不做自动重试。
    /// - [`LinkError::CommandSocket`]: 命令套接字创建失败。
    pub fn new(config: LinkConfig) -> Result<Self, LinkError> {
        let feedback_socket = bind_reuse(config.feedback_bind).map_err(LinkError::Bind)?;
        feedback_socket
            .set_read_timeout(Some(config.read_timeout))
            .map_err(LinkError::Bind)?;
        let feedback_addr = feedback_socket.local_addr().map_err(LinkError::Bind)?;

        let cmd_socket =
            UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).map_err(LinkError::CommandSocket)?;

        let (sched_tx, sched_rx) = unbounded();

        let shared = Arc::new(LinkShared {
            monitor: ConnectionMonitor::new(config.connection_timeout),
            config,
            cmd_socket,
            state: Mutex::new(ArmState::with_default_limits()),
            snapshot: ArcSwap::from_pointee(ArmState::with_default_limits()),
            seq: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            home_position: Mutex::new([0.0; NUM_JOINTS]),
            subscribers: Mutex::new(Vec::new()),
            recovery: Mutex::new(None),
            sched_tx,
            sched_order: AtomicU64::new(0),
        });

        let running = Arc::new(AtomicBool::new(true));

        let rx_shared = shared.clone();
        let rx_running = running.clone();
        let rx_thread = std::thread::Builder::new()
            .name("d1-link-rx".to_string())
            .spawn(move || rx_loop(feedback_socket, rx_shared, rx_running))
            .map_err(LinkError::Thread)?;

        let sched_shared = shared.clone();
        let sched_running = running.clone();
        let sched_thread = std::thread::Builder::new()
            .name("d1-link-sched".to_string())
            .spawn(move || scheduler_loop(sched_shared, sched_rx, sched_running))
            .map_err(LinkError::Thread)?;

        // 启动周期存活检查
        shared.schedule_in(
            shared.config.connection_check_interval,
            None,
            LinkCommand::ConnectionCheck,
        );

        info!(
            command_addr = %shared.config.command_addr,
            feedback_addr = %feedback_addr,
            "arm link initialized"
        );

        Ok(Self {
            shared,
            running,
            rx_thread: Some(rx_thread),
            sched_thread: Some(sched_thread),
            feedback_addr,
        })
    }

    /// 实际绑定的反馈地址（配置端口为 0 时由系统分配）
    pub fn feedback_addr(&self) -> SocketAddr {
        self.feedback_addr
    }

    /// 订阅链路事件（边沿触发）
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    // ============================================================
    // 状态读取（均为值拷贝快照）
    // ============================================================

    pub fn snapshot(&self) -> ArmState {
        self.shared.snapshot()
    }

    pub fn joint_angle(&self, joint: usize) -> f64 {
        self.shared
            .snapshot()
            .joints
            .get(joint)
            .map(|j| j.angle)
            .unwrap_or(0.0)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn has_error(&self) -> bool {
        self.shared.snapshot().has_error()
    }

    pub fn error_code(&self) -> i32 {
        self.shared.snapshot().error_status
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// 当前取消纪元
    pub fn command_epoch(&self) -> u64 {
        self.shared.current_epoch()
    }

    // ============================================================
    // 限位与 home
    // ============================================================

    /// 夹取角度到关节限位；幂等，命令路径发送前都会经过它
    pub fn clamp_angle(&self, joint: usize, angle: f64) -> f64 {
        self.shared.clamp_angle(joint, angle)
    }

    pub fn set_joint_limits(&self, joint: usize, min_angle: f64, max_angle: f64) {
        let mut state = self.shared.state.lock();
        if let Some(j) = state.joints.get_mut(joint) {
            j.min_limit = min_angle;
            j.max_limit = max_angle;
            self.shared.publish(&state);
        }
    }

    pub fn joint_limits(&self, joint: usize) -> (f64, f64) {
        self.shared
            .snapshot()
            .joints
            .get(joint)
            .map(|j| (j.min_limit, j.max_limit))
            .unwrap_or((-180.0, 180.0))
    }

    pub fn set_home_position(&self, positions: [f64; NUM_JOINTS]) {
        *self.shared.home_position.lock() = positions;
    }

    pub fn home_position(&self) -> [f64; NUM_JOINTS] {
        *self.shared.home_position.lock()
    }

    // ============================================================
    // 命令下发（急停置位时全部自拒）
    // ============================================================

    /// 设置单关节角度（立即发送，角度先过限位）
    pub fn set_joint_angle(&self, joint: usize, angle: f64, delay_ms: u32) {
        if joint >= NUM_JOINTS {
            warn!(joint, "set_joint_angle: invalid joint id");
            return;
        }
        if self.shared.is_stopped() {
            return;
        }
        self.shared.send_joint_angle(joint, angle, delay_ms);
    }

    /// 设置所有非夹爪关节的角度
    ///
    /// 为避免打满出站通道，按关节索引升序以固定间隔错峰下发；
    /// 每条记录捕获当前取消纪元。
    pub fn set_all_joint_angles(&self, angles: [f64; NUM_JOINTS], delay_ms: u32) {
        if self.shared.is_stopped() {
            debug!("set_all_joint_angles rejected: emergency stop active");
            return;
        }
        if !self.shared.is_connected() {
            warn!("set_all_joint_angles rejected: robot not connected");
            return;
        }

        let epoch = Some(self.shared.current_epoch());
        let stagger = self.shared.config.inter_joint_delay;

        let mut delay = Duration::ZERO;
        for (joint, angle) in angles.into_iter().enumerate() {
            if joint == GRIPPER_JOINT {
                continue;
            }
            let clamped = self.shared.clamp_angle(joint, angle);
            self.shared.schedule_in(
                delay,
                epoch,
                LinkCommand::JointAngle {
                    id: joint,
                    angle: clamped,
                    delay_ms,
                },
            );
            delay += stagger;
        }
    }

    /// 全关节插值移动
    ///
    /// 不做客户端分步细分：单条共享过渡时间的命令交由固件自身插值，
    /// 实测比客户端手动细分的运动更平滑。
    pub fn set_all_joint_angles_interpolated(
        &self,
        angles: [f64; NUM_JOINTS],
        total_time_ms: u32,
    ) {
        self.set_all_joint_angles(angles, total_time_ms);
    }

    /// 回 home：按最大角度差计算过渡时间（距离配速）
    pub fn move_to_home(&self) {
        if self.shared.is_stopped() {
            return;
        }
        if !self.shared.is_connected() {
            warn!("move_to_home rejected: robot not connected");
            return;
        }

        let home = self.home_position();
        let state = self.shared.snapshot();

        let mut max_delta: f64 = 0.0;
        for joint in 0..NUM_JOINTS {
            if joint == GRIPPER_JOINT {
                continue;
            }
            max_delta = max_delta.max((home[joint] - state.joints[joint].angle).abs());
        }

        let transition_ms = ((max_delta * HOME_MS_PER_DEGREE) as u32)
            .clamp(HOME_TRANSITION_MIN_MS, HOME_TRANSITION_MAX_MS);

        debug!(max_delta, transition_ms, "moving to home position");
        self.set_all_joint_angles_interpolated(home, transition_ms);
    }

    /// 固定当前位置（上电后防止关节下坠）
    pub fn hold_current_position(&self) {
        if self.shared.is_stopped() || !self.shared.is_connected() {
            return;
        }
        self.shared.schedule_hold(Some(self.shared.current_epoch()), 50, 80, 100);
    }

    /// 夹爪开合（0.0 = 全闭，1.0 = 全开）
    pub fn set_gripper_position(&self, fraction: f64) {
        let (_, max_limit) = self.joint_limits(GRIPPER_JOINT);
        self.set_joint_angle(GRIPPER_JOINT, fraction * max_limit, 300);
    }

    /// 上电（可靠性起见发 3 次，随后固定位置）
    pub fn enable_motors(&self) {
        if self.shared.is_stopped() {
            return;
        }
        self.shared.enable_motors_inner();
    }

    /// 断电
    pub fn disable_motors(&self) {
        if self.shared.is_stopped() {
            return;
        }
        self.shared.send_power_mode(PowerMode::Off);
    }

    /// 故障复位（断电 + 清除本地故障码 + 500ms 后补发断电）
    ///
    /// 不会自动重新上电；由操作者显式调用 [`Self::enable_motors`]。
    pub fn reset_errors(&self) {
        if self.shared.is_stopped() {
            return;
        }
        self.shared.reset_errors_inner();
    }

    // ============================================================
    // 急停与取消
    // ============================================================

    /// 急停：递增取消纪元、置位急停标志，并立即连发两次断电命令
    ///
    /// 重复发送是对 UDP 不保证投递的刻意缓解；纪元递增使所有未触发的
    /// 调度记录静默失效。
    pub fn emergency_stop(&self) {
        warn!("EMERGENCY STOP");
        self.shared.bump_epoch();
        self.shared.stopped.store(true, Ordering::Release);

        self.shared.send_power_mode(PowerMode::Off);
        self.shared.send_power_mode(PowerMode::Off);
    }

    /// 解除急停标志
    ///
    /// 不会重新上电，只允许重新下发命令；同时再次递增纪元，
    /// 丢弃急停期间可能积累的陈旧调度记录。
    pub fn clear_emergency_stop(&self) {
        self.shared.stopped.store(false, Ordering::Release);
        self.shared.bump_epoch();
        info!("emergency stop cleared");
    }

    /// 取消所有未触发的调度命令
    pub fn cancel_all_pending(&self) {
        let epoch = self.shared.bump_epoch();
        debug!(epoch, "all pending commands cancelled");
    }

    // ============================================================
    // 恢复流程
    // ============================================================

    /// 启动多步恢复流程（已在运行时忽略）
    ///
    /// 只能显式启动：标定中的 auto_recovery_enabled 不会触发此流程。
    pub fn start_recovery(&self) {
        {
            let mut recovery = self.shared.recovery.lock();
            if recovery.is_some() {
                debug!("recovery already in progress");
                return;
            }
            *recovery = Some(RecoveryRun::new());
        }

        self.shared.emit(LinkEvent::RecoveryStarted);
        self.shared
            .schedule_in(self.shared.config.recovery_tick, None, LinkCommand::RecoveryTick);
    }

    /// 恢复流程是否在运行
    pub fn is_recovering(&self) -> bool {
        self.shared.recovery.lock().is_some()
    }
}

impl Drop for ArmLink {
    fn drop(&mut self) {
        // 退出前断电（尽力而为）
        self.shared.send_power_mode(PowerMode::Off);

        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.sched_thread.take()
            && handle.join().is_err()
        {
            error!("scheduler thread panicked during shutdown");
        }
        if let Some(handle) = self.rx_thread.take()
            && handle.join().is_err()
        {
            error!("rx thread panicked during shutdown");
        }
    }
}
