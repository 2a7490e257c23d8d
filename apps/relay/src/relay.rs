//! Relay 核心逻辑
//!
//! 总线侧：一个命令发布端点、两个订阅端点（字符串状态主题 +
//! 结构化舵机角度主题）。UDP 侧：一个只收的命令端口、一个只发的
//! 反馈目的地址。
//!
//! 反馈由角度更新推动：每收到一次舵机角度样本，就把角度缓存与
//! 电源/故障标志重编码为一条反馈数据报发往控制端；纯状态更新不
//! 触发重发，保持角度与反馈节奏绑定。
//!
//! 共享的角度缓存被总线回调线程和 UDP 命令线程同时访问，必须加锁。

use crate::pacer::CommandPacer;
use d1_protocol::{
    CMD_TOPIC, CommandFrame, FEEDBACK_TOPIC, FeedbackData, FeedbackFrame, NUM_JOINTS, SERVO_TOPIC,
    ServoAngles,
};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use zenoh::Wait;

/// Relay 配置
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// 命令监听地址
    pub cmd_bind: SocketAddr,
    /// 反馈目的地址
    pub feedback_addr: SocketAddr,
    /// 总线接入端点（空则使用 zenoh 默认发现）
    pub connect: Vec<String>,
    /// 相邻命令之间的最小间隔
    pub min_command_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cmd_bind: SocketAddr::from(([0, 0, 0, 0], d1_protocol::UDP_CMD_PORT)),
            feedback_addr: SocketAddr::from(([127, 0, 0, 1], d1_protocol::UDP_FEEDBACK_PORT)),
            connect: Vec::new(),
            min_command_interval: Duration::from_millis(50),
        }
    }
}

/// Relay 错误类型
#[derive(Debug)]
pub enum RelayError {
    SocketInit(String),
    Bus(String),
    Io(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::SocketInit(msg) => write!(f, "Socket init error: {}", msg),
            RelayError::Bus(msg) => write!(f, "Bus error: {}", msg),
            RelayError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io(e.to_string())
    }
}

/// 最新已知的机器人状态缓存
///
/// 舵机角度样本意味着电机在出数据，power_status 由它置 1；
/// 状态主题只携带可靠的 error_status。
struct RobotCache {
    angles: [f64; NUM_JOINTS],
    power_status: i32,
    error_status: i32,
}

struct RelayShared {
    cache: Mutex<RobotCache>,
    feedback_socket: UdpSocket,
    feedback_addr: SocketAddr,
    feedback_seq: AtomicU32,
    servo_samples: AtomicU64,
}

impl RelayShared {
    /// 把当前缓存重编码为一条反馈数据报发往控制端
    fn push_feedback(&self) {
        let data = {
            let cache = self.cache.lock();
            FeedbackData::from_full(cache.power_status, cache.error_status, cache.angles)
        };

        let seq = self.feedback_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = FeedbackFrame::new(seq, data);

        match frame.encode() {
            Ok(text) => {
                if let Err(e) = self.feedback_socket.send_to(text.as_bytes(), self.feedback_addr) {
                    warn!("failed to send feedback datagram: {}", e);
                }
            },
            Err(e) => warn!("failed to encode feedback: {}", e),
        }
    }
}

/// 从状态主题的字符串负载中提取 error_status
///
/// 负载是固件自定的 JSON 文本；error_status 可能在顶层或 data 对象内。
fn parse_error_status(text: &str) -> Option<i32> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    if let Some(code) = value.get("error_status").and_then(|v| v.as_i64()) {
        return Some(code as i32);
    }
    value
        .get("data")
        .and_then(|d| d.get("error_status"))
        .and_then(|v| v.as_i64())
        .map(|code| code as i32)
}

/// UDP 命令接收线程
///
/// 唯一的阻塞循环：收一条、按下限间隔补睡、再发布到总线。
fn command_loop(socket: UdpSocket, session: Arc<zenoh::Session>, min_interval: Duration) {
    let mut pacer = CommandPacer::new(min_interval);
    let mut buf = [0u8; 4096];

    loop {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _peer)) => len,
            Err(e) => {
                warn!("command receive error: {}", e);
                continue;
            },
        };

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            warn!("ignoring non-UTF-8 command datagram");
            continue;
        };

        // 校验后原样转发；畸形数据报不进总线
        if let Err(e) = CommandFrame::decode(text) {
            warn!("dropping malformed command: {}", e);
            continue;
        }

        pacer.pace();

        if let Err(e) = session.put(CMD_TOPIC, text.as_bytes().to_vec()).wait() {
            warn!("failed to publish command to bus: {}", e);
            continue;
        }
        trace!(len, "command republished to bus");
    }
}

/// 运行中的 relay
pub struct Relay {
    command_thread: JoinHandle<()>,
    // 会话与订阅句柄随 Relay 存活；drop 即关闭/退订
    _session: Arc<zenoh::Session>,
    _feedback_sub: zenoh::pubsub::Subscriber<()>,
    _servo_sub: zenoh::pubsub::Subscriber<()>,
}

impl Relay {
    /// 启动 relay：打开总线会话、声明订阅、绑定命令端口
    pub fn start(config: RelayConfig) -> Result<Self, RelayError> {
        // 1. 反馈发送套接字
        let feedback_socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| RelayError::SocketInit(e.to_string()))?;

        let shared = Arc::new(RelayShared {
            cache: Mutex::new(RobotCache {
                angles: [0.0; NUM_JOINTS],
                power_status: 0,
                error_status: 0,
            }),
            feedback_socket,
            feedback_addr: config.feedback_addr,
            feedback_seq: AtomicU32::new(0),
            servo_samples: AtomicU64::new(0),
        });

        // 2. 总线会话
        let mut zenoh_config = zenoh::Config::default();
        if !config.connect.is_empty() {
            let endpoints: Vec<String> =
                config.connect.iter().map(|s| format!("\"{}\"", s)).collect();
            zenoh_config
                .insert_json5("connect/endpoints", &format!("[{}]", endpoints.join(",")))
                .map_err(|e| RelayError::Bus(format!("invalid connect endpoints: {}", e)))?;
        }

        let session = Arc::new(
            zenoh::open(zenoh_config)
                .wait()
                .map_err(|e| RelayError::Bus(format!("failed to open bus session: {}", e)))?,
        );
        info!("bus session established");

        // 3. 状态主题订阅：只提取 error_status，不触发反馈重发
        let feedback_shared = shared.clone();
        let feedback_sub = session
            .declare_subscriber(FEEDBACK_TOPIC)
            .callback(move |sample| {
                let payload = sample.payload().to_bytes();
                let Ok(text) = std::str::from_utf8(&payload) else {
                    return;
                };
                if let Some(code) = parse_error_status(text) {
                    let mut cache = feedback_shared.cache.lock();
                    if cache.error_status != code {
                        cache.error_status = code;
                        info!(error_status = code, "robot error status changed");
                    }
                }
            })
            .wait()
            .map_err(|e| RelayError::Bus(format!("failed to subscribe {}: {}", FEEDBACK_TOPIC, e)))?;
        info!(topic = FEEDBACK_TOPIC, "bus subscriber ready");

        // 4. 舵机角度主题订阅：更新缓存并推送一条反馈数据报
        let servo_shared = shared.clone();
        let servo_sub = session
            .declare_subscriber(SERVO_TOPIC)
            .callback(move |sample| {
                let payload = sample.payload().to_bytes();
                let Ok(angles) = serde_json::from_slice::<ServoAngles>(&payload) else {
                    trace!("ignoring malformed servo sample");
                    return;
                };

                {
                    let mut cache = servo_shared.cache.lock();
                    cache.angles = angles.to_array();
                    // 有角度数据即认为电机在线：反馈主题并不总是携带电源位
                    cache.power_status = 1;
                }

                let count = servo_shared.servo_samples.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 50 == 0 {
                    debug!(
                        samples = count,
                        j0 = angles.servo0,
                        j1 = angles.servo1,
                        "servo stream alive"
                    );
                }

                servo_shared.push_feedback();
            })
            .wait()
            .map_err(|e| RelayError::Bus(format!("failed to subscribe {}: {}", SERVO_TOPIC, e)))?;
        info!(topic = SERVO_TOPIC, "bus subscriber ready");

        // 5. 命令接收线程（专用阻塞线程）
        let cmd_socket = UdpSocket::bind(config.cmd_bind)
            .map_err(|e| RelayError::SocketInit(format!("bind {}: {}", config.cmd_bind, e)))?;
        info!(addr = %config.cmd_bind, "listening for commands");

        let cmd_session = session.clone();
        let min_interval = config.min_command_interval;
        let command_thread =
            std::thread::spawn(move || command_loop(cmd_socket, cmd_session, min_interval));

        info!(feedback_addr = %config.feedback_addr, "forwarding feedback to control app");

        Ok(Self {
            command_thread,
            _session: session,
            _feedback_sub: feedback_sub,
            _servo_sub: servo_sub,
        })
    }

    /// 阻塞等待命令线程退出（正常情况下永不返回）
    pub fn join(self) {
        let _ = self.command_thread.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_status_top_level() {
        assert_eq!(parse_error_status(r#"{"error_status":3}"#), Some(3));
        assert_eq!(parse_error_status(r#"{"error_status":0}"#), Some(0));
    }

    #[test]
    fn test_parse_error_status_nested() {
        let text = r#"{"seq":1,"funcode":2,"data":{"error_status":12}}"#;
        assert_eq!(parse_error_status(text), Some(12));
    }

    #[test]
    fn test_parse_error_status_absent_or_malformed() {
        assert_eq!(parse_error_status(r#"{"power_status":1}"#), None);
        assert_eq!(parse_error_status("not json"), None);
        assert_eq!(parse_error_status(r#"{"error_status":"oops"}"#), None);
    }

    #[test]
    fn test_feedback_encoding_from_cache() {
        let cache = RobotCache {
            angles: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            power_status: 1,
            error_status: 0,
        };
        let data = FeedbackData::from_full(cache.power_status, cache.error_status, cache.angles);
        let frame = FeedbackFrame::new(1, data);
        let text = frame.encode().unwrap();

        let decoded = FeedbackFrame::decode(&text).unwrap();
        assert_eq!(decoded.data.power_status, Some(1));
        assert_eq!(decoded.data.angles()[6], Some(7.0));
    }
}
