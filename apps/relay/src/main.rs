//! D1 UDP relay 主入口
//!
//! 独立进程：一侧终结机器人侧的发布/订阅总线，另一侧终结控制端的
//! UDP 命令/反馈通道，在两种传输之间重编码消息。

mod pacer;
mod relay;

use clap::Parser;
use relay::{Relay, RelayConfig};
use std::net::SocketAddr;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// D1 UDP relay
///
/// 在机器人总线（rt/arm_Command、rt/arm_Feedback、current_servo_angle）
/// 与控制端 UDP 通道之间转发消息
#[derive(Parser, Debug)]
#[command(name = "d1_udp_relay")]
#[command(about = "D1 UDP relay - bridges the robot bus and the control UDP channel", long_about = None)]
struct Args {
    /// 命令监听端口（接收来自控制端的 UDP 数据报）
    #[arg(long, default_value_t = d1_protocol::UDP_CMD_PORT)]
    cmd_port: u16,

    /// 反馈目的地址（控制端的反馈端口）
    #[arg(long, default_value = "127.0.0.1:8889")]
    feedback_addr: SocketAddr,

    /// 总线接入端点（如 tcp/192.168.123.161:7447；可重复）
    #[arg(long)]
    connect: Vec<String>,

    /// 相邻命令之间的最小间隔（毫秒）
    #[arg(long, default_value = "50")]
    min_interval_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // Ctrl+C 优雅退出
    ctrlc::set_handler(|| {
        eprintln!("\nReceived interrupt signal. Shutting down...");
        process::exit(0);
    })
    .expect("Failed to set signal handler");

    let config = RelayConfig {
        cmd_bind: SocketAddr::from(([0, 0, 0, 0], args.cmd_port)),
        feedback_addr: args.feedback_addr,
        connect: args.connect,
        min_command_interval: Duration::from_millis(args.min_interval_ms),
    };

    let relay = match Relay::start(config) {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!("failed to start relay: {}", e);
            process::exit(1);
        },
    };

    tracing::info!("relay running, waiting for robot data...");
    relay.join();
}
