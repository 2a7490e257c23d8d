//! 链路配置

use d1_protocol::{UDP_CMD_PORT, UDP_FEEDBACK_PORT};
use std::net::SocketAddr;
use std::time::Duration;

/// 链路配置
///
/// 默认值为部署使用的固定端口与定时参数；测试用例可以把两个地址
/// 指向临时端口。
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 命令目的地址（relay 的命令端口）
    pub command_addr: SocketAddr,
    /// 反馈绑定地址（带端口复用，容忍快速重启）
    pub feedback_bind: SocketAddr,
    /// 存活超时：反馈静默超过该时长视为断连
    pub connection_timeout: Duration,
    /// 存活检查周期
    pub connection_check_interval: Duration,
    /// 多关节分发时相邻命令的间隔
    pub inter_joint_delay: Duration,
    /// 恢复流程节拍
    pub recovery_tick: Duration,
    /// 反馈套接字读超时（决定关闭时 RX 线程的响应速度）
    pub read_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_addr: SocketAddr::from(([127, 0, 0, 1], UDP_CMD_PORT)),
            feedback_bind: SocketAddr::from(([0, 0, 0, 0], UDP_FEEDBACK_PORT)),
            connection_timeout: Duration::from_secs(2),
            connection_check_interval: Duration::from_millis(500),
            inter_joint_delay: Duration::from_millis(15),
            recovery_tick: Duration::from_millis(100),
            read_timeout: Duration::from_millis(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = LinkConfig::default();
        assert_eq!(config.command_addr.port(), 8888);
        assert_eq!(config.feedback_bind.port(), 8889);
        assert_eq!(config.connection_timeout, Duration::from_secs(2));
        assert_eq!(config.inter_joint_delay, Duration::from_millis(15));
    }
}
