//! 链路层错误类型定义

use d1_protocol::ProtocolError;
use thiserror::Error;

/// 链路层错误类型
///
/// 只有初始化失败是致命的；运行期发送失败会被记录并吞掉，
/// 由存活检测在持续失败时给出断连通知。
#[derive(Error, Debug)]
pub enum LinkError {
    /// 反馈端口绑定失败（致命，必须中止链路初始化）
    #[error("Failed to bind feedback port: {0}")]
    Bind(#[source] std::io::Error),

    /// 命令套接字创建失败（致命）
    #[error("Failed to open command socket: {0}")]
    CommandSocket(#[source] std::io::Error),

    /// 后台线程启动失败（致命）
    #[error("Failed to spawn link thread: {0}")]
    Thread(#[source] std::io::Error),

    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 非法关节索引
    #[error("Invalid joint id: {0}")]
    InvalidJoint(usize),
}

#[cfg(test)]
mod tests {
    use super::LinkError;

    #[test]
    fn test_error_display() {
        let err = LinkError::InvalidJoint(9);
        assert_eq!(format!("{}", err), "Invalid joint id: 9");

        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = LinkError::Bind(io_err);
        assert!(format!("{}", err).contains("bind feedback port"));
    }
}
