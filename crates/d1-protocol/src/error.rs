//! 协议层错误类型定义

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON 解析或序列化失败
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 未知功能码
    #[error("Unknown funcode: {funcode}")]
    UnknownFuncode { funcode: u8 },

    /// 功能码与负载不匹配（如 funcode 4 出现在命令方向）
    #[error("Funcode {funcode} is not valid in this direction")]
    WrongDirection { funcode: u8 },

    /// 数值字段超出协议范围
    #[error("Field out of range: {field} = {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

#[cfg(test)]
mod tests {
    use super::ProtocolError;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownFuncode { funcode: 9 };
        assert_eq!(format!("{}", err), "Unknown funcode: 9");

        let err = ProtocolError::WrongDirection { funcode: 4 };
        assert!(format!("{}", err).contains("not valid"));
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: ProtocolError = parse_err.into();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
