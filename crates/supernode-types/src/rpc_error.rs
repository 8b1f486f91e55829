//! JSON-RPC style error envelope surfaced to clients on `Error` statuses:
//! a negative code in a published namespace plus a message.

use serde::{Deserialize, Serialize};

/// Published negative error-code namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum ErrorCode {
    ClientProtocolError = -1000,
    InvalidPaymentId = -1001,
    InvalidAddress = -1002,
    InvalidSignature = -1003,
    AuthSampleBuildFailure = -1004,
    UpstreamFailure = -1101,
    UpstreamTimeout = -1102,
    Overloaded = -1201,
    RateLimited = -1202,
    HandlerError = -1900,
    Internal = -1901,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.code(), message: message.into() }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "code": self.code, "message": self.message })
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_negative_namespace_code() {
        let e = RpcError::new(ErrorCode::InvalidSignature, "bad sig");
        assert_eq!(e.code, -1003);
        assert_eq!(e.to_json(), serde_json::json!({"code": -1003, "message": "bad sig"}));
    }
}
