//! 거래소 에러 타입.

use thiserror::Error;

/// 거래소 호출/스트림 에러.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 본문에 에러 코드가 없는 HTTP 실패
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// 거래소 API 에러 코드
    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    Parse(String),

    /// 클라이언트 설정 에러
    #[error("Config error: {0}")]
    Config(String),
}

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    /// API 에러 코드.
    pub fn api_code(&self) -> Option<i32> {
        match self {
            ExchangeError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 전송 계층 에러(응답 자체를 받지 못함)인지 확인.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::WebSocket(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::Parse(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_code() {
        let err = ExchangeError::Api {
            code: -2019,
            message: "Margin is insufficient.".to_string(),
        };
        assert_eq!(err.api_code(), Some(-2019));
        assert_eq!(err.to_string(), "API error -2019: Margin is insufficient.");
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_errors() {
        assert!(ExchangeError::Timeout("read".into()).is_transport());
        assert!(ExchangeError::WebSocket("reset".into()).is_transport());
        assert!(!ExchangeError::Parse("bad json".into()).is_transport());
    }
}
