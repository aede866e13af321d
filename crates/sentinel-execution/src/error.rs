//! 실행 계층 에러.

use sentinel_core::CoreError;
use sentinel_exchange::{ExchangeError, GatewayError};
use thiserror::Error;

/// 엔진 에러.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 치명적 거래소 에러 (인증 실패, 계정 차단). 엔진을 중지합니다.
    #[error("Fatal: {0}")]
    Fatal(GatewayError),

    /// 재시도 소진 등 결과를 알 수 없는 게이트웨이 실패
    #[error("Gateway error: {0}")]
    Gateway(GatewayError),

    /// 거래소가 요청을 거절함 (Business)
    #[error("{operation} rejected: {error}")]
    Rejected {
        operation: String,
        error: ExchangeError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Shutdown in progress")]
    Shutdown,
}

impl EngineError {
    /// 엔진을 중지해야 하는 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_) | EngineError::Config(_))
    }

    pub(crate) fn rejected(operation: &str, error: ExchangeError) -> Self {
        EngineError::Rejected {
            operation: operation.to_string(),
            error,
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Fatal { .. } => EngineError::Fatal(err),
            GatewayError::Cancelled { .. } => EngineError::Shutdown,
            GatewayError::RetriesExhausted { .. } => EngineError::Gateway(err),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// 엔진 결과 타입.
pub type EngineResult<T> = Result<T, EngineError>;
