//! 거래소 연결 및 호출 경로.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `FuturesApi` trait: 선물 거래소 REST 인터페이스
//! - Binance USDⓈ-M 커넥터 (REST + WebSocket)
//! - 에러 분류기, 가중치 기반 rate limiter, 재시도 정책
//! - API 게이트웨이: 모든 원격 호출의 단일 경로
//! - 스트림 세션과 연결 슈퍼바이저 (워치독, 재연결)

pub mod classifier;
pub mod connector;
pub mod error;
pub mod gateway;
pub mod rate_limiter;
pub mod retry;
pub mod supervisor;
pub mod traits;
pub mod websocket;

pub use classifier::{classify, classify_code, ErrorClass};
pub use connector::{BinanceConfig, BinanceFuturesClient};
pub use error::*;
pub use gateway::{ApiGateway, CallOutcome, CallReport, GatewayError, GatewayResult, GatewayStats};
pub use rate_limiter::{Admission, RateBudget, RateLimiter, RateLimiterMetrics};
pub use retry::{ReconnectPolicy, RetryPolicy};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, ExitReason, SupervisorHandle, WatchdogConfig,
};
pub use traits::*;
pub use websocket::*;
