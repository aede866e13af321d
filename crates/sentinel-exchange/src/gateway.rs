//! API 게이트웨이.
//!
//! 모든 원격 호출이 거치는 단일 경로입니다. 호출마다:
//!
//! 1. `RateLimiter::admit`로 가중치 사용률에 따른 지연
//! 2. 호출 실행 후 응답 가중치를 `RateLimiter::record`에 기록 (실패 포함)
//! 3. 실패는 `classify`로 등급을 정해 처리
//!    - Fatal: `GatewayError::Fatal` 즉시 반환
//!    - Retryable: 지수 백오프 후 재시도, 한도 초과 시 `RetriesExhausted`
//!    - Conflict / AlreadySatisfied: `CallOutcome::NoOpSuccess`
//!    - Business: `CallOutcome::NoOpFailure`
//!
//! 백오프와 admit 대기는 종료 토큰으로 취소됩니다.

use crate::classifier::{classify, ErrorClass};
use crate::error::ExchangeError;
use crate::rate_limiter::{Admission, RateLimiter};
use crate::retry::RetryPolicy;
use crate::traits::ApiReply;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 게이트웨이 호출 결과 (Fatal/재시도 소진/취소 제외).
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// 정상 응답
    Success(T),
    /// Conflict/AlreadySatisfied. 호출자는 성공으로 보고 진행합니다.
    NoOpSuccess {
        class: ErrorClass,
        error: ExchangeError,
    },
    /// Business 에러. 이 요청만 건너뜁니다.
    NoOpFailure(ExchangeError),
}

impl<T> CallOutcome<T> {
    /// Success 또는 NoOpSuccess인지 확인.
    pub fn is_success(&self) -> bool {
        !matches!(self, CallOutcome::NoOpFailure(_))
    }

    /// 정상 응답 값.
    pub fn into_value(self) -> Option<T> {
        match self {
            CallOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// 실패 원인 에러 (NoOpSuccess/NoOpFailure).
    pub fn error(&self) -> Option<&ExchangeError> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::NoOpSuccess { error, .. } | CallOutcome::NoOpFailure(error) => Some(error),
        }
    }
}

/// 게이트웨이 밖으로 전파되는 에러.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 치명적 에러. 엔진을 중지해야 합니다.
    #[error("Fatal error in {operation}: {error}")]
    Fatal {
        operation: String,
        error: ExchangeError,
    },

    /// 재시도 한도 초과. 실제 결과는 알 수 없습니다.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: ExchangeError,
    },

    /// 종료 신호로 취소됨
    #[error("{operation} cancelled by shutdown")]
    Cancelled { operation: String },
}

impl GatewayError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Fatal { .. })
    }

    /// 원인 거래소 에러.
    pub fn exchange_error(&self) -> Option<&ExchangeError> {
        match self {
            GatewayError::Fatal { error, .. } => Some(error),
            GatewayError::RetriesExhausted { last, .. } => Some(last),
            GatewayError::Cancelled { .. } => None,
        }
    }

    /// 거래소 에러로 변환. 취소는 연결 끊김으로 봅니다.
    pub fn into_exchange_error(self) -> ExchangeError {
        match self {
            GatewayError::Fatal { error, .. } => error,
            GatewayError::RetriesExhausted { last, .. } => last,
            GatewayError::Cancelled { operation } => {
                ExchangeError::Disconnected(format!("{operation} cancelled"))
            }
        }
    }
}

/// 게이트웨이 호출 결과 타입.
pub type GatewayResult<T> = Result<CallOutcome<T>, GatewayError>;

/// 단일 호출 보고.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallReport {
    /// 실행한 시도 횟수
    pub attempts: u32,
    /// 마지막 실패의 등급 (성공이면 None)
    pub class: Option<ErrorClass>,
}

/// 게이트웨이 누적 통계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub calls: u64,
    pub retries: u64,
    pub fatal: u64,
    pub noop_success: u64,
    pub noop_failure: u64,
    pub exhausted: u64,
}

/// API 게이트웨이.
pub struct ApiGateway {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    calls: AtomicU64,
    retries: AtomicU64,
    fatal: AtomicU64,
    noop_success: AtomicU64,
    noop_failure: AtomicU64,
    exhausted: AtomicU64,
}

impl ApiGateway {
    /// 새 게이트웨이 생성. 리미터는 모든 호출 경로가 공유합니다.
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self {
            limiter,
            policy,
            shutdown,
            calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
            noop_success: AtomicU64::new(0),
            noop_failure: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 원격 호출을 실행합니다.
    ///
    /// `f`는 시도마다 새 요청 future를 만들어야 합니다.
    pub async fn call<T, F, Fut>(&self, operation: &str, f: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiReply<T>>,
    {
        self.call_with_report(operation, f).await.0
    }

    /// `call`과 같지만 시도 횟수 보고를 함께 반환합니다.
    pub async fn call_with_report<T, F, Fut>(
        &self,
        operation: &str,
        mut f: F,
    ) -> (GatewayResult<T>, CallReport)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiReply<T>>,
    {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut attempts: u32 = 0;

        loop {
            if self.limiter.admit(&self.shutdown).await == Admission::Cancelled {
                return (
                    Err(GatewayError::Cancelled {
                        operation: operation.to_string(),
                    }),
                    CallReport { attempts, class: None },
                );
            }

            attempts += 1;
            let reply = f().await;
            if let Some(weight) = reply.used_weight {
                self.limiter.record(weight);
            }

            let err = match reply.result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "Call succeeded after retry");
                    }
                    return (Ok(CallOutcome::Success(value)), CallReport { attempts, class: None });
                }
                Err(err) => err,
            };

            let class = classify(&err);
            let report = CallReport {
                attempts,
                class: Some(class),
            };

            match class {
                ErrorClass::Fatal => {
                    self.fatal.fetch_add(1, Ordering::Relaxed);
                    error!(operation, error = %err, "Fatal exchange error");
                    return (
                        Err(GatewayError::Fatal {
                            operation: operation.to_string(),
                            error: err,
                        }),
                        report,
                    );
                }
                ErrorClass::Conflict => {
                    self.noop_success.fetch_add(1, Ordering::Relaxed);
                    warn!(operation, error = %err, "Conflicting state, treated as no-op");
                    return (Ok(CallOutcome::NoOpSuccess { class, error: err }), report);
                }
                ErrorClass::AlreadySatisfied => {
                    self.noop_success.fetch_add(1, Ordering::Relaxed);
                    info!(operation, error = %err, "Already in requested state");
                    return (Ok(CallOutcome::NoOpSuccess { class, error: err }), report);
                }
                ErrorClass::Business => {
                    self.noop_failure.fetch_add(1, Ordering::Relaxed);
                    warn!(operation, error = %err, "Request rejected, skipping");
                    return (Ok(CallOutcome::NoOpFailure(err)), report);
                }
                ErrorClass::Retryable => {}
            }

            if attempts >= self.policy.max_attempts {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                error!(operation, attempts, error = %err, "Retries exhausted");
                return (
                    Err(GatewayError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts,
                        last: err,
                    }),
                    report,
                );
            }

            self.retries.fetch_add(1, Ordering::Relaxed);
            let delay = self.policy.delay(attempts - 1);
            warn!(
                operation,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable error, backing off"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return (
                        Err(GatewayError::Cancelled { operation: operation.to_string() }),
                        report,
                    );
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 누적 통계.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            calls: self.calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
            noop_success: self.noop_success.load(Ordering::Relaxed),
            noop_failure: self.noop_failure.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn gateway(max_attempts: u32) -> ApiGateway {
        let limiter = Arc::new(RateLimiter::new(
            1000,
            Duration::from_millis(500),
            Duration::from_secs(3),
        ));
        let policy = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };
        ApiGateway::new(limiter, policy, CancellationToken::new())
    }

    fn api_err(code: i32) -> ExchangeError {
        ExchangeError::Api {
            code,
            message: "test".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_three_timeouts() {
        let gw = gateway(5);
        let count = AtomicU32::new(0);

        let (result, report) = gw
            .call_with_report("server_time", || {
                let n = count.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        ApiReply::err(ExchangeError::Timeout("read timed out".into()))
                    } else {
                        ApiReply::ok(42_i64)
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok(CallOutcome::Success(42))));
        assert_eq!(report.attempts, 4);
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(gw.stats().retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_is_noop_success_without_retry() {
        let gw = gateway(5);
        let count = AtomicU32::new(0);

        let (result, report) = gw
            .call_with_report("set_margin_type", || {
                count.fetch_add(1, Ordering::SeqCst);
                async { ApiReply::<()>::err(api_err(-4047)) }
            })
            .await;

        match result {
            Ok(CallOutcome::NoOpSuccess { class, .. }) => assert_eq!(class, ErrorClass::Conflict),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(report.attempts, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_satisfied_is_success() {
        let gw = gateway(5);
        let result = gw
            .call("set_margin_type", || async { ApiReply::<()>::err(api_err(-4046)) })
            .await
            .unwrap();
        assert!(result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_business_error_not_retried() {
        let gw = gateway(5);
        let count = AtomicU32::new(0);

        let result = gw
            .call("place_market_order", || {
                count.fetch_add(1, Ordering::SeqCst);
                async { ApiReply::<()>::err(api_err(-2019)) }
            })
            .await
            .unwrap();

        assert!(matches!(result, CallOutcome::NoOpFailure(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_propagates_immediately() {
        let gw = gateway(5);
        let count = AtomicU32::new(0);

        let result = gw
            .call("balance", || {
                count.fetch_add(1, Ordering::SeqCst);
                async { ApiReply::<()>::err(api_err(-2015)) }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Fatal { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(gw.stats().fatal, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let gw = gateway(3);

        let (result, report) = gw
            .call_with_report("positions", || async {
                ApiReply::<()>::err(ExchangeError::Network("connection reset".into()))
            })
            .await;

        match result {
            Err(GatewayError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(report.attempts, 3);
        assert_eq!(report.class, Some(ErrorClass::Retryable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_are_exponential() {
        let gw = gateway(4);
        let started = tokio::time::Instant::now();

        let _ = gw
            .call("positions", || async {
                ApiReply::<()>::err(ExchangeError::Timeout("t".into()))
            })
            .await;

        // 100 + 200 + 400
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_weight_recorded_on_failure() {
        let gw = gateway(1);

        let _ = gw
            .call("positions", || async {
                ApiReply::<()>::err(api_err(-2019)).with_weight(820)
            })
            .await;

        assert_eq!(gw.limiter().budget().consumed_weight, 820);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_cancelled_by_shutdown() {
        let limiter = Arc::new(RateLimiter::new(1000, Duration::ZERO, Duration::ZERO));
        let shutdown = CancellationToken::new();
        let gw = ApiGateway::new(
            limiter,
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(30),
                jitter: Duration::ZERO,
            },
            shutdown.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.cancel();
        });

        let result = gw
            .call("positions", || async {
                ApiReply::<()>::err(ExchangeError::Timeout("t".into()))
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Cancelled { .. })));
        canceller.await.unwrap();
    }
}
