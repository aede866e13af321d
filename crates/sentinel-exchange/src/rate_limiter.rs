//! 요청 가중치 기반 레이트 리미터.
//!
//! 거래소가 응답 헤더(`X-MBX-USED-WEIGHT-1M`)로 알려주는 1분 누적 가중치를
//! 기록하고, 다음 호출 전에 사용률에 따라 지연을 둡니다.
//!
//! | 사용률 | 지연 |
//! |---|---|
//! | 75% 미만 | 없음 |
//! | 75% ~ 90% | soft (기본 500ms) |
//! | 90% 이상 | hard (기본 3s) |
//!
//! 강제 차단이 아닌 부하 조절용입니다. 프로세스 전역에서 `Arc`로 공유됩니다.

use sentinel_core::GatewayConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 가중치 집계 창. 거래소의 1분 창과 같습니다.
const WINDOW: Duration = Duration::from_secs(60);

const SOFT_THRESHOLD: f64 = 0.75;
const HARD_THRESHOLD: f64 = 0.90;

/// 현재 창의 가중치 사용량.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    /// 가장 최근 응답이 보고한 누적 가중치
    pub consumed_weight: u32,
    /// 창당 허용 가중치
    pub window_limit: u32,
}

impl RateBudget {
    /// 사용률 (0.0 ~).
    pub fn usage_ratio(&self) -> f64 {
        if self.window_limit == 0 {
            return 1.0;
        }
        f64::from(self.consumed_weight) / f64::from(self.window_limit)
    }
}

/// `admit` 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 바로 통과
    Immediate,
    /// 지연 후 통과
    Delayed(Duration),
    /// 대기 중 종료 신호
    Cancelled,
}

#[derive(Debug)]
struct LimiterState {
    budget: RateBudget,
    recorded_at: Option<Instant>,
}

/// 레이트 리미터 통계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterMetrics {
    pub budget: RateBudget,
    /// 지연이 적용된 호출 수
    pub throttled: u64,
}

/// 가중치 기반 레이트 리미터.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    soft_delay: Duration,
    hard_delay: Duration,
    throttled: AtomicU64,
}

impl RateLimiter {
    /// 새 레이트 리미터 생성.
    pub fn new(window_limit: u32, soft_delay: Duration, hard_delay: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                budget: RateBudget {
                    consumed_weight: 0,
                    window_limit,
                },
                recorded_at: None,
            }),
            soft_delay,
            hard_delay,
            throttled: AtomicU64::new(0),
        }
    }

    /// 게이트웨이 설정에서 생성.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.weight_limit,
            Duration::from_millis(config.soft_throttle_ms),
            Duration::from_millis(config.hard_throttle_ms),
        )
    }

    /// 응답이 보고한 누적 가중치를 기록합니다.
    pub fn record(&self, used_weight: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.budget.consumed_weight = used_weight;
        state.recorded_at = Some(Instant::now());
    }

    /// 현재 예산. 마지막 기록이 창보다 오래되었으면 0으로 봅니다.
    pub fn budget(&self) -> RateBudget {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::effective_budget(&state)
    }

    fn effective_budget(state: &LimiterState) -> RateBudget {
        match state.recorded_at {
            Some(at) if at.elapsed() < WINDOW => state.budget,
            _ => RateBudget {
                consumed_weight: 0,
                ..state.budget
            },
        }
    }

    /// 다음 호출 전에 기다려야 할 시간.
    pub fn throttle_delay(&self) -> Duration {
        let ratio = self.budget().usage_ratio();
        if ratio >= HARD_THRESHOLD {
            self.hard_delay
        } else if ratio >= SOFT_THRESHOLD {
            self.soft_delay
        } else {
            Duration::ZERO
        }
    }

    /// 호출 허가. 필요하면 지연하며, 대기 중 `cancel`이 발생하면 즉시 반환합니다.
    ///
    /// 잠금은 지연 계산 동안만 잡고, 대기 전에 해제합니다.
    pub async fn admit(&self, cancel: &CancellationToken) -> Admission {
        let delay = self.throttle_delay();
        if delay.is_zero() {
            return Admission::Immediate;
        }

        self.throttled.fetch_add(1, Ordering::Relaxed);
        let budget = self.budget();
        tracing::warn!(
            consumed = budget.consumed_weight,
            limit = budget.window_limit,
            delay_ms = delay.as_millis() as u64,
            "Request weight near limit, throttling"
        );

        tokio::select! {
            _ = cancel.cancelled() => Admission::Cancelled,
            _ = tokio::time::sleep(delay) => Admission::Delayed(delay),
        }
    }

    /// 통계 반환.
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            budget: self.budget(),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(1000, Duration::from_millis(500), Duration::from_secs(3))
    }

    #[test]
    fn test_delay_thresholds() {
        let rl = limiter();
        assert_eq!(rl.throttle_delay(), Duration::ZERO);

        rl.record(749);
        assert_eq!(rl.throttle_delay(), Duration::ZERO);

        rl.record(750);
        assert_eq!(rl.throttle_delay(), Duration::from_millis(500));

        rl.record(899);
        assert_eq!(rl.throttle_delay(), Duration::from_millis(500));

        rl.record(900);
        assert_eq!(rl.throttle_delay(), Duration::from_secs(3));

        rl.record(1500);
        assert_eq!(rl.throttle_delay(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_sleeps_when_throttled() {
        let rl = limiter();
        let cancel = CancellationToken::new();

        assert_eq!(rl.admit(&cancel).await, Admission::Immediate);

        rl.record(950);
        let started = Instant::now();
        assert_eq!(
            rl.admit(&cancel).await,
            Admission::Delayed(Duration::from_secs(3))
        );
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(rl.metrics().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_is_cancellable() {
        let rl = limiter();
        rl.record(999);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        assert_eq!(rl.admit(&cancel).await, Admission::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_usage_expires_after_window() {
        let rl = limiter();
        rl.record(950);
        assert_eq!(rl.budget().consumed_weight, 950);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(rl.budget().consumed_weight, 0);
        assert_eq!(rl.throttle_delay(), Duration::ZERO);
    }
}
