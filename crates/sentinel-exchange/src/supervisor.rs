//! 연결 수명주기 관리자.
//!
//! 상태 전이:
//!
//! ```text
//! Disconnected --start--> Connecting --성공--> Connected
//! Connecting --실패--> Reconnecting
//! Connected --워치독/전송 에러--> Reconnecting --성공--> Connected
//! Reconnecting --재시도 한도 초과--> FatalError (종료 상태)
//! 인증 실패 --> FatalError (재시도 슬롯 소모 없음)
//! ```
//!
//! 워치독은 별도 태스크로 마지막 수신 이후 경과 시간을 샘플링합니다.

use crate::classifier::{classify, ErrorClass};
use crate::error::ExchangeError;
use crate::retry::ReconnectPolicy;
use crate::websocket::{SessionEnd, StreamConnector, StreamSinks};
use sentinel_core::ConnectionConfig;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// 종료 상태. 프로세스를 외부에서 재시작해야 합니다.
    FatalError,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::FatalError => "fatal_error",
        };
        f.write_str(s)
    }
}

impl ConnectionState {
    /// 허용된 전이인지 확인.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, to) {
            (FatalError, _) => false,
            (_, FatalError) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected | Reconnecting | Disconnected) => true,
            (Connected, Reconnecting | Disconnected) => true,
            (Reconnecting, Connected | Disconnected) => true,
            _ => false,
        }
    }
}

/// 수명주기 종료 사유.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// 정상 종료 요청
    Shutdown,
    /// fail-fast 워치독이 데이터 정지를 감지
    WatchdogStale,
    /// 재연결 한도 초과
    ReconnectLimit { attempts: u32 },
    /// 인증/권한 실패
    AuthFailure(String),
    /// 그 외 치명적 에러
    Fatal(String),
}

impl ExitReason {
    /// 비정상 종료인지 확인 (CLI 종료 코드 결정).
    pub fn is_failure(&self) -> bool {
        !matches!(self, ExitReason::Shutdown)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::WatchdogStale => write!(f, "no data received within watchdog timeout"),
            ExitReason::ReconnectLimit { attempts } => {
                write!(f, "reconnect limit reached after {attempts} attempts")
            }
            ExitReason::AuthFailure(msg) => write!(f, "authentication failure: {msg}"),
            ExitReason::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

/// 워치독 설정.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// 이 시간 이상 수신이 없으면 정지로 판단
    pub timeout: Duration,
    /// 샘플링 간격
    pub interval: Duration,
    /// true면 재연결 대신 FatalError로 종료
    pub fail_fast: bool,
}

impl WatchdogConfig {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            timeout: config.watchdog_timeout(),
            interval: config.watchdog_interval(),
            fail_fast: config.fail_fast,
        }
    }
}

/// 슈퍼바이저 태스크 핸들.
pub struct SupervisorHandle {
    lifecycle: JoinHandle<ExitReason>,
    watchdog: JoinHandle<()>,
}

impl SupervisorHandle {
    /// 수명주기 종료까지 대기.
    pub async fn join(self) -> ExitReason {
        let reason = match self.lifecycle.await {
            Ok(reason) => reason,
            Err(e) => ExitReason::Fatal(format!("supervisor task failed: {e}")),
        };
        self.watchdog.abort();
        let _ = self.watchdog.await;
        reason
    }
}

/// 연결 슈퍼바이저.
pub struct ConnectionSupervisor {
    connector: Arc<dyn StreamConnector>,
    sinks: StreamSinks,
    policy: ReconnectPolicy,
    watchdog: WatchdogConfig,
    state: Mutex<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU32,
    exit_reason: Mutex<Option<ExitReason>>,
    shutdown: CancellationToken,
    stale: Notify,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        sinks: StreamSinks,
        policy: ReconnectPolicy,
        watchdog: WatchdogConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            sinks,
            policy,
            watchdog,
            state: Mutex::new(ConnectionState::Disconnected),
            state_tx,
            reconnect_attempts: AtomicU32::new(0),
            exit_reason: Mutex::new(None),
            shutdown,
            stale: Notify::new(),
        }
    }

    /// 현재 상태.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 상태 변경 구독.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 마지막 성공 이후 재연결 시도 횟수.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Acquire)
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 종료 요청. 여러 번 호출해도 안전합니다.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// 수명주기 태스크와 워치독 태스크를 시작합니다.
    pub fn spawn(self: &Arc<Self>) -> SupervisorHandle {
        SupervisorHandle {
            lifecycle: tokio::spawn(self.clone().run_lifecycle()),
            watchdog: tokio::spawn(self.clone().run_watchdog()),
        }
    }

    /// 상태 전이. 허용되지 않거나 같은 상태면 false.
    fn transition(&self, to: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *state;
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Ignoring invalid connection state transition");
            return false;
        }
        *state = to;
        self.state_tx.send_replace(to);
        drop(state);

        if to == ConnectionState::FatalError {
            error!(%from, %to, "Connection state changed");
        } else {
            info!(%from, %to, "Connection state changed");
        }
        true
    }

    fn set_exit_reason(&self, reason: ExitReason) -> ExitReason {
        let mut slot = self.exit_reason.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(reason).clone()
    }

    fn escalate(&self, reason: ExitReason) -> ExitReason {
        self.transition(ConnectionState::FatalError);
        let reason = self.set_exit_reason(reason);
        error!(reason = %reason, "Connection supervisor stopped");
        reason
    }

    fn finish_shutdown(&self) -> ExitReason {
        self.transition(ConnectionState::Disconnected);
        let reason = self.set_exit_reason(ExitReason::Shutdown);
        info!("Connection supervisor shut down");
        reason
    }

    async fn run_lifecycle(self: Arc<Self>) -> ExitReason {
        self.transition(ConnectionState::Connecting);

        loop {
            if self.shutdown.is_cancelled() {
                return self.finish_shutdown();
            }

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => return self.finish_shutdown(),
                result = self.connector.connect(&self.sinks) => result,
            };

            let failure = match connected {
                Ok(mut session) => {
                    self.reconnect_attempts.store(0, Ordering::Release);
                    self.sinks.liveness.touch();
                    self.transition(ConnectionState::Connected);

                    let end = tokio::select! {
                        _ = self.shutdown.cancelled() => None,
                        _ = self.stale.notified() => Some(SessionEnd::Closed(
                            "no data received within watchdog timeout".to_string(),
                        )),
                        end = session.closed() => Some(end),
                    };
                    self.connector.disconnect(session).await;

                    match end {
                        None | Some(SessionEnd::Shutdown) => return self.finish_shutdown(),
                        Some(SessionEnd::Error(e)) => e,
                        Some(SessionEnd::Closed(reason)) => ExchangeError::Disconnected(reason),
                        Some(SessionEnd::ListenKeyExpired) => {
                            ExchangeError::Disconnected("listen key expired".to_string())
                        }
                    }
                }
                Err(e) => e,
            };

            // fail-fast 워치독이 이미 종료를 결정함
            if let Some(reason) = self.exit_reason() {
                return reason;
            }
            if self.shutdown.is_cancelled() {
                return self.finish_shutdown();
            }

            if classify(&failure) == ErrorClass::Fatal {
                return self.escalate(ExitReason::AuthFailure(failure.to_string()));
            }

            self.transition(ConnectionState::Reconnecting);
            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
            if self.policy.exhausted(attempt) {
                return self.escalate(ExitReason::ReconnectLimit {
                    attempts: self.policy.max_attempts,
                });
            }

            let delay = self.policy.delay(attempt);
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Stream connection lost, reconnecting"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return self.finish_shutdown(),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_watchdog(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.watchdog.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            // 의도된 종료 중에는 정지 판정을 하지 않음
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.state() {
                ConnectionState::FatalError => return,
                ConnectionState::Connected => {}
                _ => continue,
            }

            let idle = self.sinks.liveness.idle();
            if idle <= self.watchdog.timeout {
                continue;
            }

            if self.watchdog.fail_fast {
                error!(
                    idle_secs = idle.as_secs(),
                    timeout_secs = self.watchdog.timeout.as_secs(),
                    "No data received, failing fast"
                );
                self.escalate(ExitReason::WatchdogStale);
                self.stale.notify_waiters();
                return;
            }

            warn!(
                idle_secs = idle.as_secs(),
                timeout_secs = self.watchdog.timeout.as_secs(),
                "No data received, forcing reconnect"
            );
            self.stale.notify_waiters();
            self.sinks.liveness.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(FatalError));
        assert!(Connected.can_transition_to(FatalError));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!FatalError.can_transition_to(Connecting));
        assert!(!FatalError.can_transition_to(Disconnected));
    }

    #[test]
    fn test_exit_reason_failure() {
        assert!(!ExitReason::Shutdown.is_failure());
        assert!(ExitReason::WatchdogStale.is_failure());
        assert!(ExitReason::ReconnectLimit { attempts: 3 }.is_failure());
        assert_eq!(
            ExitReason::ReconnectLimit { attempts: 3 }.to_string(),
            "reconnect limit reached after 3 attempts"
        );
    }
}
