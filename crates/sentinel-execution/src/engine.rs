//! 트레이딩 엔진.
//!
//! 구성요소를 조립하고 수명주기를 관리합니다.
//!
//! - `initialize`: 거래소 설정 확인, 캔들 백필, 기동 정합
//! - `start`: 연결 슈퍼바이저와 디스패처 태스크 시작
//! - `stop`: 종료 신호 (여러 번 호출해도 안전, 시그널 핸들러에서 호출 가능)
//! - `join`: 두 태스크 종료를 기다려 종료 사유 반환
//!
//! 모든 원격 호출과 재연결 대기는 하나의 종료 토큰을 공유합니다.

use std::fmt;
use std::sync::Arc;

use sentinel_core::{AppConfig, CandleWindow, MarginType, SignalSource, SymbolFilters, Timeframe};
use sentinel_exchange::{
    stream_channels, ApiGateway, CallOutcome, ConnectionState, ConnectionSupervisor, ExitReason,
    FuturesApi, RateLimiter, ReconnectPolicy, RetryPolicy, StreamConnector, SupervisorHandle,
    WatchdogConfig,
};
use sentinel_risk::{PositionSizer, RiskConfig, TradePlanner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerSnapshot, PositionLedger};
use crate::notification::{NotificationEvent, Notifier};
use crate::order_engine::OrderEngine;

/// 초기화 후 외부에 제공하는 핸들.
#[derive(Clone)]
pub struct EngineHandles {
    /// 원장 사본 (읽기 전용)
    pub ledger: watch::Receiver<LedgerSnapshot>,
    /// 종료 토큰. `cancel()`은 `TradingEngine::stop()`과 같습니다.
    pub shutdown: CancellationToken,
}

/// 엔진 종료 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    /// 요청에 의한 정상 종료
    Stopped,
    /// 연결 수명주기가 치명적 상태로 끝남
    ConnectionFailed(ExitReason),
    /// 치명적 거래소/설정 에러
    Fatal(String),
}

impl EngineExit {
    pub fn is_failure(&self) -> bool {
        !matches!(self, EngineExit::Stopped)
    }
}

impl fmt::Display for EngineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineExit::Stopped => write!(f, "stopped"),
            EngineExit::ConnectionFailed(reason) => write!(f, "connection failed: {reason}"),
            EngineExit::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

struct RunningTasks {
    supervisor: Arc<ConnectionSupervisor>,
    supervisor_handle: SupervisorHandle,
    dispatcher: JoinHandle<EngineResult<()>>,
}

enum Phase {
    Created,
    Initialized(Box<EventDispatcher>),
    Running(Box<RunningTasks>),
    Finished,
}

/// 트레이딩 엔진.
pub struct TradingEngine {
    config: AppConfig,
    api: Arc<dyn FuturesApi>,
    gateway: Arc<ApiGateway>,
    signal: Arc<dyn SignalSource>,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
    phase: Phase,
}

impl TradingEngine {
    /// 게이트웨이와 rate limiter를 만들어 엔진을 생성합니다.
    pub fn new(
        config: AppConfig,
        api: Arc<dyn FuturesApi>,
        signal: Arc<dyn SignalSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let limiter = Arc::new(RateLimiter::from_config(&config.gateway));
        let gateway = Arc::new(ApiGateway::new(
            limiter,
            RetryPolicy::from_config(&config.gateway),
            shutdown.clone(),
        ));

        Self {
            config,
            api,
            gateway,
            signal,
            notifier,
            shutdown,
            phase: Phase::Created,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn FuturesApi> {
        &self.api
    }

    /// 스트림 커넥터도 같은 게이트웨이를 써야 합니다.
    pub fn gateway(&self) -> &Arc<ApiGateway> {
        &self.gateway
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 연결 상태 구독 (`start` 이후).
    pub fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        match &self.phase {
            Phase::Running(tasks) => Some(tasks.supervisor.subscribe()),
            _ => None,
        }
    }

    // ==================== 초기화 ====================

    /// 거래소 상태를 확인하고 로컬 상태를 만듭니다.
    ///
    /// 순서: 서버 시간 → 심볼 필터 → 헤지 모드 → 마진 타입 → 레버리지 →
    /// 캔들 백필 → 정합.
    pub async fn initialize(
        &mut self,
        symbol: &str,
        leverage: u32,
        interval: Timeframe,
    ) -> EngineResult<EngineHandles> {
        if !matches!(self.phase, Phase::Created) {
            return Err(EngineError::AlreadyStarted);
        }

        let symbol = symbol.to_uppercase();
        self.config.trading.symbol = symbol.clone();
        self.config.trading.leverage = leverage;
        self.config.trading.interval = interval;

        let risk = RiskConfig::from(&self.config.trading);
        risk.validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        info!(%symbol, leverage, interval = %interval.to_binance_interval(), "Initializing trading engine");

        self.sync_server_time().await?;
        let filters = self.load_filters(&symbol).await?;
        self.ensure_hedge_mode().await?;
        self.ensure_margin_type(&symbol, self.config.trading.margin_type)
            .await?;
        let applied_leverage = self.apply_leverage(&symbol, leverage).await?;
        let candles = self.backfill(&symbol, interval).await?;

        let mut ledger = PositionLedger::new(
            &symbol,
            &self.config.trading.margin_asset,
            filters.price_precision,
        );
        ledger.set_leverage(applied_leverage);

        let sizer = PositionSizer::new(risk.clone().with_leverage(applied_leverage));
        let orders = OrderEngine::new(self.api.clone(), self.gateway.clone(), filters, sizer);
        orders.reconcile(&mut ledger).await?;

        let dispatcher = EventDispatcher::new(
            ledger,
            orders,
            TradePlanner::new(risk),
            self.signal.clone(),
            self.notifier.clone(),
            candles,
            self.config.dispatcher.clone(),
        );
        let handles = EngineHandles {
            ledger: dispatcher.subscribe(),
            shutdown: self.shutdown.clone(),
        };
        self.phase = Phase::Initialized(Box::new(dispatcher));

        info!(%symbol, "Trading engine initialized");
        Ok(handles)
    }

    async fn sync_server_time(&self) -> EngineResult<()> {
        let api = self.api.as_ref();
        match self.gateway.call("server_time", move || api.server_time()).await? {
            CallOutcome::Success(_) => Ok(()),
            CallOutcome::NoOpSuccess { error, .. } | CallOutcome::NoOpFailure(error) => {
                warn!(error = %error, "Server time sync skipped");
                Ok(())
            }
        }
    }

    async fn load_filters(&self, symbol: &str) -> EngineResult<SymbolFilters> {
        let api = self.api.as_ref();
        match self
            .gateway
            .call("exchange_info", move || api.exchange_info(symbol))
            .await?
        {
            CallOutcome::Success(filters) => {
                info!(
                    %symbol,
                    tick_size = %filters.tick_size,
                    step_size = %filters.step_size,
                    min_qty = %filters.min_qty,
                    min_notional = %filters.min_notional,
                    "Symbol filters loaded"
                );
                Ok(filters)
            }
            CallOutcome::NoOpSuccess { error, .. } | CallOutcome::NoOpFailure(error) => {
                Err(EngineError::Config(format!("exchange info for {symbol}: {error}")))
            }
        }
    }

    async fn ensure_hedge_mode(&self) -> EngineResult<()> {
        let api = self.api.as_ref();
        match self
            .gateway
            .call("set_position_mode", move || api.set_position_mode(true))
            .await?
        {
            CallOutcome::Success(()) => info!("Hedge position mode enabled"),
            CallOutcome::NoOpSuccess { class, error } => {
                info!(?class, error = %error, "Hedge position mode unchanged");
            }
            CallOutcome::NoOpFailure(error) => {
                warn!(error = %error, "Hedge position mode could not be set");
            }
        }
        Ok(())
    }

    async fn ensure_margin_type(&self, symbol: &str, margin_type: MarginType) -> EngineResult<()> {
        let api = self.api.as_ref();
        match self
            .gateway
            .call("set_margin_type", move || api.set_margin_type(symbol, margin_type))
            .await?
        {
            CallOutcome::Success(()) => info!(%margin_type, "Margin type set"),
            CallOutcome::NoOpSuccess { class, error } => {
                info!(%margin_type, ?class, error = %error, "Margin type unchanged");
            }
            CallOutcome::NoOpFailure(error) => {
                warn!(%margin_type, error = %error, "Margin type could not be set");
            }
        }
        Ok(())
    }

    async fn apply_leverage(&self, symbol: &str, leverage: u32) -> EngineResult<u32> {
        let api = self.api.as_ref();
        match self
            .gateway
            .call("set_leverage", move || api.set_leverage(symbol, leverage))
            .await?
        {
            CallOutcome::Success(applied) => {
                info!(requested = leverage, applied, "Leverage set");
                Ok(applied)
            }
            CallOutcome::NoOpSuccess { error, .. } | CallOutcome::NoOpFailure(error) => {
                warn!(leverage, error = %error, "Leverage could not be set, assuming requested value");
                Ok(leverage)
            }
        }
    }

    async fn backfill(&self, symbol: &str, interval: Timeframe) -> EngineResult<CandleWindow> {
        let capacity = self.config.trading.candle_capacity;
        let mut window = CandleWindow::new(capacity);
        let limit = capacity.min(1500) as u32;

        let api = self.api.as_ref();
        match self
            .gateway
            .call("klines", move || api.klines(symbol, interval, limit))
            .await?
        {
            CallOutcome::Success(candles) => {
                // 진행 중인 마지막 캔들 제외
                window.extend(candles.into_iter().filter(|c| c.closed));
                info!(candles = window.len(), "Candle history loaded");
            }
            CallOutcome::NoOpSuccess { error, .. } | CallOutcome::NoOpFailure(error) => {
                warn!(error = %error, "Candle backfill skipped");
            }
        }
        Ok(window)
    }

    // ==================== 실행 ====================

    /// 연결 슈퍼바이저와 디스패처를 시작합니다.
    pub fn start(&mut self, connector: Arc<dyn StreamConnector>) -> EngineResult<()> {
        let dispatcher = match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Initialized(dispatcher) => dispatcher,
            Phase::Created => {
                self.phase = Phase::Created;
                return Err(EngineError::NotInitialized);
            }
            other => {
                self.phase = other;
                return Err(EngineError::AlreadyStarted);
            }
        };

        let connection = &self.config.connection;
        let (sinks, queues) = stream_channels(connection.queue_capacity);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            connector,
            sinks,
            ReconnectPolicy::from_config(connection),
            WatchdogConfig::from_config(connection),
            self.shutdown.clone(),
        ));

        let supervisor_handle = supervisor.spawn();
        let dispatcher = tokio::spawn((*dispatcher).run(queues, self.shutdown.clone()));

        self.phase = Phase::Running(Box::new(RunningTasks {
            supervisor,
            supervisor_handle,
            dispatcher,
        }));
        info!(symbol = %self.config.trading.symbol, "Trading engine started");
        Ok(())
    }

    /// 종료를 요청합니다.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Trading engine stop requested");
        }
        self.shutdown.cancel();
    }

    /// 연결 또는 디스패처 중 하나가 끝나면 나머지를 중지시키고 결과를 반환합니다.
    pub async fn join(&mut self) -> EngineExit {
        let tasks = match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Running(tasks) => tasks,
            _ => return EngineExit::Stopped,
        };
        let RunningTasks {
            supervisor: _,
            supervisor_handle,
            mut dispatcher,
        } = *tasks;

        let supervisor_join = supervisor_handle.join();
        tokio::pin!(supervisor_join);

        let exit = tokio::select! {
            reason = &mut supervisor_join => {
                self.shutdown.cancel();
                let dispatched = flatten(dispatcher.await);
                combine(reason, dispatched)
            }
            result = &mut dispatcher => {
                self.shutdown.cancel();
                let reason = supervisor_join.await;
                combine(reason, flatten(result))
            }
        };

        if exit.is_failure() {
            error!(%exit, "Trading engine terminated");
        } else {
            info!("Trading engine stopped");
        }
        self.notifier
            .notify(NotificationEvent::EngineStopped {
                reason: exit.to_string(),
                failure: exit.is_failure(),
            })
            .await;
        exit
    }
}

fn flatten(result: Result<EngineResult<()>, tokio::task::JoinError>) -> EngineResult<()> {
    match result {
        Ok(result) => result,
        Err(e) => Err(EngineError::Config(format!("dispatcher task failed: {e}"))),
    }
}

fn combine(reason: ExitReason, dispatched: EngineResult<()>) -> EngineExit {
    match dispatched {
        Err(err) if err.is_fatal() => EngineExit::Fatal(err.to_string()),
        _ if reason.is_failure() => EngineExit::ConnectionFailed(reason),
        _ => EngineExit::Stopped,
    }
}
