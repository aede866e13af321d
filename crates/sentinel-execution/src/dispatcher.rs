//! 이벤트 디스패처.
//!
//! 시장 데이터 큐와 계정 이벤트 큐를 번갈아 소비하는 단일 루프입니다.
//! 원장 변경은 이 루프 안에서만 일어납니다.
//!
//! 한 바퀴:
//! 1. 시장 큐를 짧은 타임아웃으로 폴링, 최대 1건 처리
//! 2. 계정 큐를 같은 방식으로 폴링, 최대 1건 처리
//! 3. 주기 작업 (큐 유실 시 전체 정합, 포지션 동기화, 잔고 갱신)
//! 4. yield

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentinel_core::{CandleWindow, DispatcherConfig, PositionSide, Price, SignalCandidate, SignalSource};
use sentinel_exchange::{MarketEvent, StreamQueues, UserDataEvent};
use sentinel_risk::TradePlanner;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerSnapshot, PositionLedger};
use crate::notification::{NotificationEvent, Notifier};
use crate::order_engine::{OpenOutcome, OrderEngine};

/// 정합 실패 후 재시도 간격.
const RESYNC_RETRY: Duration = Duration::from_secs(5);

/// 이벤트 디스패처.
pub struct EventDispatcher {
    ledger: PositionLedger,
    orders: OrderEngine,
    planner: TradePlanner,
    signal: Arc<dyn SignalSource>,
    notifier: Arc<dyn Notifier>,
    candles: CandleWindow,
    config: DispatcherConfig,
    snapshot_tx: watch::Sender<LedgerSnapshot>,
    /// 마지막으로 시그널을 평가한 캔들 시작 시각
    last_evaluated: Option<DateTime<Utc>>,
    needs_resync: bool,
}

impl EventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: PositionLedger,
        orders: OrderEngine,
        planner: TradePlanner,
        signal: Arc<dyn SignalSource>,
        notifier: Arc<dyn Notifier>,
        candles: CandleWindow,
        config: DispatcherConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(ledger.snapshot());
        Self {
            ledger,
            orders,
            planner,
            signal,
            notifier,
            candles,
            config,
            snapshot_tx,
            last_evaluated: None,
            needs_resync: false,
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn candles(&self) -> &CandleWindow {
        &self.candles
    }

    /// 원장 사본 구독.
    pub fn subscribe(&self) -> watch::Receiver<LedgerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// 전체 정합이 예약되어 있는지 여부.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    // ==================== 루프 ====================

    /// 종료 신호나 큐 닫힘까지 이벤트를 처리합니다.
    ///
    /// 치명적 에러만 반환하며, 나머지 에러는 기록 후 계속 진행합니다.
    pub async fn run(mut self, mut queues: StreamQueues, shutdown: CancellationToken) -> EngineResult<()> {
        let poll = self.config.poll_timeout();
        let mut next_sync = Instant::now() + self.config.sync_interval();
        let mut next_balance = Instant::now() + self.config.balance_refresh_interval();
        let mut next_resync = Instant::now();

        info!(symbol = %self.orders.symbol(), "Event dispatcher started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match timeout(poll, queues.market_rx.recv()).await {
                Ok(Some(event)) => {
                    let result = self.handle_market(event).await;
                    self.absorb(result)?;
                }
                Ok(None) => {
                    info!("Market queue closed");
                    break;
                }
                Err(_) => {}
            }

            match timeout(poll, queues.account_rx.recv()).await {
                Ok(Some(event)) => {
                    let result = self.handle_account(event).await;
                    self.absorb(result)?;
                }
                Ok(None) => {
                    info!("Account queue closed");
                    break;
                }
                Err(_) => {}
            }

            // ==================== 주기 작업 ====================

            if queues.take_resync() {
                warn!("Events were dropped, scheduling full reconciliation");
                self.needs_resync = true;
            }

            let now = Instant::now();
            if self.needs_resync && now >= next_resync {
                let result = self.resync().await;
                if self.absorb(result)? {
                    next_sync = now + self.config.sync_interval();
                } else {
                    next_resync = now + RESYNC_RETRY;
                }
            } else if now >= next_sync {
                let result = self.sync_positions().await;
                self.absorb(result)?;
                next_sync = now + self.config.sync_interval();
            }

            if now >= next_balance {
                let result = self.orders.refresh_balance(&mut self.ledger).await;
                self.absorb(result)?;
                self.publish();
                next_balance = now + self.config.balance_refresh_interval();
            }

            tokio::task::yield_now().await;
        }

        info!("Event dispatcher stopped");
        Ok(())
    }

    /// 처리 결과를 정리합니다. 성공이면 true, 치명적 에러면 Err.
    fn absorb(&self, result: EngineResult<()>) -> EngineResult<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_fatal() => {
                error!(error = %err, "Fatal error in event dispatcher");
                Err(err)
            }
            Err(EngineError::Shutdown) => Ok(false),
            Err(err) => {
                warn!(error = %err, "Event handling failed, continuing");
                Ok(false)
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.ledger.snapshot());
    }

    // ==================== 시장 데이터 ====================

    /// 캔들 이벤트 처리. 마감 캔들만 시그널을 다시 계산합니다.
    pub async fn handle_market(&mut self, event: MarketEvent) -> EngineResult<()> {
        let MarketEvent::Kline { symbol, candle } = event;
        if symbol != self.orders.symbol() || !candle.closed {
            return Ok(());
        }

        let open_time = candle.open_time;
        if !self.candles.push(candle) {
            debug!(%open_time, "Stale candle ignored");
            return Ok(());
        }
        if self.last_evaluated.is_some_and(|t| t >= open_time) {
            return Ok(());
        }
        self.last_evaluated = Some(open_time);

        self.evaluate_signals().await
    }

    async fn evaluate_signals(&mut self) -> EngineResult<()> {
        let (Some(last_index), Some(reference)) = (self.candles.last_index(), self.candles.last_close())
        else {
            return Ok(());
        };

        let candidates = self.signal.analyze(self.candles.as_slice());
        for side in PositionSide::BOTH {
            if let Some(candidate) = candidates.at_bar(side, last_index).copied() {
                self.act_on_candidate(side, candidate, reference).await?;
            }
        }
        Ok(())
    }

    async fn act_on_candidate(
        &mut self,
        side: PositionSide,
        candidate: SignalCandidate,
        reference: Price,
    ) -> EngineResult<()> {
        let Some(plan) = self
            .planner
            .plan(side, &candidate, reference, self.orders.filters())
        else {
            return Ok(());
        };

        let decision = self
            .orders
            .size_position(&self.ledger, side, plan.entry_price, plan.stop_loss);
        if let Some(reason) = decision.rejection {
            info!(%side, %reason, entry = %plan.entry_price, stop = %plan.stop_loss, "Signal skipped by sizing");
            return Ok(());
        }

        info!(
            %side,
            quantity = %decision.quantity,
            entry = %plan.entry_price,
            stop_loss = %plan.stop_loss,
            take_profit = %plan.take_profit,
            capped = decision.capped,
            "Acting on signal"
        );

        let outcome = self
            .orders
            .open_or_add(
                &mut self.ledger,
                side,
                decision.quantity,
                plan.entry_price,
                Some(plan.stop_loss),
                Some(plan.take_profit),
            )
            .await?;

        if outcome.needs_resync() {
            self.needs_resync = true;
        }
        if let OpenOutcome::Opened { holding, .. } = outcome {
            let state = self.ledger.side(side);
            self.notifier
                .notify(NotificationEvent::PositionOpened {
                    symbol: self.orders.symbol().to_string(),
                    side,
                    quantity: decision.quantity,
                    entry_price: holding.entry_price,
                    stop_loss: state.stop_loss.as_ref().map(|o| o.trigger_price),
                    take_profit: state.take_profit.as_ref().map(|o| o.trigger_price),
                })
                .await;
        }
        self.publish();
        Ok(())
    }

    // ==================== 계정 이벤트 ====================

    /// 계정 이벤트 처리.
    pub async fn handle_account(&mut self, event: UserDataEvent) -> EngineResult<()> {
        let symbol = self.orders.symbol().to_string();

        match event {
            UserDataEvent::AccountUpdate(update) => {
                let asset = self.ledger.balance().asset.clone();
                if let Some(balance) = update.balance_for(&asset) {
                    self.ledger.set_balance(balance);
                }
                for snapshot in update.positions_for(&symbol) {
                    let cleared = self.ledger.apply_snapshot(&snapshot);
                    if !cleared.is_empty() {
                        // 발동되지 않은 쪽 보호 주문 정리
                        self.orders.cancel_all(&cleared).await?;
                    }
                }
                debug!(reason = %update.data.reason, "Account update applied");
            }
            UserDataEvent::OrderTradeUpdate(update) => {
                let order = &update.order;
                if order.symbol != symbol {
                    return Ok(());
                }
                debug!(
                    order_id = order.order_id,
                    status = ?order.status,
                    execution = %order.execution_type,
                    filled = %order.cumulative_filled_qty,
                    "Order update"
                );
                if order.is_trade() && !order.realized_profit.is_zero() {
                    let timestamp =
                        DateTime::<Utc>::from_timestamp_millis(update.event_time).unwrap_or_else(Utc::now);
                    self.notifier
                        .notify(NotificationEvent::RealizedPnl {
                            symbol: symbol.clone(),
                            side: order.position_side(),
                            quantity: order.last_filled_qty,
                            price: order.last_filled_price,
                            pnl: order.realized_profit,
                            timestamp,
                        })
                        .await;
                }
            }
            UserDataEvent::AlgoUpdate(update) => {
                let order = &update.order;
                if order.symbol != symbol || !order.is_terminal() {
                    return Ok(());
                }
                if let Some(cleared) = self.ledger.clear_protective_by_id(&order.order_id()) {
                    info!(
                        side = %cleared.position_side,
                        kind = %cleared.kind,
                        order_id = %cleared.order_id,
                        status = %order.status,
                        "Protective order closed"
                    );
                }
            }
            UserDataEvent::AccountConfigUpdate(update) => {
                if let Some(config) = update.leverage_config.filter(|c| c.symbol == symbol) {
                    info!(leverage = config.leverage, "Leverage changed");
                    self.ledger.set_leverage(config.leverage);
                    self.orders.set_leverage(config.leverage);
                }
            }
            other @ (UserDataEvent::ListenKeyExpired { .. } | UserDataEvent::Unknown) => {
                debug!(kind = other.kind(), "Account event ignored");
            }
        }

        self.publish();
        Ok(())
    }

    // ==================== 정합 ====================

    async fn resync(&mut self) -> EngineResult<()> {
        self.orders.reconcile(&mut self.ledger).await?;
        self.needs_resync = false;
        self.publish();
        Ok(())
    }

    async fn sync_positions(&mut self) -> EngineResult<()> {
        let cleared = self.orders.sync_positions(&mut self.ledger).await?;
        if !cleared.is_empty() {
            self.orders.cancel_all(&cleared).await?;
        }
        self.publish();
        Ok(())
    }
}
