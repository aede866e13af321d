//! 주문 엔진.
//!
//! 제공 기능:
//! - 리스크 한도 내 수량 계산
//! - 시장가 진입/추가 후 원장 반영
//! - 손절/익절 주문 취소 후 재생성 (동일 종류 동시 2개 금지)
//! - 제출 결과를 알 수 없을 때 거래소 상태로 검증
//!
//! 모든 원격 호출은 `ApiGateway`를 거칩니다. 원장은 호출자(디스패처 루프)가
//! `&mut`로 넘겨주며, 엔진은 자체 상태를 갖지 않습니다.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use sentinel_core::{
    Balance, MarketOrderRequest, OpenOrder, PositionSide, PositionSnapshot, Price,
    ProtectiveKind, ProtectiveOrder, ProtectiveOrderRequest, Quantity, SymbolFilters,
};
use sentinel_exchange::{ApiGateway, ApiReply, CallOutcome, ExchangeError, FuturesApi, GatewayError};
use sentinel_risk::{quantize_protective_price, PositionSizer, SizingContext, SizingDecision};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{Holding, PositionLedger};

/// 진입 시도 결과.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    /// 포지션이 열림. `verified`는 응답 대신 거래소 조회로 확인했는지 여부.
    Opened { holding: Holding, verified: bool },
    /// 포지션은 없지만 미체결 주문이 남아 있음
    Pending { orders: usize },
    /// 거래소가 주문을 거절함
    Rejected(ExchangeError),
    /// 체결되지 않음이 확인됨. 다음 시그널에서 다시 시도할 수 있습니다.
    NotOpened,
    /// 결과도 검증도 실패함. 전체 정합이 필요합니다.
    Unverified,
}

impl OpenOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, OpenOutcome::Opened { .. })
    }

    /// 원장이 거래소와 어긋났을 수 있는지 여부.
    pub fn needs_resync(&self) -> bool {
        matches!(self, OpenOutcome::Pending { .. } | OpenOutcome::Unverified)
    }
}

/// 거래소 상태 검증 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// 해당 방향 포지션이 있음 (부분 체결 포함)
    PositionOpen(Holding),
    /// 포지션은 없고 미체결 진입 주문이 있음
    OrdersPending(usize),
    /// 둘 다 없음
    Nothing,
}

/// 주문 엔진.
pub struct OrderEngine {
    api: Arc<dyn FuturesApi>,
    gateway: Arc<ApiGateway>,
    symbol: String,
    filters: SymbolFilters,
    sizer: PositionSizer,
}

impl OrderEngine {
    pub fn new(
        api: Arc<dyn FuturesApi>,
        gateway: Arc<ApiGateway>,
        filters: SymbolFilters,
        sizer: PositionSizer,
    ) -> Self {
        Self {
            api,
            gateway,
            symbol: filters.symbol.clone(),
            filters,
            sizer,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn filters(&self) -> &SymbolFilters {
        &self.filters
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn set_leverage(&mut self, leverage: u32) {
        self.sizer.set_leverage(leverage);
    }

    // ==================== 수량 계산 ====================

    /// 원장의 지갑 잔고와 기존 포지션으로 진입 수량을 계산합니다.
    pub fn size_position(
        &self,
        ledger: &PositionLedger,
        side: PositionSide,
        entry_price: Price,
        stop_loss_price: Price,
    ) -> SizingDecision {
        let ctx = SizingContext {
            balance: ledger.balance().total,
            existing_notional: ledger
                .holding(side)
                .map(Holding::notional)
                .unwrap_or(Decimal::ZERO),
            filters: &self.filters,
        };
        self.sizer.size_position(side, entry_price, stop_loss_price, &ctx)
    }

    // ==================== 진입 ====================

    /// 시장가로 진입하거나 기존 포지션에 추가하고 보호 주문을 맞춥니다.
    ///
    /// 재시도가 소진되어 결과를 알 수 없으면 실패로 단정하지 않고 거래소
    /// 포지션과 미체결 주문을 조회해 판단합니다.
    pub async fn open_or_add(
        &self,
        ledger: &mut PositionLedger,
        side: PositionSide,
        quantity: Quantity,
        price: Price,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    ) -> EngineResult<OpenOutcome> {
        let client_order_id = new_client_order_id();
        let request = MarketOrderRequest::open(&self.symbol, side, quantity, &client_order_id);
        info!(
            symbol = %self.symbol,
            %side,
            %quantity,
            %price,
            %client_order_id,
            "Submitting market order"
        );

        let api = self.api.as_ref();
        let req = &request;
        let outcome = match self
            .gateway
            .call("place_market_order", move || api.place_market_order(req))
            .await
        {
            Ok(CallOutcome::Success(ack)) => {
                if ack.status.is_final() && !ack.status.has_fill() {
                    warn!(%side, status = ?ack.status, order_id = %ack.order_id, "Market order ended without fill");
                    return Ok(OpenOutcome::NotOpened);
                }
                // ACK 응답은 체결 수량 없이 올 수 있음
                let filled = if ack.executed_qty > Decimal::ZERO {
                    ack.executed_qty
                } else {
                    quantity
                };
                match ledger.apply_fill(side, filled, ack.fill_price_or(price)) {
                    Some(holding) => OpenOutcome::Opened {
                        holding,
                        verified: false,
                    },
                    None => OpenOutcome::NotOpened,
                }
            }
            // 같은 클라이언트 ID가 이미 접수됨: 앞선 시도가 체결되었을 수 있음
            Ok(CallOutcome::NoOpSuccess { error, .. }) => {
                warn!(
                    %side,
                    %client_order_id,
                    error = %error,
                    "Market order already accepted on an earlier attempt, verifying against exchange"
                );
                self.resolve_uncertain_open(ledger, side, &client_order_id).await?
            }
            Ok(CallOutcome::NoOpFailure(error)) => {
                warn!(%side, %quantity, error = %error, "Market order rejected, skipping signal");
                return Ok(OpenOutcome::Rejected(error));
            }
            Err(err @ GatewayError::RetriesExhausted { .. }) => {
                warn!(
                    %side,
                    %client_order_id,
                    error = %err,
                    "Market order outcome unknown, verifying against exchange"
                );
                self.resolve_uncertain_open(ledger, side, &client_order_id).await?
            }
            Err(err) => return Err(err.into()),
        };

        if outcome.is_opened() {
            self.place_protection(ledger, side, stop_loss, take_profit).await?;
        }
        Ok(outcome)
    }

    async fn resolve_uncertain_open(
        &self,
        ledger: &mut PositionLedger,
        side: PositionSide,
        client_order_id: &str,
    ) -> EngineResult<OpenOutcome> {
        match self.verify_side(ledger, side, Some(client_order_id)).await {
            Ok(Verification::PositionOpen(holding)) => {
                info!(%side, amount = %holding.amount, "Verification found open position, adopting exchange amount");
                Ok(OpenOutcome::Opened {
                    holding,
                    verified: true,
                })
            }
            Ok(Verification::OrdersPending(orders)) => {
                warn!(%side, orders, "Verification found pending entry orders");
                Ok(OpenOutcome::Pending { orders })
            }
            Ok(Verification::Nothing) => {
                info!(%side, %client_order_id, "Verification found nothing, order not placed");
                Ok(OpenOutcome::NotOpened)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                error!(%side, error = %err, "Verification failed, ledger state unknown");
                Ok(OpenOutcome::Unverified)
            }
        }
    }

    /// 한 방향의 거래소 상태를 조회해 원장에 반영합니다.
    ///
    /// 포지션이 있으면 거래소 수량을 그대로 채택합니다 (부분 체결 포함).
    /// 거래소에서 해당 방향이 비어 있으면 원장도 비우고 남은 보호 주문을
    /// 취소합니다. 기동 시 정합과 같은 조회 경로를 사용합니다.
    pub async fn verify_side(
        &self,
        ledger: &mut PositionLedger,
        side: PositionSide,
        client_order_id: Option<&str>,
    ) -> EngineResult<Verification> {
        let positions = self.fetch_positions().await?;
        if let Some(snapshot) = positions
            .iter()
            .find(|p| p.position_side == side && p.is_open())
        {
            ledger.apply_snapshot(snapshot);
            if let Some(holding) = ledger.holding(side) {
                return Ok(Verification::PositionOpen(*holding));
            }
        } else {
            let cleared = ledger.reset_side(side);
            if !cleared.is_empty() {
                let cancelled = self.cancel_all(&cleared).await?;
                info!(%side, cleared = cleared.len(), cancelled, "Side flat on exchange, protective orders cancelled");
            }
        }

        let orders = self.fetch_open_orders().await?;
        let pending = orders
            .iter()
            .filter(|o| is_pending_entry(o, side, client_order_id))
            .count();
        if pending > 0 {
            return Ok(Verification::OrdersPending(pending));
        }
        Ok(Verification::Nothing)
    }

    // ==================== 보호 주문 ====================

    /// 손절/익절을 현재 진입가 기준으로 다시 겁니다.
    ///
    /// 손절은 진입가보다 엄격히 불리한 쪽, 익절은 엄격히 유리한 쪽일 때만
    /// 교체합니다.
    pub async fn place_protection(
        &self,
        ledger: &mut PositionLedger,
        side: PositionSide,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    ) -> EngineResult<()> {
        let Some(entry) = ledger.holding(side).map(|h| h.entry_price) else {
            return Ok(());
        };

        for (kind, price) in [
            (ProtectiveKind::StopLoss, stop_loss),
            (ProtectiveKind::TakeProfit, take_profit),
        ] {
            let Some(price) = price else {
                continue;
            };
            let Some(trigger) = quantize_protective_price(&self.filters, side, kind, entry, price) else {
                debug!(%side, %kind, %entry, %price, "Protective price on wrong side of entry, keeping current");
                continue;
            };
            self.replace_protective(ledger, side, kind, trigger).await?;
        }
        Ok(())
    }

    /// 기존 주문을 취소한 뒤 새 주문을 겁니다. 새 주문이 기록되면 true.
    pub async fn replace_protective(
        &self,
        ledger: &mut PositionLedger,
        side: PositionSide,
        kind: ProtectiveKind,
        trigger_price: Price,
    ) -> EngineResult<bool> {
        if let Some(existing) = ledger.protective(side, kind).cloned() {
            if existing.trigger_price == trigger_price {
                debug!(%side, %kind, %trigger_price, "Protective order already at price");
                return Ok(true);
            }
            if !self.cancel_protective(&existing).await? {
                warn!(
                    %side,
                    %kind,
                    order_id = %existing.order_id,
                    "Existing protective order not cancelled, skipping replacement"
                );
                return Ok(false);
            }
            ledger.clear_protective(side, kind);
        }

        let request = ProtectiveOrderRequest {
            symbol: self.symbol.clone(),
            position_side: side,
            kind,
            trigger_price,
        };
        let api = self.api.as_ref();
        let req = &request;
        match self
            .gateway
            .call("place_protective_order", move || api.place_protective_order(req))
            .await
        {
            Ok(CallOutcome::Success(order)) => {
                info!(%side, %kind, %trigger_price, order_id = %order.order_id, "Protective order placed");
                ledger.set_protective(order);
                Ok(true)
            }
            Ok(CallOutcome::NoOpSuccess { error, .. }) | Ok(CallOutcome::NoOpFailure(error)) => {
                warn!(%side, %kind, %trigger_price, error = %error, "Protective order not placed");
                Ok(false)
            }
            Err(err @ GatewayError::RetriesExhausted { .. }) => {
                warn!(%side, %kind, error = %err, "Protective order outcome unknown, checking live orders");
                self.adopt_live_protective(ledger, side, kind).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// 거래소에 걸린 최신 보호 주문을 원장에 채택합니다.
    async fn adopt_live_protective(
        &self,
        ledger: &mut PositionLedger,
        side: PositionSide,
        kind: ProtectiveKind,
    ) -> EngineResult<bool> {
        let live = match self.fetch_protective_orders().await {
            Ok(live) => live,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(%side, %kind, error = %err, "Live protective lookup failed");
                return Ok(false);
            }
        };

        let latest = live
            .into_iter()
            .filter(|o| o.position_side == side && o.kind == kind)
            .max_by_key(|o| o.created_at);
        match latest {
            Some(order) => {
                info!(%side, %kind, order_id = %order.order_id, "Adopted live protective order");
                ledger.set_protective(order);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 보호 주문을 취소합니다. 이미 없는 주문도 성공으로 봅니다.
    ///
    /// 원장은 건드리지 않습니다. 취소되었거나 이미 없으면 true.
    pub async fn cancel_protective(&self, order: &ProtectiveOrder) -> EngineResult<bool> {
        let api = self.api.as_ref();
        let symbol = order.symbol.as_str();
        let order_id = order.order_id.as_str();
        match self
            .gateway
            .call("cancel_protective_order", move || {
                api.cancel_protective_order(symbol, order_id)
            })
            .await
        {
            Ok(CallOutcome::Success(())) => {
                info!(side = %order.position_side, kind = %order.kind, %order_id, "Protective order cancelled");
                Ok(true)
            }
            Ok(CallOutcome::NoOpSuccess { error, .. }) => {
                debug!(%order_id, error = %error, "Protective order already gone");
                Ok(true)
            }
            Ok(CallOutcome::NoOpFailure(error)) => {
                warn!(%order_id, error = %error, "Protective order cancel rejected");
                Ok(false)
            }
            Err(err @ GatewayError::RetriesExhausted { .. }) => {
                warn!(%order_id, error = %err, "Protective order cancel outcome unknown");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// 여러 주문을 취소합니다. 취소(또는 이미 없음)된 수를 반환합니다.
    pub async fn cancel_all(&self, orders: &[ProtectiveOrder]) -> EngineResult<usize> {
        let mut cancelled = 0;
        for order in orders {
            if self.cancel_protective(order).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    // ==================== 조회 ====================

    pub async fn fetch_positions(&self) -> EngineResult<Vec<PositionSnapshot>> {
        let api = self.api.as_ref();
        let symbol = self.symbol.as_str();
        self.query("positions", move || api.positions(symbol)).await
    }

    pub async fn fetch_protective_orders(&self) -> EngineResult<Vec<ProtectiveOrder>> {
        let api = self.api.as_ref();
        let symbol = self.symbol.as_str();
        self.query("open_protective_orders", move || api.open_protective_orders(symbol))
            .await
    }

    pub async fn fetch_open_orders(&self) -> EngineResult<Vec<OpenOrder>> {
        let api = self.api.as_ref();
        let symbol = self.symbol.as_str();
        self.query("open_orders", move || api.open_orders(symbol)).await
    }

    pub async fn fetch_balance(&self, asset: &str) -> EngineResult<Balance> {
        let api = self.api.as_ref();
        self.query("balance", move || api.balance(asset)).await
    }

    /// 조회 호출. NoOp 결과는 거절로 봅니다.
    async fn query<T, F, Fut>(&self, operation: &str, f: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiReply<T>>,
    {
        match self.gateway.call(operation, f).await? {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::NoOpSuccess { error, .. } | CallOutcome::NoOpFailure(error) => {
                Err(EngineError::rejected(operation, error))
            }
        }
    }
}

/// 거래소 클라이언트 주문 ID (최대 36자).
fn new_client_order_id() -> String {
    format!("snt-{}", Uuid::new_v4().simple())
}

fn is_pending_entry(order: &OpenOrder, side: PositionSide, client_order_id: Option<&str>) -> bool {
    if order.status.is_final() {
        return false;
    }
    if client_order_id.is_some_and(|id| order.client_order_id == id) {
        return true;
    }
    order.position_side == Some(side) && order.side == side.entry_order_side()
}
