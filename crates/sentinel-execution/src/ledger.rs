//! 포지션 원장.
//!
//! 방향(LONG/SHORT)별 보유 수량, 평균 진입가, 손절/익절 주문을 로컬에
//! 보관합니다. 변경은 디스패처 루프와 그 루프가 호출하는 `OrderEngine`에서만
//! 일어나므로 내부에 잠금이 없습니다. 다른 구성요소는 `LedgerSnapshot`을
//! 읽기 전용으로 받습니다.
//!
//! 불변 조건:
//! - 수량과 진입가는 `Holding`으로 함께 있거나 함께 없습니다
//! - 방향/종류별 보호 주문은 최대 1개입니다

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sentinel_core::{
    Balance, DecimalExt, PositionSide, PositionSnapshot, Price, ProtectiveKind, ProtectiveOrder,
    Quantity,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 보유 포지션 (수량 > 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub amount: Quantity,
    /// 수량 가중 평균 진입가
    pub entry_price: Price,
}

impl Holding {
    /// 진입가 기준 명목 가치.
    pub fn notional(&self) -> Decimal {
        self.amount * self.entry_price
    }
}

/// 한 방향의 상태.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideState {
    pub holding: Option<Holding>,
    pub stop_loss: Option<ProtectiveOrder>,
    pub take_profit: Option<ProtectiveOrder>,
}

impl SideState {
    pub fn is_open(&self) -> bool {
        self.holding.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.holding.is_none() && self.stop_loss.is_none() && self.take_profit.is_none()
    }

    pub fn protective(&self, kind: ProtectiveKind) -> Option<&ProtectiveOrder> {
        match kind {
            ProtectiveKind::StopLoss => self.stop_loss.as_ref(),
            ProtectiveKind::TakeProfit => self.take_profit.as_ref(),
        }
    }

    fn protective_slot(&mut self, kind: ProtectiveKind) -> &mut Option<ProtectiveOrder> {
        match kind {
            ProtectiveKind::StopLoss => &mut self.stop_loss,
            ProtectiveKind::TakeProfit => &mut self.take_profit,
        }
    }

    /// 상태를 비우고 추적 중이던 보호 주문을 반환합니다.
    fn reset(&mut self) -> Vec<ProtectiveOrder> {
        self.holding = None;
        self.stop_loss
            .take()
            .into_iter()
            .chain(self.take_profit.take())
            .collect()
    }
}

/// 원장의 읽기 전용 사본.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub symbol: String,
    pub long: SideState,
    pub short: SideState,
    pub balance: Balance,
    pub leverage: u32,
    pub updated_at: DateTime<Utc>,
}

impl LedgerSnapshot {
    pub fn side(&self, side: PositionSide) -> &SideState {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }
}

/// 포지션 원장.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    symbol: String,
    long: SideState,
    short: SideState,
    balance: Balance,
    leverage: u32,
    /// 평균 진입가 반올림 자릿수
    price_precision: u32,
    updated_at: DateTime<Utc>,
}

impl PositionLedger {
    /// 빈 원장을 생성합니다.
    pub fn new(symbol: impl Into<String>, margin_asset: &str, price_precision: u32) -> Self {
        Self {
            symbol: symbol.into(),
            long: SideState::default(),
            short: SideState::default(),
            balance: Balance::empty(margin_asset),
            leverage: 1,
            price_precision,
            updated_at: Utc::now(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn set_price_precision(&mut self, precision: u32) {
        self.price_precision = precision;
    }

    // ==================== 조회 ====================

    pub fn side(&self, side: PositionSide) -> &SideState {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }

    fn side_mut(&mut self, side: PositionSide) -> &mut SideState {
        self.updated_at = Utc::now();
        match side {
            PositionSide::Long => &mut self.long,
            PositionSide::Short => &mut self.short,
        }
    }

    pub fn holding(&self, side: PositionSide) -> Option<&Holding> {
        self.side(side).holding.as_ref()
    }

    pub fn is_open(&self, side: PositionSide) -> bool {
        self.side(side).is_open()
    }

    pub fn protective(&self, side: PositionSide, kind: ProtectiveKind) -> Option<&ProtectiveOrder> {
        self.side(side).protective(kind)
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    /// 읽기 전용 사본.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            symbol: self.symbol.clone(),
            long: self.long.clone(),
            short: self.short.clone(),
            balance: self.balance.clone(),
            leverage: self.leverage,
            updated_at: self.updated_at,
        }
    }

    // ==================== 포지션 변경 ====================

    /// 체결을 반영합니다.
    ///
    /// 포지션이 없으면 새로 만들고, 있으면 수량 가중 평균 진입가를 다시
    /// 계산합니다. 수량이 0 이하면 무시합니다.
    pub fn apply_fill(&mut self, side: PositionSide, quantity: Quantity, price: Price) -> Option<Holding> {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return self.holding(side).copied();
        }

        let precision = self.price_precision;
        let state = self.side_mut(side);
        let holding = match state.holding {
            None => Holding {
                amount: quantity,
                entry_price: price,
            },
            Some(prev) => {
                let amount = prev.amount + quantity;
                let entry_price =
                    ((prev.amount * prev.entry_price + quantity * price) / amount).round_to_precision(precision);
                Holding { amount, entry_price }
            }
        };
        state.holding = Some(holding);

        info!(
            %side,
            fill_qty = %quantity,
            fill_price = %price,
            amount = %holding.amount,
            entry_price = %holding.entry_price,
            "Position updated from fill"
        );
        Some(holding)
    }

    /// 거래소 스냅샷을 그대로 반영합니다.
    ///
    /// 수량이 0이면 그 방향을 비우고, 추적 중이던 보호 주문을 반환합니다.
    /// 호출자는 반환된 주문을 거래소에서 취소해야 합니다.
    pub fn apply_snapshot(&mut self, snapshot: &PositionSnapshot) -> Vec<ProtectiveOrder> {
        if !snapshot.is_open() {
            return self.reset_side(snapshot.position_side);
        }

        let holding = Holding {
            amount: snapshot.amount,
            entry_price: snapshot.entry_price,
        };
        let state = self.side_mut(snapshot.position_side);
        if state.holding != Some(holding) {
            debug!(
                side = %snapshot.position_side,
                amount = %holding.amount,
                entry_price = %holding.entry_price,
                "Position corrected from exchange"
            );
        }
        state.holding = Some(holding);
        Vec::new()
    }

    /// 방향을 비웁니다. 추적 중이던 보호 주문을 반환합니다.
    pub fn reset_side(&mut self, side: PositionSide) -> Vec<ProtectiveOrder> {
        if self.side(side).is_empty() {
            return Vec::new();
        }
        let cleared = self.side_mut(side).reset();
        info!(%side, cleared = cleared.len(), "Position closed, side reset");
        cleared
    }

    // ==================== 보호 주문 ====================

    /// 보호 주문을 기록합니다. 같은 종류의 이전 주문을 반환합니다.
    pub fn set_protective(&mut self, order: ProtectiveOrder) -> Option<ProtectiveOrder> {
        let side = order.position_side;
        let kind = order.kind;
        self.side_mut(side).protective_slot(kind).replace(order)
    }

    pub fn clear_protective(&mut self, side: PositionSide, kind: ProtectiveKind) -> Option<ProtectiveOrder> {
        if self.side(side).protective(kind).is_none() {
            return None;
        }
        self.side_mut(side).protective_slot(kind).take()
    }

    /// 주문 ID로 보호 주문을 찾아 지웁니다.
    pub fn clear_protective_by_id(&mut self, order_id: &str) -> Option<ProtectiveOrder> {
        for side in PositionSide::BOTH {
            for kind in ProtectiveKind::BOTH {
                if self
                    .protective(side, kind)
                    .is_some_and(|o| o.order_id == order_id)
                {
                    return self.clear_protective(side, kind);
                }
            }
        }
        None
    }

    // ==================== 계좌 ====================

    pub fn set_balance(&mut self, balance: Balance) {
        self.updated_at = Utc::now();
        self.balance = balance;
    }

    pub fn set_leverage(&mut self, leverage: u32) {
        self.updated_at = Utc::now();
        self.leverage = leverage;
    }
}
