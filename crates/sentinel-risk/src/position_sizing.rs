//! 포지션 크기 계산.
//!
//! 제공 기능:
//! - 잔고 × 리스크 비율을 넘지 않는 수량 계산
//! - 잔고 × 레버리지 × 최대 포지션 비율로 총 명목 가치 제한
//! - 거래소 step size 내림과 최소 수량/최소 주문 금액 검사
//!
//! 계산 결과가 주문 불가능하면 수량 0과 거절 사유를 반환합니다.

use crate::config::RiskConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{PositionSide, Price, Quantity, SymbolFilters};
use std::fmt;
use tracing::debug;

/// 사이징 입력 중 계좌 상태.
#[derive(Debug, Clone, Copy)]
pub struct SizingContext<'a> {
    /// 증거금 자산 총 잔고
    pub balance: Decimal,
    /// 같은 방향 기존 포지션의 명목 가치 (없으면 0)
    pub existing_notional: Decimal,
    pub filters: &'a SymbolFilters,
}

/// 사이징 거절 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingRejection {
    /// 잔고 또는 진입가가 0 이하
    NonPositiveInput,
    /// 손절가가 방향에 맞지 않음
    WrongSideStop,
    /// 추가 진입이 명목 가치 한도를 넘음
    CapExceeded,
    /// 최소 수량 또는 최소 주문 금액 미달
    BelowMinimum,
}

impl fmt::Display for SizingRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SizingRejection::NonPositiveInput => "non-positive balance or price",
            SizingRejection::WrongSideStop => "stop loss on wrong side of entry",
            SizingRejection::CapExceeded => "position notional cap exceeded",
            SizingRejection::BelowMinimum => "below exchange minimum quantity/notional",
        };
        f.write_str(s)
    }
}

/// 사이징 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingDecision {
    /// 주문 수량 (거절이면 0)
    pub quantity: Quantity,
    /// 리스크 한도만으로 계산한 수량
    pub raw_quantity: Quantity,
    /// 명목 가치 한도에 맞춰 줄였는지 여부
    pub capped: bool,
    pub rejection: Option<SizingRejection>,
}

impl SizingDecision {
    fn rejected(reason: SizingRejection, raw_quantity: Quantity) -> Self {
        Self {
            quantity: Decimal::ZERO,
            raw_quantity,
            capped: false,
            rejection: Some(reason),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

/// 포지션 사이저.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: RiskConfig,
}

impl PositionSizer {
    /// 주어진 설정으로 새 포지션 사이저를 생성.
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// 레버리지 변경 (계정 설정 업데이트 반영).
    pub fn set_leverage(&mut self, leverage: u32) {
        self.config.leverage = leverage;
    }

    /// 거래당 허용 최대 손실 금액.
    pub fn max_loss(&self, balance: Decimal) -> Decimal {
        balance * self.config.risk_percentage / dec!(100)
    }

    /// 방향별 최대 포지션 명목 가치.
    pub fn notional_cap(&self, balance: Decimal) -> Decimal {
        balance * Decimal::from(self.config.leverage) * self.config.max_position_ratio
    }

    /// 진입 수량을 계산합니다.
    ///
    /// `(entry - stop) × quantity`가 `balance × risk_percentage / 100`을 넘지 않게 하고,
    /// 첫 진입이 명목 가치 한도를 넘으면 한도에 맞게 줄입니다. 기존 포지션에 더하는
    /// 주문이 한도를 넘으면 거절합니다.
    pub fn size_position(
        &self,
        side: PositionSide,
        entry_price: Price,
        stop_loss_price: Price,
        ctx: &SizingContext<'_>,
    ) -> SizingDecision {
        if ctx.balance <= Decimal::ZERO || entry_price <= Decimal::ZERO {
            return SizingDecision::rejected(SizingRejection::NonPositiveInput, Decimal::ZERO);
        }
        if !side.is_stop_side(entry_price, stop_loss_price) {
            debug!(%side, %entry_price, %stop_loss_price, "Stop loss on wrong side, size 0");
            return SizingDecision::rejected(SizingRejection::WrongSideStop, Decimal::ZERO);
        }

        let loss_per_unit = (entry_price - stop_loss_price).abs();
        let raw_quantity = self.max_loss(ctx.balance) / loss_per_unit;

        let remaining = self.notional_cap(ctx.balance) - ctx.existing_notional;
        let mut quantity = raw_quantity;
        let mut capped = false;

        if raw_quantity * entry_price > remaining {
            if !ctx.existing_notional.is_zero() || remaining <= Decimal::ZERO {
                debug!(%side, %remaining, "Add would exceed notional cap, size 0");
                return SizingDecision::rejected(SizingRejection::CapExceeded, raw_quantity);
            }
            quantity = remaining / entry_price;
            capped = true;
        }

        let quantity = ctx.filters.floor_quantity(quantity);
        if !ctx.filters.meets_minimums(quantity, entry_price) {
            debug!(%side, %quantity, "Quantity below exchange minimums, size 0");
            return SizingDecision::rejected(SizingRejection::BelowMinimum, raw_quantity);
        }

        SizingDecision {
            quantity,
            raw_quantity,
            capped,
            rejection: None,
        }
    }
}
