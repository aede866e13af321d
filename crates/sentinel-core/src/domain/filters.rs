//! 심볼별 거래 필터 (호가 단위, 수량 단위, 최소 주문 조건).
//!
//! 계산된 가격과 수량은 모두 거래소 필터에 맞게 양자화되어야 합니다.

use crate::types::{DecimalExt, Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 호가 단위 라운딩 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMethod {
    /// 일반 반올림
    Round,
    /// 내림
    Floor,
    /// 올림
    Ceil,
}

/// 호가 단위 제공자 trait
pub trait TickSizeProvider: Send + Sync {
    /// 주어진 가격에 대한 호가 단위를 반환합니다.
    fn tick_size(&self, price: Decimal) -> Decimal;

    /// 가격을 호가 단위로 라운딩합니다.
    fn round_to_tick(&self, price: Decimal, method: RoundMethod) -> Decimal {
        let tick = self.tick_size(price);
        if tick.is_zero() {
            return price;
        }

        let ticks = price / tick;
        let rounded_ticks = match method {
            RoundMethod::Round => ticks.round(),
            RoundMethod::Floor => ticks.floor(),
            RoundMethod::Ceil => ticks.ceil(),
        };

        (rounded_ticks * tick).normalize()
    }
}

/// 거래소 exchange info에서 얻은 심볼 필터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    /// 가격 최소 단위 (PRICE_FILTER.tickSize)
    pub tick_size: Decimal,
    /// 수량 최소 단위 (LOT_SIZE.stepSize)
    pub step_size: Decimal,
    /// 최소 주문 수량 (LOT_SIZE.minQty)
    pub min_qty: Decimal,
    /// 최소 주문 금액 (MIN_NOTIONAL.notional)
    pub min_notional: Decimal,
    /// 가격 소수점 자릿수
    pub price_precision: u32,
    /// 수량 소수점 자릿수
    pub quantity_precision: u32,
}

impl TickSizeProvider for SymbolFilters {
    fn tick_size(&self, _price: Decimal) -> Decimal {
        self.tick_size
    }
}

impl SymbolFilters {
    /// 수량을 step size 배수로 내림합니다.
    pub fn floor_quantity(&self, quantity: Quantity) -> Quantity {
        quantity
            .floor_to_step(self.step_size)
            .round_dp_with_strategy(self.quantity_precision, rust_decimal::RoundingStrategy::ToZero)
    }

    /// 가격을 호가 단위에 맞춥니다.
    pub fn quantize_price(&self, price: Price, method: RoundMethod) -> Price {
        self.round_to_tick(price, method)
    }

    /// 가격을 가격 정밀도로 반올림합니다 (평균 진입가 계산용).
    pub fn round_price_precision(&self, price: Price) -> Price {
        price.round_to_precision(self.price_precision)
    }

    /// 최소 수량/최소 주문 금액 조건을 만족하는지 확인합니다.
    pub fn meets_minimums(&self, quantity: Quantity, price: Price) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_qty && quantity * price >= self.min_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "BTCUSDT".to_string(),
            tick_size: dec!(0.10),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(100),
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    #[test]
    fn test_floor_quantity() {
        let f = btc_filters();
        assert_eq!(f.floor_quantity(dec!(0.12345)), dec!(0.123));
        assert_eq!(f.floor_quantity(dec!(0.0009)), dec!(0));
    }

    #[test]
    fn test_quantize_price() {
        let f = btc_filters();
        assert_eq!(f.quantize_price(dec!(43210.37), RoundMethod::Floor), dec!(43210.3));
        assert_eq!(f.quantize_price(dec!(43210.31), RoundMethod::Ceil), dec!(43210.4));
        assert_eq!(f.quantize_price(dec!(43210.35), RoundMethod::Round), dec!(43210.4));
    }

    #[test]
    fn test_meets_minimums() {
        let f = btc_filters();
        assert!(f.meets_minimums(dec!(0.01), dec!(43000)));
        assert!(!f.meets_minimums(dec!(0.0005), dec!(43000)));
        // 430 * 0.001 < 100
        assert!(!f.meets_minimums(dec!(0.001), dec!(43000) / dec!(100)));
    }
}
