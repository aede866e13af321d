//! 가격/수량 계산을 위한 Decimal 유틸리티.

use rust_decimal::{Decimal, RoundingStrategy};

/// 가격 타입.
pub type Price = Decimal;

/// 주문 수량 타입.
pub type Quantity = Decimal;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// `step` 배수로 내림합니다. step이 0 이하이면 그대로 반환합니다.
    fn floor_to_step(&self, step: Decimal) -> Decimal;

    /// 지정된 소수점 자릿수로 반올림합니다.
    fn round_to_precision(&self, dp: u32) -> Decimal;
}

impl DecimalExt for Decimal {
    fn floor_to_step(&self, step: Decimal) -> Decimal {
        if step <= Decimal::ZERO {
            return *self;
        }
        ((*self / step).floor() * step).normalize()
    }

    fn round_to_precision(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// 거래소 문자열 숫자를 파싱합니다.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    s.trim().parse::<Decimal>().ok()
}
