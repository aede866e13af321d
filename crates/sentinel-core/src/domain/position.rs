//! 거래소가 보고하는 포지션/잔고 스냅샷.

use crate::domain::PositionSide;
use crate::types::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 거래소 포지션 조회 결과 (방향별 한 건).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub position_side: PositionSide,
    /// 보유 수량 (절대값, 0이면 포지션 없음)
    pub amount: Quantity,
    /// 평균 진입 가격
    pub entry_price: Price,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
}

impl PositionSnapshot {
    pub fn is_open(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

/// 증거금 자산 잔고.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    /// 지갑 잔고
    pub total: Decimal,
    /// 주문 가능 잔고
    pub available: Decimal,
}

impl Balance {
    pub fn new(asset: impl Into<String>, total: Decimal, available: Decimal) -> Self {
        Self {
            asset: asset.into(),
            total,
            available,
        }
    }

    pub fn empty(asset: impl Into<String>) -> Self {
        Self::new(asset, Decimal::ZERO, Decimal::ZERO)
    }
}
