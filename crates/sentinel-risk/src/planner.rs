//! 시그널 후보 → 거래 계획.
//!
//! 손절 거리를 `entry × max_loss_ratio`로 제한하고, 익절가를
//! `entry ± (entry - stop) × risk_reward_ratio`로 산출합니다.
//! 모든 가격은 호가 단위에 맞춥니다.

use crate::config::RiskConfig;
use rust_decimal::Decimal;
use sentinel_core::{PositionSide, Price, ProtectiveKind, RoundMethod, SignalCandidate, SymbolFilters};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 진입 계획.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub side: PositionSide,
    /// 사이징 기준 진입가
    pub entry_price: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    /// 손절 거리 제한이 적용되었는지 여부
    pub stop_capped: bool,
}

/// 거래 계획 생성기.
#[derive(Debug, Clone)]
pub struct TradePlanner {
    config: RiskConfig,
}

impl TradePlanner {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// 후보로부터 계획을 만듭니다.
    ///
    /// `reference_price`는 최근 마감 캔들 종가입니다. 손절가가 기준가의
    /// 손절 방향에 있지 않으면 None.
    pub fn plan(
        &self,
        side: PositionSide,
        candidate: &SignalCandidate,
        reference_price: Price,
        filters: &SymbolFilters,
    ) -> Option<TradePlan> {
        let entry = reference_price;
        if entry <= Decimal::ZERO || !side.is_stop_side(entry, candidate.stop_loss) {
            debug!(%side, %entry, stop = %candidate.stop_loss, "Candidate stop on wrong side, skipping");
            return None;
        }

        let max_distance = entry * self.config.max_loss_ratio;
        let mut distance = (entry - candidate.stop_loss).abs();
        let stop_capped = distance > max_distance;
        if stop_capped {
            distance = max_distance;
        }

        let (raw_stop, raw_take) = match side {
            PositionSide::Long => (entry - distance, entry + distance * self.config.risk_reward_ratio),
            PositionSide::Short => (entry + distance, entry - distance * self.config.risk_reward_ratio),
        };
        let stop_loss = filters.quantize_price(raw_stop, toward_entry(side, ProtectiveKind::StopLoss));
        let take_profit = filters.quantize_price(raw_take, toward_entry(side, ProtectiveKind::TakeProfit));

        if !side.is_stop_side(entry, stop_loss) || !side.is_profit_side(entry, take_profit) {
            debug!(%side, %entry, %stop_loss, %take_profit, "Quantized prices collapsed onto entry");
            return None;
        }
        if take_profit <= Decimal::ZERO {
            return None;
        }

        Some(TradePlan {
            side,
            entry_price: entry,
            stop_loss,
            take_profit,
            stop_capped,
        })
    }
}

/// 진입가 쪽으로 맞추는 반올림 방향.
///
/// 진입가 아래에 놓이는 가격(롱 손절, 숏 익절)은 올림, 위에 놓이는 가격은 내림.
fn toward_entry(side: PositionSide, kind: ProtectiveKind) -> RoundMethod {
    let below_entry = matches!(
        (side, kind),
        (PositionSide::Long, ProtectiveKind::StopLoss) | (PositionSide::Short, ProtectiveKind::TakeProfit)
    );
    if below_entry {
        RoundMethod::Ceil
    } else {
        RoundMethod::Floor
    }
}

fn away_from_entry(side: PositionSide, kind: ProtectiveKind) -> RoundMethod {
    match toward_entry(side, kind) {
        RoundMethod::Ceil => RoundMethod::Floor,
        _ => RoundMethod::Ceil,
    }
}

/// 보호 주문 트리거 가격을 호가 단위로 맞춥니다.
///
/// 진입가 쪽으로 먼저 맞추고, 그 결과가 진입가에 붙거나 넘어가면 반대쪽
/// 호가로 맞춥니다. 원래 가격이 이미 잘못된 쪽(손절이 유리한 쪽, 익절이
/// 불리한 쪽)이면 None.
pub fn quantize_protective_price(
    filters: &SymbolFilters,
    side: PositionSide,
    kind: ProtectiveKind,
    entry: Price,
    price: Price,
) -> Option<Price> {
    let valid = |p: Price| match kind {
        ProtectiveKind::StopLoss => side.is_stop_side(entry, p),
        ProtectiveKind::TakeProfit => side.is_profit_side(entry, p),
    };
    if !valid(price) {
        return None;
    }

    let snapped = filters.quantize_price(price, toward_entry(side, kind));
    if valid(snapped) {
        return Some(snapped);
    }
    let snapped = filters.quantize_price(price, away_from_entry(side, kind));
    (valid(snapped) && snapped > Decimal::ZERO).then_some(snapped)
}
