//! 주문 타입.
//!
//! 헤지 모드 선물 거래를 전제로 합니다:
//! - `PositionSide` - 포지션 방향 (LONG/SHORT, 동시에 보유 가능)
//! - `OrderSide` - 주문 방향 (BUY/SELL)
//! - `ProtectiveOrder` - 거래소에 걸린 손절/익절 조건부 주문
//! - 시장가/보호 주문 요청 및 응답

use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl OrderSide {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 포지션 방향. 헤지 모드에서는 두 방향이 독립적으로 관리됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    /// 롱
    Long,
    /// 숏
    Short,
}

impl PositionSide {
    /// 두 방향 모두.
    pub const BOTH: [PositionSide; 2] = [PositionSide::Long, PositionSide::Short];

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// 거래소 문자열("LONG"/"SHORT")을 파싱합니다. "BOTH"는 None입니다.
    pub fn from_exchange(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(PositionSide::Long),
            "SHORT" => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// 포지션을 늘리는 주문 방향.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// 포지션을 닫는 주문 방향.
    pub fn close_order_side(&self) -> OrderSide {
        self.entry_order_side().opposite()
    }

    /// `price`가 `entry` 기준으로 이 방향의 손절 쪽에 있는지 확인합니다.
    ///
    /// 롱은 진입가보다 엄격히 낮아야, 숏은 엄격히 높아야 합니다.
    pub fn is_stop_side(&self, entry: Price, price: Price) -> bool {
        match self {
            PositionSide::Long => price < entry,
            PositionSide::Short => price > entry,
        }
    }

    /// `price`가 `entry` 기준으로 이 방향의 익절 쪽에 있는지 확인합니다.
    pub fn is_profit_side(&self, entry: Price, price: Price) -> bool {
        match self {
            PositionSide::Long => price > entry,
            PositionSide::Short => price < entry,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 보호 주문 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveKind {
    /// 손절 (STOP_MARKET)
    StopLoss,
    /// 익절 (TAKE_PROFIT_MARKET)
    TakeProfit,
}

impl ProtectiveKind {
    pub const BOTH: [ProtectiveKind; 2] = [ProtectiveKind::StopLoss, ProtectiveKind::TakeProfit];

    /// 거래소 주문 유형 문자열.
    pub fn exchange_order_type(&self) -> &'static str {
        match self {
            ProtectiveKind::StopLoss => "STOP_MARKET",
            ProtectiveKind::TakeProfit => "TAKE_PROFIT_MARKET",
        }
    }

    /// 거래소 주문 유형에서 보호 주문 종류를 판별합니다.
    pub fn from_exchange_order_type(s: &str) -> Option<Self> {
        match s {
            "STOP_MARKET" | "STOP" => Some(ProtectiveKind::StopLoss),
            "TAKE_PROFIT_MARKET" | "TAKE_PROFIT" => Some(ProtectiveKind::TakeProfit),
            _ => None,
        }
    }
}

impl fmt::Display for ProtectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectiveKind::StopLoss => write!(f, "STOP_LOSS"),
            ProtectiveKind::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// 거래소에 걸린 손절/익절 조건부 주문.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectiveOrder {
    /// 거래소 주문 ID (algo order id)
    pub order_id: String,
    /// 거래 심볼
    pub symbol: String,
    /// 보호 대상 포지션 방향
    pub position_side: PositionSide,
    /// 손절/익절
    pub kind: ProtectiveKind,
    /// 발동 가격
    pub trigger_price: Price,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
}

/// 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// 체결된 수량이 있을 수 있는 상태인지 확인합니다.
    pub fn has_fill(&self) -> bool {
        matches!(self, OrderStatus::PartiallyFilled | OrderStatus::Filled)
    }

    /// 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// 시장가 주문 요청.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrderRequest {
    pub symbol: String,
    pub position_side: PositionSide,
    pub side: OrderSide,
    pub quantity: Quantity,
    /// 검증 단계에서 주문을 식별하기 위한 클라이언트 주문 ID
    pub client_order_id: String,
}

impl MarketOrderRequest {
    /// 포지션을 늘리는 시장가 주문 (롱은 BUY, 숏은 SELL).
    pub fn open(
        symbol: impl Into<String>,
        position_side: PositionSide,
        quantity: Quantity,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            position_side,
            side: position_side.entry_order_side(),
            quantity,
            client_order_id: client_order_id.into(),
        }
    }
}

/// 보호 주문 요청. 항상 포지션 전체 청산(closePosition) 조건부 주문입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveOrderRequest {
    pub symbol: String,
    pub position_side: PositionSide,
    pub kind: ProtectiveKind,
    pub trigger_price: Price,
}

impl ProtectiveOrderRequest {
    /// 발동 시 주문 방향.
    pub fn order_side(&self) -> OrderSide {
        self.position_side.close_order_side()
    }
}

/// 시장가 주문 응답.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    /// 체결 수량
    pub executed_qty: Quantity,
    /// 평균 체결가 (미체결이면 0)
    pub avg_price: Price,
}

impl OrderAck {
    /// 체결가가 없으면 `fallback`을 사용합니다.
    pub fn fill_price_or(&self, fallback: Price) -> Price {
        if self.avg_price > Decimal::ZERO {
            self.avg_price
        } else {
            fallback
        }
    }
}

/// 미체결 일반 주문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub position_side: Option<PositionSide>,
    pub side: OrderSide,
    pub order_type: String,
    pub status: OrderStatus,
    pub orig_qty: Quantity,
    pub executed_qty: Quantity,
}
