//! Binance 선물 WebSocket 이벤트 디코딩.
//!
//! 사용자 데이터 이벤트는 `e` 필드로 구분되는 태그 유니온입니다. 알 수 없는
//! 이벤트 타입은 `UserDataEvent::Unknown`으로 디코딩되어 무시됩니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sentinel_core::{
    Balance, Candle, OrderSide, OrderStatus, PositionSide, PositionSnapshot, ProtectiveKind,
};
use serde::Deserialize;

// ============================================================================
// 사용자 데이터 이벤트
// ============================================================================

/// 사용자 데이터 스트림 이벤트.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum UserDataEvent {
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate(AccountUpdateEvent),
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate(OrderTradeUpdateEvent),
    #[serde(rename = "ALGO_UPDATE")]
    AlgoUpdate(AlgoUpdateEvent),
    #[serde(rename = "ACCOUNT_CONFIG_UPDATE")]
    AccountConfigUpdate(AccountConfigUpdateEvent),
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired {
        #[serde(rename = "E", default)]
        event_time: i64,
    },
    #[serde(other)]
    Unknown,
}

impl UserDataEvent {
    /// 로그용 이벤트 이름.
    pub fn kind(&self) -> &'static str {
        match self {
            UserDataEvent::AccountUpdate(_) => "ACCOUNT_UPDATE",
            UserDataEvent::OrderTradeUpdate(_) => "ORDER_TRADE_UPDATE",
            UserDataEvent::AlgoUpdate(_) => "ALGO_UPDATE",
            UserDataEvent::AccountConfigUpdate(_) => "ACCOUNT_CONFIG_UPDATE",
            UserDataEvent::ListenKeyExpired { .. } => "listenKeyExpired",
            UserDataEvent::Unknown => "unknown",
        }
    }
}

/// ACCOUNT_UPDATE: 잔고 + 포지션 스냅샷.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountUpdateEvent {
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "a")]
    pub data: AccountUpdateData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountUpdateData {
    /// 변경 사유 (ORDER, FUNDING_FEE, ...)
    #[serde(rename = "m", default)]
    pub reason: String,
    #[serde(rename = "B", default)]
    pub balances: Vec<WsBalance>,
    #[serde(rename = "P", default)]
    pub positions: Vec<WsPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsBalance {
    #[serde(rename = "a")]
    pub asset: String,
    /// 지갑 잔고
    #[serde(rename = "wb")]
    pub wallet_balance: Decimal,
    /// 교차 지갑 잔고
    #[serde(rename = "cw", default)]
    pub cross_wallet_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsPosition {
    #[serde(rename = "s")]
    pub symbol: String,
    /// 포지션 수량 (숏은 음수)
    #[serde(rename = "pa")]
    pub amount: Decimal,
    #[serde(rename = "ep")]
    pub entry_price: Decimal,
    #[serde(rename = "up", default)]
    pub unrealized_pnl: Decimal,
    #[serde(rename = "ps")]
    pub position_side: String,
}

impl AccountUpdateEvent {
    /// 증거금 자산 잔고. 이벤트에는 주문 가능 잔고가 없으므로 교차 지갑 잔고를 사용합니다.
    pub fn balance_for(&self, asset: &str) -> Option<Balance> {
        self.data
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| Balance::new(&b.asset, b.wallet_balance, b.cross_wallet_balance))
    }

    /// 심볼의 LONG/SHORT 포지션 스냅샷. 수량은 절대값입니다.
    pub fn positions_for(&self, symbol: &str) -> Vec<PositionSnapshot> {
        self.data
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .filter_map(|p| {
                let side = PositionSide::from_exchange(&p.position_side)?;
                Some(PositionSnapshot {
                    symbol: p.symbol.clone(),
                    position_side: side,
                    amount: p.amount.abs(),
                    entry_price: p.entry_price,
                    unrealized_pnl: p.unrealized_pnl,
                })
            })
            .collect()
    }
}

/// ORDER_TRADE_UPDATE: 일반 주문 상태 변경/체결.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderTradeUpdateEvent {
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "o")]
    pub order: OrderTradeData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderTradeData {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", default)]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: OrderSide,
    #[serde(rename = "o")]
    pub order_type: String,
    /// 실행 유형 (NEW, TRADE, CANCELED, ...)
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub status: OrderStatus,
    #[serde(rename = "i")]
    pub order_id: i64,
    /// 이번 체결 수량
    #[serde(rename = "l", default)]
    pub last_filled_qty: Decimal,
    /// 누적 체결 수량
    #[serde(rename = "z", default)]
    pub cumulative_filled_qty: Decimal,
    /// 이번 체결 가격
    #[serde(rename = "L", default)]
    pub last_filled_price: Decimal,
    #[serde(rename = "ap", default)]
    pub avg_price: Decimal,
    /// 이번 체결의 실현 손익
    #[serde(rename = "rp", default)]
    pub realized_profit: Decimal,
    #[serde(rename = "ps", default)]
    pub position_side: String,
    #[serde(rename = "R", default)]
    pub reduce_only: bool,
}

impl OrderTradeData {
    pub fn position_side(&self) -> Option<PositionSide> {
        PositionSide::from_exchange(&self.position_side)
    }

    /// 체결 이벤트인지 확인.
    pub fn is_trade(&self) -> bool {
        self.execution_type == "TRADE"
    }
}

/// ALGO_UPDATE: 조건부(보호) 주문 상태 변경.
#[derive(Debug, Clone, Deserialize)]
pub struct AlgoUpdateEvent {
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "o")]
    pub order: AlgoOrderData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlgoOrderData {
    #[serde(rename = "aid")]
    pub algo_id: i64,
    #[serde(rename = "caid", default)]
    pub client_algo_id: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "o", default)]
    pub order_type: String,
    #[serde(rename = "S")]
    pub side: OrderSide,
    #[serde(rename = "ps", default)]
    pub position_side: String,
    /// 알고 주문 상태 (NEW, TRIGGERING, TRIGGERED, FINISHED, CANCELED, ...)
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "tp", default)]
    pub trigger_price: Decimal,
}

impl AlgoOrderData {
    pub fn order_id(&self) -> String {
        self.algo_id.to_string()
    }

    pub fn position_side(&self) -> Option<PositionSide> {
        PositionSide::from_exchange(&self.position_side)
    }

    pub fn kind(&self) -> Option<ProtectiveKind> {
        ProtectiveKind::from_exchange_order_type(&self.order_type)
    }

    /// 더 이상 거래소에 살아 있지 않은 상태인지 확인.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "CANCELED" | "CANCELLED" | "EXPIRED" | "REJECTED" | "FINISHED" | "TRIGGERED"
        )
    }
}

/// ACCOUNT_CONFIG_UPDATE: 레버리지 등 계정 설정 변경.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfigUpdateEvent {
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "ac", default)]
    pub leverage_config: Option<LeverageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeverageConfig {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "l")]
    pub leverage: u32,
}

// ============================================================================
// 시장 데이터 이벤트
// ============================================================================

/// 시장 데이터 큐로 전달되는 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// 캔들 업데이트 (마감 여부는 `Candle::closed`)
    Kline { symbol: String, candle: Candle },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum MarketMessage {
    #[serde(rename = "kline")]
    Kline(WsKlineEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// 시장 데이터 메시지를 디코딩합니다. 캔들 외 메시지는 None.
pub fn parse_market_message(text: &str) -> Result<Option<MarketEvent>, serde_json::Error> {
    match serde_json::from_str::<MarketMessage>(text)? {
        MarketMessage::Kline(event) => {
            let k = event.kline;
            Ok(Some(MarketEvent::Kline {
                symbol: event.symbol,
                candle: Candle {
                    open_time: millis_to_utc(k.open_time),
                    close_time: millis_to_utc(k.close_time),
                    open: k.open,
                    high: k.high,
                    low: k.low,
                    close: k.close,
                    volume: k.volume,
                    closed: k.is_closed,
                },
            }))
        }
        MarketMessage::Unknown => Ok(None),
    }
}

/// 사용자 데이터 메시지를 디코딩합니다.
pub fn parse_user_message(text: &str) -> Result<UserDataEvent, serde_json::Error> {
    serde_json::from_str(text)
}
