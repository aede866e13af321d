//! 거래소 trait 정의.

use async_trait::async_trait;
use sentinel_core::{
    Balance, Candle, MarginType, MarketOrderRequest, OpenOrder, OrderAck, PositionSnapshot,
    ProtectiveOrder, ProtectiveOrderRequest, SymbolFilters, Timeframe,
};

use crate::error::{ExchangeError, ExchangeResult};

/// 원격 호출 결과와 응답이 보고한 요청 가중치.
///
/// 실패한 호출도 가중치를 보고할 수 있으므로 결과와 분리해 전달합니다.
#[derive(Debug)]
pub struct ApiReply<T> {
    pub result: ExchangeResult<T>,
    /// `X-MBX-USED-WEIGHT-1M` 값 (응답을 받지 못했으면 None)
    pub used_weight: Option<u32>,
}

impl<T> ApiReply<T> {
    pub fn new(result: ExchangeResult<T>, used_weight: Option<u32>) -> Self {
        Self {
            result,
            used_weight,
        }
    }

    pub fn ok(value: T) -> Self {
        Self::new(Ok(value), None)
    }

    pub fn err(error: ExchangeError) -> Self {
        Self::new(Err(error), None)
    }

    pub fn with_weight(mut self, used_weight: u32) -> Self {
        self.used_weight = Some(used_weight);
        self
    }

    /// 값을 변환합니다. 가중치는 유지됩니다.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiReply<U> {
        ApiReply {
            result: self.result.map(f),
            used_weight: self.used_weight,
        }
    }
}

/// 선물 거래소 REST 인터페이스.
///
/// 모든 호출은 `ApiGateway`를 통해서만 실행됩니다.
#[async_trait]
pub trait FuturesApi: Send + Sync {
    /// 거래소 이름 반환.
    fn name(&self) -> &str;

    // === 일반 ===

    /// 서버 시간 (밀리초).
    async fn server_time(&self) -> ApiReply<i64>;

    /// 심볼 거래 필터.
    async fn exchange_info(&self, symbol: &str) -> ApiReply<SymbolFilters>;

    // === 계좌 설정 ===

    /// 헤지(양방향) 포지션 모드 설정.
    async fn set_position_mode(&self, dual_side: bool) -> ApiReply<()>;

    /// 마진 타입 설정.
    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> ApiReply<()>;

    /// 레버리지 설정. 적용된 레버리지를 반환.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ApiReply<u32>;

    // === 계좌 조회 ===

    /// 자산 잔고 조회.
    async fn balance(&self, asset: &str) -> ApiReply<Balance>;

    /// 심볼의 방향별 포지션 조회.
    async fn positions(&self, symbol: &str) -> ApiReply<Vec<PositionSnapshot>>;

    // === 시장 데이터 ===

    /// 과거 캔들 조회 (오래된 순).
    async fn klines(&self, symbol: &str, interval: Timeframe, limit: u32) -> ApiReply<Vec<Candle>>;

    // === 주문 ===

    /// 시장가 주문.
    async fn place_market_order(&self, request: &MarketOrderRequest) -> ApiReply<OrderAck>;

    /// 손절/익절 조건부 주문.
    async fn place_protective_order(
        &self,
        request: &ProtectiveOrderRequest,
    ) -> ApiReply<ProtectiveOrder>;

    /// 조건부 주문 취소.
    async fn cancel_protective_order(&self, symbol: &str, order_id: &str) -> ApiReply<()>;

    /// 미발동 조건부 주문 조회.
    async fn open_protective_orders(&self, symbol: &str) -> ApiReply<Vec<ProtectiveOrder>>;

    /// 미체결 일반 주문 조회.
    async fn open_orders(&self, symbol: &str) -> ApiReply<Vec<OpenOrder>>;

    // === 사용자 데이터 스트림 ===

    /// listen key 생성.
    async fn create_listen_key(&self) -> ApiReply<String>;

    /// listen key 연장.
    async fn keepalive_listen_key(&self, listen_key: &str) -> ApiReply<()>;

    /// listen key 삭제.
    async fn close_listen_key(&self, listen_key: &str) -> ApiReply<()>;
}
