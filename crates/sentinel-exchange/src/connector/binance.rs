//! Binance USDⓈ-M 선물 커넥터.
//!
//! REST 호출마다 `ApiReply`로 결과와 `X-MBX-USED-WEIGHT-1M` 값을 함께 반환합니다.
//! 재시도/분류는 게이트웨이가 담당하므로 여기서는 한 번만 요청합니다.
//! 메인넷과 테스트넷 모두 지원.

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{ApiReply, FuturesApi};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use sentinel_core::{
    Balance, Candle, ExchangeConfig, MarginType, MarketOrderRequest, OpenOrder, OrderAck,
    OrderSide, OrderStatus, PositionSide, PositionSnapshot, ProtectiveKind, ProtectiveOrder,
    ProtectiveOrderRequest, SymbolFilters, Timeframe,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const MAINNET_REST: &str = "https://fapi.binance.com";
const MAINNET_WS: &str = "wss://fstream.binance.com";
const TESTNET_REST: &str = "https://testnet.binancefuture.com";
const TESTNET_WS: &str = "wss://fstream.binancefuture.com";

/// 1분 누적 요청 가중치 헤더.
pub const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// 본문에 코드가 없는 429/418 응답에 붙이는 코드 (too many requests).
const RATE_LIMITED_CODE: i32 = -1003;

// ============================================================================
// 설정
// ============================================================================

/// Binance 선물 클라이언트 설정.
///
/// # 보안
/// - `Debug` 구현은 민감 정보(`api_key`, `api_secret`)를 마스킹합니다.
#[derive(Clone)]
pub struct BinanceConfig {
    /// API 키
    pub api_key: String,
    /// API 시크릿
    pub api_secret: String,
    /// 테스트넷 사용
    pub testnet: bool,
    /// REST URL 재정의
    pub rest_base_url: Option<String>,
    /// WebSocket URL 재정의
    pub ws_base_url: Option<String>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 수신 윈도우 (밀리초)
    pub recv_window: u64,
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = if self.api_key.len() > 8 {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        } else {
            "***REDACTED***".to_string()
        };

        f.debug_struct("BinanceConfig")
            .field("api_key", &masked_key)
            .field("api_secret", &"***REDACTED***")
            .field("testnet", &self.testnet)
            .field("rest_base_url", &self.rest_base_url())
            .field("ws_base_url", &self.ws_base_url())
            .field("timeout_secs", &self.timeout_secs)
            .field("recv_window", &self.recv_window)
            .finish()
    }
}

impl BinanceConfig {
    /// 새 설정 생성.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            testnet: false,
            rest_base_url: None,
            ws_base_url: None,
            timeout_secs: 10,
            recv_window: 5000,
        }
    }

    /// 테스트넷 사용.
    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// REST URL 재정의.
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = Some(url.into());
        self
    }

    /// 거래소 설정 + 환경 변수(`BINANCE_API_KEY`, `BINANCE_API_SECRET`)에서 생성.
    pub fn from_env(exchange: &ExchangeConfig) -> ExchangeResult<Self> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| ExchangeError::Config("BINANCE_API_KEY is not set".to_string()))?;
        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| ExchangeError::Config("BINANCE_API_SECRET is not set".to_string()))?;

        Ok(Self {
            api_key,
            api_secret,
            testnet: exchange.testnet,
            rest_base_url: exchange.rest_base_url.clone(),
            ws_base_url: exchange.ws_base_url.clone(),
            timeout_secs: exchange.request_timeout_secs,
            recv_window: exchange.recv_window_ms,
        })
    }

    /// REST API 기본 URL 반환.
    pub fn rest_base_url(&self) -> &str {
        match &self.rest_base_url {
            Some(url) => url.trim_end_matches('/'),
            None if self.testnet => TESTNET_REST,
            None => MAINNET_REST,
        }
    }

    /// WebSocket 기본 URL 반환.
    pub fn ws_base_url(&self) -> &str {
        match &self.ws_base_url {
            Some(url) => url.trim_end_matches('/'),
            None if self.testnet => TESTNET_WS,
            None => MAINNET_WS,
        }
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceSymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
    filters: Vec<BinanceFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum BinanceFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price {
        #[serde(rename = "tickSize")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: Decimal,
        #[serde(rename = "minQty")]
        min_qty: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceLeverage {
    leverage: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceBalance {
    asset: String,
    balance: Decimal,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinancePositionRisk {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    #[serde(rename = "unRealizedProfit", default)]
    unrealized_profit: Decimal,
    position_side: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // 7~11번 필드는 사용하지 않음
struct BinanceKline(
    i64,     // 0: Open time
    Decimal, // 1: Open
    Decimal, // 2: High
    Decimal, // 3: Low
    Decimal, // 4: Close
    Decimal, // 5: Volume
    i64,     // 6: Close time
    serde_json::Value, // 7: Quote asset volume
    serde_json::Value, // 8: Number of trades
    serde_json::Value, // 9: Taker buy base asset volume
    serde_json::Value, // 10: Taker buy quote asset volume
    serde_json::Value, // 11: Ignore
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    order_id: i64,
    client_order_id: String,
    status: OrderStatus,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default)]
    avg_price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOpenOrder {
    order_id: i64,
    client_order_id: String,
    side: OrderSide,
    #[serde(default)]
    position_side: String,
    #[serde(rename = "type")]
    order_type: String,
    status: OrderStatus,
    orig_qty: Decimal,
    executed_qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAlgoOrderResponse {
    algo_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAlgoOrder {
    algo_id: i64,
    symbol: String,
    #[serde(default)]
    position_side: String,
    #[serde(alias = "type")]
    order_type: String,
    trigger_price: Decimal,
    #[serde(default)]
    create_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceListenKey {
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

/// 인증 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// 공개 엔드포인트
    None,
    /// API 키 헤더만 (listen key)
    ApiKey,
    /// API 키 + HMAC 서명
    Signed,
}

/// 실패 응답을 에러로 변환합니다.
///
/// `{"code":..,"msg":..}` 본문은 API 에러, 본문 코드가 없는 429/418은 -1003,
/// 그 외는 HTTP 에러입니다.
pub fn error_from_response(status: u16, body: &str) -> ExchangeError {
    if let Ok(error) = serde_json::from_str::<BinanceError>(body) {
        return ExchangeError::Api {
            code: error.code,
            message: error.msg,
        };
    }
    if status == 429 || status == 418 {
        return ExchangeError::Api {
            code: RATE_LIMITED_CODE,
            message: format!("HTTP {status}: request weight exceeded"),
        };
    }
    ExchangeError::Http {
        status,
        body: body.to_string(),
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ============================================================================
// Binance 클라이언트
// ============================================================================

/// Binance USDⓈ-M 선물 REST 클라이언트.
pub struct BinanceFuturesClient {
    config: BinanceConfig,
    client: Client,
    /// 서버 시간 - 로컬 시간 (밀리초)
    time_offset_ms: AtomicI64,
}

impl BinanceFuturesClient {
    /// 새 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::Config`를 반환합니다.
    pub fn new(config: BinanceConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::Config(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        info!(testnet = config.testnet, rest = config.rest_base_url(), "Binance futures client created");

        Ok(Self {
            config,
            client,
            time_offset_ms: AtomicI64::new(0),
        })
    }

    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    /// 서버 시간 보정이 적용된 타임스탬프(밀리초).
    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// HMAC-SHA256으로 쿼리 문자열 서명.
    fn sign(&self, query: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Config(format!("invalid API secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// 파라미터에서 쿼리 문자열 생성.
    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// 단일 요청. GET/DELETE는 쿼리 문자열, POST/PUT은 form 본문으로 보냅니다.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
        auth: Auth,
    ) -> ApiReply<T> {
        let mut params = params;
        if auth == Auth::Signed {
            params.push(("timestamp", self.timestamp_ms().to_string()));
            params.push(("recvWindow", self.config.recv_window.to_string()));
        }

        let mut query = Self::build_query(&params);
        if auth == Auth::Signed {
            match self.sign(&query) {
                Ok(signature) => {
                    if !query.is_empty() {
                        query.push('&');
                    }
                    query.push_str("signature=");
                    query.push_str(&signature);
                }
                Err(e) => return ApiReply::err(e),
            }
        }

        let url = format!("{}{}", self.config.rest_base_url(), endpoint);
        let in_body = matches!(method, Method::POST | Method::PUT);
        debug!(method = %method, endpoint, "Binance request");

        let mut request = if in_body || query.is_empty() {
            self.client.request(method, &url)
        } else {
            self.client.request(method, format!("{}?{}", url, query))
        };
        if auth != Auth::None {
            request = request.header("X-MBX-APIKEY", &self.config.api_key);
        }
        if in_body {
            request = request
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(query);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ApiReply::err(e.into()),
        };

        let used_weight = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok());
        let status = response.status();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ApiReply::new(Err(e.into()), used_weight),
        };

        let result = if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                warn!(endpoint, error = %e, "Failed to parse response");
                ExchangeError::Parse(format!("{endpoint}: {e}"))
            })
        } else {
            Err(error_from_response(status.as_u16(), &body))
        };

        ApiReply::new(result, used_weight)
    }
}

#[async_trait]
impl FuturesApi for BinanceFuturesClient {
    fn name(&self) -> &str {
        if self.config.testnet {
            "Binance Futures Testnet"
        } else {
            "Binance Futures"
        }
    }

    async fn server_time(&self) -> ApiReply<i64> {
        let reply: ApiReply<BinanceServerTime> = self
            .send(Method::GET, "/fapi/v1/time", Vec::new(), Auth::None)
            .await;
        let reply = reply.map(|t| t.server_time);
        if let Ok(server_time) = &reply.result {
            let offset = server_time - Utc::now().timestamp_millis();
            self.time_offset_ms.store(offset, Ordering::Relaxed);
            debug!(offset_ms = offset, "Server time offset updated");
        }
        reply
    }

    async fn exchange_info(&self, symbol: &str) -> ApiReply<SymbolFilters> {
        let reply: ApiReply<BinanceExchangeInfo> = self
            .send(Method::GET, "/fapi/v1/exchangeInfo", Vec::new(), Auth::None)
            .await;

        let used_weight = reply.used_weight;
        let result = reply.result.and_then(|info| {
            let found = info
                .symbols
                .into_iter()
                .find(|s| s.symbol == symbol)
                .ok_or_else(|| {
                    ExchangeError::Config(format!("symbol {symbol} not found in exchange info"))
                })?;

            let mut filters = SymbolFilters {
                symbol: found.symbol,
                tick_size: Decimal::ZERO,
                step_size: Decimal::ZERO,
                min_qty: Decimal::ZERO,
                min_notional: Decimal::ZERO,
                price_precision: found.price_precision,
                quantity_precision: found.quantity_precision,
            };
            for filter in found.filters {
                match filter {
                    BinanceFilter::Price { tick_size } => filters.tick_size = tick_size,
                    BinanceFilter::LotSize { step_size, min_qty } => {
                        filters.step_size = step_size;
                        filters.min_qty = min_qty;
                    }
                    BinanceFilter::MinNotional { notional } => filters.min_notional = notional,
                    BinanceFilter::Other => {}
                }
            }
            Ok(filters)
        });

        ApiReply::new(result, used_weight)
    }

    async fn set_position_mode(&self, dual_side: bool) -> ApiReply<()> {
        let reply: ApiReply<serde_json::Value> = self
            .send(
                Method::POST,
                "/fapi/v1/positionSide/dual",
                vec![("dualSidePosition", dual_side.to_string())],
                Auth::Signed,
            )
            .await;
        reply.map(|_| ())
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> ApiReply<()> {
        let reply: ApiReply<serde_json::Value> = self
            .send(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol", symbol.to_string()),
                    ("marginType", margin_type.as_str().to_string()),
                ],
                Auth::Signed,
            )
            .await;
        reply.map(|_| ())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ApiReply<u32> {
        let reply: ApiReply<BinanceLeverage> = self
            .send(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
                Auth::Signed,
            )
            .await;
        reply.map(|l| l.leverage)
    }

    async fn balance(&self, asset: &str) -> ApiReply<Balance> {
        let reply: ApiReply<Vec<BinanceBalance>> = self
            .send(Method::GET, "/fapi/v2/balance", Vec::new(), Auth::Signed)
            .await;
        reply.map(|balances| {
            balances
                .into_iter()
                .find(|b| b.asset == asset)
                .map(|b| Balance::new(b.asset, b.balance, b.available_balance))
                .unwrap_or_else(|| Balance::empty(asset))
        })
    }

    async fn positions(&self, symbol: &str) -> ApiReply<Vec<PositionSnapshot>> {
        let reply: ApiReply<Vec<BinancePositionRisk>> = self
            .send(
                Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol", symbol.to_string())],
                Auth::Signed,
            )
            .await;
        reply.map(|positions| {
            positions
                .into_iter()
                .filter(|p| p.symbol == symbol)
                .filter_map(|p| {
                    let side = PositionSide::from_exchange(&p.position_side)?;
                    Some(PositionSnapshot {
                        symbol: p.symbol,
                        position_side: side,
                        amount: p.position_amt.abs(),
                        entry_price: p.entry_price,
                        unrealized_pnl: p.unrealized_profit,
                    })
                })
                .collect()
        })
    }

    async fn klines(&self, symbol: &str, interval: Timeframe, limit: u32) -> ApiReply<Vec<Candle>> {
        let reply: ApiReply<Vec<BinanceKline>> = self
            .send(
                Method::GET,
                "/fapi/v1/klines",
                vec![
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_binance_interval().to_string()),
                    ("limit", limit.to_string()),
                ],
                Auth::None,
            )
            .await;

        let now_ms = Utc::now().timestamp_millis();
        reply.map(|klines| {
            klines
                .into_iter()
                .map(|k| Candle {
                    open_time: millis_to_utc(k.0),
                    close_time: millis_to_utc(k.6),
                    open: k.1,
                    high: k.2,
                    low: k.3,
                    close: k.4,
                    volume: k.5,
                    closed: k.6 < now_ms,
                })
                .collect()
        })
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> ApiReply<OrderAck> {
        let reply: ApiReply<BinanceOrderResponse> = self
            .send(
                Method::POST,
                "/fapi/v1/order",
                vec![
                    ("symbol", request.symbol.clone()),
                    ("side", request.side.as_str().to_string()),
                    ("positionSide", request.position_side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", request.quantity.normalize().to_string()),
                    ("newClientOrderId", request.client_order_id.clone()),
                    ("newOrderRespType", "RESULT".to_string()),
                ],
                Auth::Signed,
            )
            .await;
        reply.map(|r| OrderAck {
            order_id: r.order_id.to_string(),
            client_order_id: r.client_order_id,
            status: r.status,
            executed_qty: r.executed_qty,
            avg_price: r.avg_price,
        })
    }

    async fn place_protective_order(
        &self,
        request: &ProtectiveOrderRequest,
    ) -> ApiReply<ProtectiveOrder> {
        let reply: ApiReply<BinanceAlgoOrderResponse> = self
            .send(
                Method::POST,
                "/fapi/v1/algoOrder",
                vec![
                    ("algoType", "CONDITIONAL".to_string()),
                    ("symbol", request.symbol.clone()),
                    ("side", request.order_side().as_str().to_string()),
                    ("positionSide", request.position_side.as_str().to_string()),
                    ("type", request.kind.exchange_order_type().to_string()),
                    ("triggerPrice", request.trigger_price.normalize().to_string()),
                    ("closePosition", "true".to_string()),
                    ("workingType", "MARK_PRICE".to_string()),
                ],
                Auth::Signed,
            )
            .await;
        reply.map(|r| ProtectiveOrder {
            order_id: r.algo_id.to_string(),
            symbol: request.symbol.clone(),
            position_side: request.position_side,
            kind: request.kind,
            trigger_price: request.trigger_price,
            created_at: Utc::now(),
        })
    }

    async fn cancel_protective_order(&self, symbol: &str, order_id: &str) -> ApiReply<()> {
        let reply: ApiReply<serde_json::Value> = self
            .send(
                Method::DELETE,
                "/fapi/v1/algoOrder",
                vec![
                    ("symbol", symbol.to_string()),
                    ("algoId", order_id.to_string()),
                ],
                Auth::Signed,
            )
            .await;
        reply.map(|_| ())
    }

    async fn open_protective_orders(&self, symbol: &str) -> ApiReply<Vec<ProtectiveOrder>> {
        let reply: ApiReply<Vec<BinanceAlgoOrder>> = self
            .send(
                Method::GET,
                "/fapi/v1/openAlgoOrders",
                vec![("symbol", symbol.to_string())],
                Auth::Signed,
            )
            .await;
        reply.map(|orders| {
            orders
                .into_iter()
                .filter_map(|o| {
                    let position_side = PositionSide::from_exchange(&o.position_side)?;
                    let kind = ProtectiveKind::from_exchange_order_type(&o.order_type)?;
                    Some(ProtectiveOrder {
                        order_id: o.algo_id.to_string(),
                        symbol: o.symbol,
                        position_side,
                        kind,
                        trigger_price: o.trigger_price,
                        created_at: millis_to_utc(o.create_time),
                    })
                })
                .collect()
        })
    }

    async fn open_orders(&self, symbol: &str) -> ApiReply<Vec<OpenOrder>> {
        let reply: ApiReply<Vec<BinanceOpenOrder>> = self
            .send(
                Method::GET,
                "/fapi/v1/openOrders",
                vec![("symbol", symbol.to_string())],
                Auth::Signed,
            )
            .await;
        reply.map(|orders| {
            orders
                .into_iter()
                .map(|o| OpenOrder {
                    order_id: o.order_id.to_string(),
                    client_order_id: o.client_order_id,
                    position_side: PositionSide::from_exchange(&o.position_side),
                    side: o.side,
                    order_type: o.order_type,
                    status: o.status,
                    orig_qty: o.orig_qty,
                    executed_qty: o.executed_qty,
                })
                .collect()
        })
    }

    async fn create_listen_key(&self) -> ApiReply<String> {
        let reply: ApiReply<BinanceListenKey> = self
            .send(Method::POST, "/fapi/v1/listenKey", Vec::new(), Auth::ApiKey)
            .await;
        reply.map(|k| k.listen_key)
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> ApiReply<()> {
        let reply: ApiReply<serde_json::Value> = self
            .send(
                Method::PUT,
                "/fapi/v1/listenKey",
                vec![("listenKey", listen_key.to_string())],
                Auth::ApiKey,
            )
            .await;
        reply.map(|_| ())
    }

    async fn close_listen_key(&self, listen_key: &str) -> ApiReply<()> {
        let reply: ApiReply<serde_json::Value> = self
            .send(
                Method::DELETE,
                "/fapi/v1/listenKey",
                vec![("listenKey", listen_key.to_string())],
                Auth::ApiKey,
            )
            .await;
        reply.map(|_| ())
    }
}
