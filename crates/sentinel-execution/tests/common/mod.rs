//! In-memory futures exchange shared by the execution integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{
    Balance, Candle, MarginType, MarketOrderRequest, OpenOrder, OrderAck, OrderStatus,
    PositionSide, PositionSnapshot, ProtectiveOrder, ProtectiveOrderRequest, SignalCandidate,
    SignalCandidates, SignalSource, SymbolFilters, Timeframe,
};
use sentinel_execution::{NotificationEvent, Notifier};
use sentinel_exchange::{
    ApiGateway, ApiReply, ExchangeError, FuturesApi, RateLimiter, RetryPolicy,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const SYMBOL: &str = "BTCUSDT";

pub fn filters() -> SymbolFilters {
    SymbolFilters {
        symbol: SYMBOL.to_string(),
        tick_size: dec!(0.1),
        step_size: dec!(0.001),
        min_qty: dec!(0.001),
        min_notional: dec!(5),
        price_precision: 2,
        quantity_precision: 3,
    }
}

pub fn timeout_error() -> ExchangeError {
    ExchangeError::Timeout("request timed out".to_string())
}

pub fn api_error(code: i32, message: &str) -> ExchangeError {
    ExchangeError::Api {
        code,
        message: message.to_string(),
    }
}

/// Exchange state and failure injection.
pub struct MockState {
    pub filters: SymbolFilters,
    pub balance: Balance,
    pub mark_price: Decimal,
    pub positions: HashMap<PositionSide, (Decimal, Decimal)>,
    pub protective: Vec<ProtectiveOrder>,
    pub open_orders: Vec<OpenOrder>,
    pub klines: Vec<Candle>,
    /// Errors returned by successive market orders.
    pub market_failures: VecDeque<ExchangeError>,
    /// Number of failing market orders that still fill (lost response).
    pub lost_fills: u32,
    /// Fraction of a lost-response order that actually fills.
    pub fill_ratio: Decimal,
    /// Client order ids of every market order attempt.
    pub market_client_ids: Vec<String>,
    pub protective_failures: VecDeque<ExchangeError>,
    pub cancel_failures: VecDeque<ExchangeError>,
    pub query_failures: VecDeque<ExchangeError>,
    pub position_mode_error: Option<ExchangeError>,
    pub margin_type_error: Option<ExchangeError>,
    pub applied_leverage: Option<u32>,
    pub calls: HashMap<&'static str, u32>,
    next_id: u64,
}

impl MockState {
    fn count(&mut self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fill(&mut self, side: PositionSide, qty: Decimal, price: Decimal) {
        let entry = self.positions.entry(side).or_insert((Decimal::ZERO, Decimal::ZERO));
        let amount = entry.0 + qty;
        entry.1 = (entry.0 * entry.1 + qty * price) / amount;
        entry.0 = amount;
    }

    fn snapshots(&self) -> Vec<PositionSnapshot> {
        PositionSide::BOTH
            .into_iter()
            .map(|side| {
                let (amount, entry) = self
                    .positions
                    .get(&side)
                    .copied()
                    .unwrap_or((Decimal::ZERO, Decimal::ZERO));
                PositionSnapshot {
                    symbol: SYMBOL.to_string(),
                    position_side: side,
                    amount,
                    entry_price: entry,
                    unrealized_pnl: Decimal::ZERO,
                }
            })
            .collect()
    }
}

pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                filters: filters(),
                balance: Balance::new("USDT", dec!(1000), dec!(1000)),
                mark_price: dec!(100),
                positions: HashMap::new(),
                protective: Vec::new(),
                open_orders: Vec::new(),
                klines: Vec::new(),
                market_failures: VecDeque::new(),
                lost_fills: 0,
                fill_ratio: Decimal::ONE,
                market_client_ids: Vec::new(),
                protective_failures: VecDeque::new(),
                cancel_failures: VecDeque::new(),
                query_failures: VecDeque::new(),
                position_mode_error: None,
                margin_type_error: None,
                applied_leverage: None,
                calls: HashMap::new(),
                next_id: 1000,
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self, op: &str) -> u32 {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    pub fn set_position(&self, side: PositionSide, amount: Decimal, entry: Decimal) {
        self.state().positions.insert(side, (amount, entry));
    }

    pub fn position(&self, side: PositionSide) -> Option<(Decimal, Decimal)> {
        self.state()
            .positions
            .get(&side)
            .copied()
            .filter(|(amount, _)| !amount.is_zero())
    }

    /// Places a live protective order directly on the exchange side.
    pub fn add_protective(
        &self,
        side: PositionSide,
        kind: sentinel_core::ProtectiveKind,
        trigger_price: Decimal,
        age_secs: i64,
    ) -> String {
        let mut state = self.state();
        let id = state.next_id().to_string();
        state.protective.push(ProtectiveOrder {
            order_id: id.clone(),
            symbol: SYMBOL.to_string(),
            position_side: side,
            kind,
            trigger_price,
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
        });
        id
    }

    pub fn protective_ids(&self) -> Vec<String> {
        self.state()
            .protective
            .iter()
            .map(|o| o.order_id.clone())
            .collect()
    }

    pub fn set_klines(&self, count: usize) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        self.state().klines = (0..count)
            .map(|i| {
                let open_time = start + ChronoDuration::minutes(15 * i as i64);
                candle(open_time, dec!(100), i + 1 < count)
            })
            .collect();
    }

    fn query_failure(&self) -> Option<ExchangeError> {
        self.state().query_failures.pop_front()
    }
}

pub fn candle(open_time: chrono::DateTime<Utc>, close: Decimal, closed: bool) -> Candle {
    Candle {
        open_time,
        close_time: open_time + ChronoDuration::minutes(15) - ChronoDuration::milliseconds(1),
        open: close,
        high: close + dec!(1),
        low: close - dec!(1),
        close,
        volume: dec!(10),
        closed,
    }
}

#[async_trait]
impl FuturesApi for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn server_time(&self) -> ApiReply<i64> {
        self.state().count("server_time");
        ApiReply::ok(Utc::now().timestamp_millis())
    }

    async fn exchange_info(&self, _symbol: &str) -> ApiReply<SymbolFilters> {
        let mut state = self.state();
        state.count("exchange_info");
        ApiReply::ok(state.filters.clone())
    }

    async fn set_position_mode(&self, _dual_side: bool) -> ApiReply<()> {
        let mut state = self.state();
        state.count("set_position_mode");
        match state.position_mode_error.clone() {
            Some(err) => ApiReply::err(err),
            None => ApiReply::ok(()),
        }
    }

    async fn set_margin_type(&self, _symbol: &str, _margin_type: MarginType) -> ApiReply<()> {
        let mut state = self.state();
        state.count("set_margin_type");
        match state.margin_type_error.clone() {
            Some(err) => ApiReply::err(err),
            None => ApiReply::ok(()),
        }
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> ApiReply<u32> {
        let mut state = self.state();
        state.count("set_leverage");
        ApiReply::ok(state.applied_leverage.unwrap_or(leverage))
    }

    async fn balance(&self, _asset: &str) -> ApiReply<Balance> {
        if let Some(err) = self.query_failure() {
            return ApiReply::err(err);
        }
        let mut state = self.state();
        state.count("balance");
        ApiReply::ok(state.balance.clone()).with_weight(5)
    }

    async fn positions(&self, _symbol: &str) -> ApiReply<Vec<PositionSnapshot>> {
        if let Some(err) = self.query_failure() {
            return ApiReply::err(err);
        }
        let mut state = self.state();
        state.count("positions");
        ApiReply::ok(state.snapshots()).with_weight(5)
    }

    async fn klines(&self, _symbol: &str, _interval: Timeframe, limit: u32) -> ApiReply<Vec<Candle>> {
        let mut state = self.state();
        state.count("klines");
        let skip = state.klines.len().saturating_sub(limit as usize);
        ApiReply::ok(state.klines[skip..].to_vec())
    }

    async fn place_market_order(&self, request: &MarketOrderRequest) -> ApiReply<OrderAck> {
        let mut state = self.state();
        state.count("place_market_order");
        state.market_client_ids.push(request.client_order_id.clone());

        if let Some(err) = state.market_failures.pop_front() {
            if state.lost_fills > 0 {
                state.lost_fills -= 1;
                let price = state.mark_price;
                let qty = request.quantity * state.fill_ratio;
                state.fill(request.position_side, qty, price);
            }
            return ApiReply::err(err);
        }

        let price = state.mark_price;
        state.fill(request.position_side, request.quantity, price);
        let id = state.next_id();
        ApiReply::ok(OrderAck {
            order_id: id.to_string(),
            client_order_id: request.client_order_id.clone(),
            status: OrderStatus::Filled,
            executed_qty: request.quantity,
            avg_price: price,
        })
        .with_weight(1)
    }

    async fn place_protective_order(
        &self,
        request: &ProtectiveOrderRequest,
    ) -> ApiReply<ProtectiveOrder> {
        let mut state = self.state();
        state.count("place_protective_order");
        if let Some(err) = state.protective_failures.pop_front() {
            return ApiReply::err(err);
        }

        let id = state.next_id();
        let order = ProtectiveOrder {
            order_id: id.to_string(),
            symbol: request.symbol.clone(),
            position_side: request.position_side,
            kind: request.kind,
            trigger_price: request.trigger_price,
            created_at: Utc::now(),
        };
        state.protective.push(order.clone());
        ApiReply::ok(order)
    }

    async fn cancel_protective_order(&self, _symbol: &str, order_id: &str) -> ApiReply<()> {
        let mut state = self.state();
        state.count("cancel_protective_order");
        if let Some(err) = state.cancel_failures.pop_front() {
            return ApiReply::err(err);
        }

        let before = state.protective.len();
        state.protective.retain(|o| o.order_id != order_id);
        if state.protective.len() == before {
            return ApiReply::err(api_error(-2011, "Unknown order sent."));
        }
        ApiReply::ok(())
    }

    async fn open_protective_orders(&self, _symbol: &str) -> ApiReply<Vec<ProtectiveOrder>> {
        if let Some(err) = self.query_failure() {
            return ApiReply::err(err);
        }
        let mut state = self.state();
        state.count("open_protective_orders");
        ApiReply::ok(state.protective.clone())
    }

    async fn open_orders(&self, _symbol: &str) -> ApiReply<Vec<OpenOrder>> {
        if let Some(err) = self.query_failure() {
            return ApiReply::err(err);
        }
        let mut state = self.state();
        state.count("open_orders");
        ApiReply::ok(state.open_orders.clone())
    }

    async fn create_listen_key(&self) -> ApiReply<String> {
        self.state().count("create_listen_key");
        ApiReply::ok("listen-key".to_string())
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> ApiReply<()> {
        self.state().count("keepalive_listen_key");
        ApiReply::ok(())
    }

    async fn close_listen_key(&self, _listen_key: &str) -> ApiReply<()> {
        self.state().count("close_listen_key");
        ApiReply::ok(())
    }
}

/// Gateway with short, jitter-free retries.
pub fn gateway(shutdown: CancellationToken) -> Arc<ApiGateway> {
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        jitter: Duration::ZERO,
    };
    let limiter = Arc::new(RateLimiter::new(
        2400,
        Duration::from_millis(500),
        Duration::from_secs(3),
    ));
    Arc::new(ApiGateway::new(limiter, policy, shutdown))
}

/// Records every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Emits a candidate on the newest bar with a stop `distance` away from its close.
pub struct ScriptedSignal {
    pub side: Option<PositionSide>,
    pub distance: Decimal,
}

impl SignalSource for ScriptedSignal {
    fn name(&self) -> &str {
        "scripted"
    }

    fn analyze(&self, candles: &[Candle]) -> SignalCandidates {
        let mut candidates = SignalCandidates::default();
        let (Some(side), Some(last)) = (self.side, candles.last()) else {
            return candidates;
        };
        let stop_loss = match side {
            PositionSide::Long => last.close - self.distance,
            PositionSide::Short => last.close + self.distance,
        };
        let candidate = SignalCandidate {
            bar_index: candles.len() - 1,
            stop_loss,
            entry_price: last.close,
        };
        match side {
            PositionSide::Long => candidates.long.push(candidate),
            PositionSide::Short => candidates.short.push(candidate),
        }
        candidates
    }
}
