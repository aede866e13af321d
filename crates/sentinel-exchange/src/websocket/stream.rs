//! Binance 선물 WebSocket 스트림 연결.
//!
//! 하나의 스트림 세션은 두 개의 소켓으로 구성됩니다.
//! - 시장 데이터: `<symbol>@kline_<interval>`
//! - 사용자 데이터: `<listenKey>`
//!
//! 리더 태스크는 메시지를 디코딩해 bounded 큐에 넣는 일만 합니다.
//! 비즈니스 로직은 디스패처가 실행합니다.

use crate::error::{ExchangeError, ExchangeResult};
use crate::gateway::{ApiGateway, CallOutcome, GatewayError};
use crate::traits::FuturesApi;
use crate::websocket::events::{parse_market_message, parse_user_message, MarketEvent, UserDataEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use sentinel_core::Timeframe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 소켓 연결 타임아웃.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 만료된 listen key에 대한 keepalive 응답 코드.
const LISTEN_KEY_NOT_FOUND: i32 = -1125;

// ============================================================================
// 수신 시각 / 큐
// ============================================================================

/// 마지막 수신 시각. 리더 태스크가 갱신하고 워치독이 읽습니다.
#[derive(Debug, Clone)]
pub struct Liveness {
    inner: Arc<LivenessInner>,
}

#[derive(Debug)]
struct LivenessInner {
    base: Instant,
    /// base 이후 경과 밀리초
    last_ms: AtomicU64,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                base: Instant::now(),
                last_ms: AtomicU64::new(0),
            }),
        }
    }

    /// 지금 수신한 것으로 기록.
    pub fn touch(&self) {
        let now = self.inner.base.elapsed().as_millis() as u64;
        self.inner.last_ms.store(now, Ordering::Release);
    }

    /// 마지막 수신 이후 경과 시간.
    pub fn idle(&self) -> Duration {
        let now = self.inner.base.elapsed().as_millis() as u64;
        let last = self.inner.last_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }
}

/// 리더 태스크 쪽 큐 송신부. 재연결 사이에도 유지됩니다.
#[derive(Debug, Clone)]
pub struct StreamSinks {
    pub market_tx: mpsc::Sender<MarketEvent>,
    pub account_tx: mpsc::Sender<UserDataEvent>,
    pub liveness: Liveness,
    /// 이벤트 유실 시 true. 디스패처가 전체 동기화 후 내립니다.
    pub resync: Arc<AtomicBool>,
}

/// 디스패처 쪽 큐 수신부.
#[derive(Debug)]
pub struct StreamQueues {
    pub market_rx: mpsc::Receiver<MarketEvent>,
    pub account_rx: mpsc::Receiver<UserDataEvent>,
    pub resync: Arc<AtomicBool>,
}

impl StreamQueues {
    /// 유실 플래그를 읽고 내립니다.
    pub fn take_resync(&self) -> bool {
        self.resync.swap(false, Ordering::AcqRel)
    }
}

/// 시장/계정 큐 한 쌍을 생성합니다.
pub fn stream_channels(capacity: usize) -> (StreamSinks, StreamQueues) {
    let (market_tx, market_rx) = mpsc::channel(capacity);
    let (account_tx, account_rx) = mpsc::channel(capacity);
    let resync = Arc::new(AtomicBool::new(false));

    (
        StreamSinks {
            market_tx,
            account_tx,
            liveness: Liveness::new(),
            resync: resync.clone(),
        },
        StreamQueues {
            market_rx,
            account_rx,
            resync,
        },
    )
}

// ============================================================================
// 세션
// ============================================================================

/// 세션 종료 사유.
#[derive(Debug)]
pub enum SessionEnd {
    /// 서버가 닫았거나 스트림이 끝남
    Closed(String),
    /// 전송/keepalive 에러
    Error(ExchangeError),
    /// listen key 만료
    ListenKeyExpired,
    /// 큐 수신부가 사라짐 (엔진 종료)
    Shutdown,
}

/// 세션 태스크가 종료를 알리는 핸들.
#[derive(Debug, Clone)]
pub struct SessionEndSender(mpsc::Sender<SessionEnd>);

impl SessionEndSender {
    /// 종료 사유 전달. 먼저 도착한 사유만 의미가 있습니다.
    pub fn end(&self, reason: SessionEnd) {
        let _ = self.0.try_send(reason);
    }
}

/// 연결된 스트림 세션.
#[derive(Debug)]
pub struct StreamSession {
    cancel: CancellationToken,
    ended_rx: mpsc::Receiver<SessionEnd>,
    tasks: Vec<JoinHandle<()>>,
    listen_key: Option<String>,
}

impl StreamSession {
    /// 빈 세션과 종료 핸들을 생성합니다.
    pub fn new(listen_key: Option<String>) -> (Self, SessionEndSender) {
        let (ended_tx, ended_rx) = mpsc::channel(4);
        (
            Self {
                cancel: CancellationToken::new(),
                ended_rx,
                tasks: Vec::new(),
                listen_key,
            },
            SessionEndSender(ended_tx),
        )
    }

    /// 세션 태스크가 감시할 취소 토큰.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn add_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn listen_key(&self) -> Option<&str> {
        self.listen_key.as_deref()
    }

    /// 세션이 끝날 때까지 대기.
    pub async fn closed(&mut self) -> SessionEnd {
        self.ended_rx
            .recv()
            .await
            .unwrap_or_else(|| SessionEnd::Closed("session tasks ended".to_string()))
    }

    /// 태스크를 중지하고 종료를 기다립니다.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// 스트림 세션 생성기. 슈퍼바이저가 연결/재연결에 사용합니다.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// 새 세션 연결. 큐는 호출자가 소유하며 세션 간에 재사용됩니다.
    async fn connect(&self, sinks: &StreamSinks) -> ExchangeResult<StreamSession>;

    /// 세션 정리.
    async fn disconnect(&self, session: StreamSession) {
        session.shutdown().await;
    }
}

// ============================================================================
// Binance 구현
// ============================================================================

/// Binance 선물 스트림 커넥터.
pub struct BinanceStreamConnector {
    api: Arc<dyn FuturesApi>,
    gateway: Arc<ApiGateway>,
    ws_base_url: String,
    symbol: String,
    interval: Timeframe,
    keepalive_interval: Duration,
}

impl BinanceStreamConnector {
    pub fn new(
        api: Arc<dyn FuturesApi>,
        gateway: Arc<ApiGateway>,
        ws_base_url: impl Into<String>,
        symbol: impl Into<String>,
        interval: Timeframe,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            api,
            gateway,
            ws_base_url: ws_base_url.into(),
            symbol: symbol.into(),
            interval,
            keepalive_interval,
        }
    }

    /// 시장 데이터 스트림 URL.
    pub fn market_stream_url(&self) -> String {
        format!(
            "{}/ws/{}@kline_{}",
            self.ws_base_url.trim_end_matches('/'),
            self.symbol.to_lowercase(),
            self.interval.to_binance_interval()
        )
    }

    fn user_stream_url(&self, listen_key: &str) -> String {
        format!("{}/ws/{}", self.ws_base_url.trim_end_matches('/'), listen_key)
    }

    async fn create_listen_key(&self) -> ExchangeResult<String> {
        let api = self.api.as_ref();
        match self
            .gateway
            .call("create_listen_key", move || api.create_listen_key())
            .await
        {
            Ok(CallOutcome::Success(key)) => Ok(key),
            Ok(CallOutcome::NoOpSuccess { error, .. }) | Ok(CallOutcome::NoOpFailure(error)) => {
                Err(error)
            }
            Err(e) => Err(e.into_exchange_error()),
        }
    }

    async fn close_listen_key(&self, listen_key: &str) {
        let api = self.api.as_ref();
        match self
            .gateway
            .call("close_listen_key", move || api.close_listen_key(listen_key))
            .await
        {
            Ok(outcome) if outcome.is_success() => debug!("Listen key closed"),
            Ok(outcome) => {
                if let Some(err) = outcome.error() {
                    debug!(error = %err, "Listen key close rejected");
                }
            }
            Err(e) => debug!(error = %e, "Listen key close skipped"),
        }
    }
}

#[async_trait]
impl StreamConnector for BinanceStreamConnector {
    async fn connect(&self, sinks: &StreamSinks) -> ExchangeResult<StreamSession> {
        let listen_key = self.create_listen_key().await?;

        info!(symbol = %self.symbol, interval = %self.interval, "Connecting Binance futures streams");
        let sockets = match open_socket(&self.market_stream_url()).await {
            Ok(market_ws) => open_socket(&self.user_stream_url(&listen_key))
                .await
                .map(|user_ws| (market_ws, user_ws)),
            Err(e) => Err(e),
        };
        let (market_ws, user_ws) = match sockets {
            Ok(sockets) => sockets,
            Err(e) => {
                self.close_listen_key(&listen_key).await;
                return Err(e);
            }
        };

        let (mut session, ended) = StreamSession::new(Some(listen_key.clone()));
        let cancel = session.cancel_token();

        session.add_task(tokio::spawn(read_frames(
            "market",
            market_ws,
            sinks.clone(),
            ended.clone(),
            cancel.clone(),
            forward_market,
        )));
        session.add_task(tokio::spawn(read_frames(
            "user",
            user_ws,
            sinks.clone(),
            ended.clone(),
            cancel.clone(),
            forward_user,
        )));
        session.add_task(tokio::spawn(keepalive_loop(
            self.api.clone(),
            self.gateway.clone(),
            listen_key,
            self.keepalive_interval,
            ended,
            cancel,
        )));

        info!("Binance futures streams connected");
        Ok(session)
    }

    async fn disconnect(&self, session: StreamSession) {
        let listen_key = session.listen_key().map(str::to_string);
        session.shutdown().await;
        if let Some(key) = listen_key {
            self.close_listen_key(&key).await;
        }
        info!("Binance futures streams disconnected");
    }
}

async fn open_socket(url: &str) -> ExchangeResult<WsStream> {
    match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ExchangeError::Timeout(
            "WebSocket connect timed out".to_string(),
        )),
    }
}

/// 텍스트 메시지 처리 결과.
enum Flow {
    Continue,
    Stop(SessionEnd),
}

/// 큐에 넣습니다. 가득 차면 버리고 재동기화를 요청합니다.
fn enqueue<T>(tx: &mpsc::Sender<T>, event: T, resync: &AtomicBool, queue: &'static str) -> Flow {
    match tx.try_send(event) {
        Ok(()) => Flow::Continue,
        Err(TrySendError::Full(_)) => {
            warn!(queue, "Event queue full, dropping event and requesting resync");
            resync.store(true, Ordering::Release);
            Flow::Continue
        }
        Err(TrySendError::Closed(_)) => Flow::Stop(SessionEnd::Shutdown),
    }
}

fn forward_market(text: &str, sinks: &StreamSinks) -> Flow {
    match parse_market_message(text) {
        Ok(Some(event)) => enqueue(&sinks.market_tx, event, &sinks.resync, "market"),
        Ok(None) => Flow::Continue,
        Err(e) => {
            warn!(error = %e, "Failed to decode market message");
            Flow::Continue
        }
    }
}

fn forward_user(text: &str, sinks: &StreamSinks) -> Flow {
    match parse_user_message(text) {
        Ok(UserDataEvent::ListenKeyExpired { .. }) => {
            warn!("Listen key expired");
            Flow::Stop(SessionEnd::ListenKeyExpired)
        }
        Ok(UserDataEvent::Unknown) => {
            debug!("Ignoring unknown user data event");
            Flow::Continue
        }
        Ok(event) => enqueue(&sinks.account_tx, event, &sinks.resync, "account"),
        Err(e) => {
            warn!(error = %e, "Failed to decode user data message");
            Flow::Continue
        }
    }
}

async fn read_frames(
    stream: &'static str,
    mut ws: WsStream,
    sinks: StreamSinks,
    ended: SessionEndSender,
    cancel: CancellationToken,
    on_text: fn(&str, &StreamSinks) -> Flow,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                debug!(stream, "Reader stopped");
                return;
            }
            frame = ws.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(stream, error = %e, "WebSocket read error");
                ended.end(SessionEnd::Error(e.into()));
                return;
            }
            None => {
                ended.end(SessionEnd::Closed(format!("{stream} stream ended")));
                return;
            }
        };

        // ping/pong 포함 모든 프레임이 수신으로 간주됨
        sinks.liveness.touch();

        let flow = match message {
            Message::Text(text) => on_text(&text, &sinks),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => on_text(text, &sinks),
                Err(_) => Flow::Continue,
            },
            Message::Ping(payload) => {
                if let Err(e) = ws.send(Message::Pong(payload)).await {
                    Flow::Stop(SessionEnd::Error(e.into()))
                } else {
                    Flow::Continue
                }
            }
            Message::Pong(_) | Message::Frame(_) => Flow::Continue,
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{stream} closed: {} {}", f.code, f.reason))
                    .unwrap_or_else(|| format!("{stream} closed"));
                Flow::Stop(SessionEnd::Closed(reason))
            }
        };

        if let Flow::Stop(end) = flow {
            ended.end(end);
            return;
        }
    }
}

async fn keepalive_loop(
    api: Arc<dyn FuturesApi>,
    gateway: Arc<ApiGateway>,
    listen_key: String,
    every: Duration,
    ended: SessionEndSender,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    let api = api.as_ref();
    let key = listen_key.as_str();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = gateway
            .call("keepalive_listen_key", move || api.keepalive_listen_key(key))
            .await;

        match result {
            Ok(CallOutcome::NoOpFailure(err)) if err.api_code() == Some(LISTEN_KEY_NOT_FOUND) => {
                warn!("Listen key no longer exists");
                ended.end(SessionEnd::ListenKeyExpired);
                return;
            }
            Ok(CallOutcome::NoOpFailure(err)) => {
                warn!(error = %err, "Listen key keepalive rejected");
            }
            Ok(_) => debug!("Listen key extended"),
            Err(GatewayError::Cancelled { .. }) => return,
            Err(e) => {
                ended.end(SessionEnd::Error(e.into_exchange_error()));
                return;
            }
        }
    }
}
