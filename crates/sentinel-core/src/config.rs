//! 설정 관리.
//!
//! 설정은 선택적 TOML 파일과 `SENTINEL__` 접두사 환경 변수에서 로드됩니다.
//! 예: `SENTINEL__TRADING__LEVERAGE=5`, `SENTINEL__CONNECTION__FAIL_FAST=true`.
//! 모든 필드는 기본값을 가지므로 파일 없이도 실행할 수 있습니다.

use crate::error::{CoreError, CoreResult};
use crate::types::Timeframe;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 거래소 엔드포인트 설정
    pub exchange: ExchangeConfig,
    /// 매매/리스크 설정
    pub trading: TradingConfig,
    /// API 게이트웨이 (재시도, 요청 가중치) 설정
    pub gateway: GatewayConfig,
    /// 스트림 연결/재연결/워치독 설정
    pub connection: ConnectionConfig,
    /// 이벤트 디스패처 설정
    pub dispatcher: DispatcherConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 거래소 엔드포인트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// 테스트넷 사용 여부
    pub testnet: bool,
    /// REST API 기본 URL (비어 있으면 testnet 여부에 따라 결정)
    pub rest_base_url: Option<String>,
    /// WebSocket 기본 URL (비어 있으면 testnet 여부에 따라 결정)
    pub ws_base_url: Option<String>,
    /// 서명 요청의 recvWindow (밀리초)
    pub recv_window_ms: u64,
    /// HTTP 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            rest_base_url: None,
            ws_base_url: None,
            recv_window_ms: 5000,
            request_timeout_secs: 10,
        }
    }
}

/// 마진 타입.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    /// 격리 마진
    Isolated,
    /// 교차 마진
    Crossed,
}

impl MarginType {
    /// 거래소 파라미터 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        }
    }
}

impl std::fmt::Display for MarginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 매매 및 리스크 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TradingConfig {
    /// 거래 심볼 (예: BTCUSDT)
    pub symbol: String,
    /// 증거금 자산
    pub margin_asset: String,
    /// 캔들 간격
    pub interval: Timeframe,
    /// 레버리지
    pub leverage: u32,
    /// 마진 타입
    pub margin_type: MarginType,
    /// 거래당 최대 손실 (잔고 대비 %, 1 = 1%)
    pub risk_percentage: Decimal,
    /// 최대 포지션 비율 (잔고 × 레버리지 대비, 0.5 = 50%)
    pub max_position_ratio: Decimal,
    /// 익절 산출용 손익비
    pub risk_reward_ratio: Decimal,
    /// 진입가 대비 최대 손절 거리 비율 (0.02 = 2%)
    pub max_loss_ratio: Decimal,
    /// 보관할 최대 캔들 수
    pub candle_capacity: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            margin_asset: "USDT".to_string(),
            interval: Timeframe::M15,
            leverage: 3,
            margin_type: MarginType::Isolated,
            risk_percentage: dec!(1),
            max_position_ratio: dec!(0.5),
            risk_reward_ratio: dec!(1.5),
            max_loss_ratio: dec!(0.02),
            candle_capacity: 500,
        }
    }
}

/// API 게이트웨이 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 호출당 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 재시도 기본 지연 (밀리초)
    pub base_delay_ms: u64,
    /// 재시도 최대 지연 (밀리초)
    pub max_delay_ms: u64,
    /// 재시도 지연에 더하는 최대 지터 (밀리초)
    pub jitter_ms: u64,
    /// 1분 요청 가중치 한도
    pub weight_limit: u32,
    /// 한도 75% 이상일 때 지연 (밀리초)
    pub soft_throttle_ms: u64,
    /// 한도 90% 이상일 때 지연 (밀리초)
    pub hard_throttle_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ms: 250,
            weight_limit: 2400,
            soft_throttle_ms: 500,
            hard_throttle_ms: 3000,
        }
    }
}

/// 스트림 연결 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 첫 재연결 지연 (밀리초)
    pub initial_delay_ms: u64,
    /// 재연결 지연 배수
    pub backoff_factor: f64,
    /// 재연결 최대 지연 (밀리초)
    pub max_delay_ms: u64,
    /// 연속 재연결 최대 시도 횟수
    pub max_attempts: u32,
    /// 수신 없음 허용 시간 (초)
    pub watchdog_timeout_secs: u64,
    /// 워치독 점검 주기 (초)
    pub watchdog_interval_secs: u64,
    /// 워치독 만료 시 재연결 대신 프로세스를 종료할지 여부
    pub fail_fast: bool,
    /// 이벤트 큐 용량
    pub queue_capacity: usize,
    /// listen key 갱신 주기 (초)
    pub listen_key_keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            max_attempts: 10,
            watchdog_timeout_secs: 120,
            watchdog_interval_secs: 10,
            fail_fast: false,
            queue_capacity: 1000,
            listen_key_keepalive_secs: 30 * 60,
        }
    }
}

/// 이벤트 디스패처 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 큐 폴링 타임아웃 (밀리초)
    pub poll_timeout_ms: u64,
    /// 포지션 동기화 주기 (초)
    pub sync_interval_secs: u64,
    /// 잔고 갱신 주기 (초)
    pub balance_refresh_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            sync_interval_secs: 300,
            balance_refresh_interval_secs: 60,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
    /// 파일명/줄 번호 포함 여부
    pub with_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            with_file: false,
        }
    }
}

impl GatewayConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ConnectionConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn listen_key_keepalive(&self) -> Duration {
        Duration::from_secs(self.listen_key_keepalive_secs)
    }
}

impl DispatcherConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn balance_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_interval_secs)
    }
}

impl AppConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드하고 검증합니다.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("SENTINEL")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 의미 없는 설정 값을 거부합니다.
    pub fn validate(&self) -> CoreResult<()> {
        let t = &self.trading;
        if t.symbol.trim().is_empty() {
            return Err(CoreError::Config("trading.symbol is empty".into()));
        }
        if t.leverage == 0 || t.leverage > 125 {
            return Err(CoreError::Config(format!(
                "trading.leverage must be in 1..=125, got {}",
                t.leverage
            )));
        }
        if t.risk_percentage <= Decimal::ZERO || t.risk_percentage > dec!(100) {
            return Err(CoreError::Config(format!(
                "trading.risk_percentage must be in (0, 100], got {}",
                t.risk_percentage
            )));
        }
        if t.max_position_ratio <= Decimal::ZERO {
            return Err(CoreError::Config("trading.max_position_ratio must be positive".into()));
        }
        if t.risk_reward_ratio <= Decimal::ZERO {
            return Err(CoreError::Config("trading.risk_reward_ratio must be positive".into()));
        }
        if t.max_loss_ratio <= Decimal::ZERO || t.max_loss_ratio >= Decimal::ONE {
            return Err(CoreError::Config(format!(
                "trading.max_loss_ratio must be in (0, 1), got {}",
                t.max_loss_ratio
            )));
        }
        if t.candle_capacity < 2 {
            return Err(CoreError::Config("trading.candle_capacity must be at least 2".into()));
        }

        let g = &self.gateway;
        if g.max_attempts == 0 {
            return Err(CoreError::Config("gateway.max_attempts must be at least 1".into()));
        }
        if g.weight_limit == 0 {
            return Err(CoreError::Config("gateway.weight_limit must be positive".into()));
        }
        if g.base_delay_ms > g.max_delay_ms {
            return Err(CoreError::Config(
                "gateway.base_delay_ms exceeds gateway.max_delay_ms".into(),
            ));
        }

        let c = &self.connection;
        if c.backoff_factor.is_nan() || c.backoff_factor < 1.0 {
            return Err(CoreError::Config(format!(
                "connection.backoff_factor must be >= 1, got {}",
                c.backoff_factor
            )));
        }
        if c.max_attempts == 0 {
            return Err(CoreError::Config("connection.max_attempts must be at least 1".into()));
        }
        if c.queue_capacity == 0 {
            return Err(CoreError::Config("connection.queue_capacity must be positive".into()));
        }
        if c.watchdog_interval_secs == 0 || c.watchdog_timeout_secs == 0 {
            return Err(CoreError::Config("connection watchdog durations must be positive".into()));
        }

        if self.dispatcher.poll_timeout_ms == 0 || self.dispatcher.poll_timeout_ms >= 1000 {
            return Err(CoreError::Config(
                "dispatcher.poll_timeout_ms must be in 1..1000".into(),
            ));
        }

        Ok(())
    }
}
