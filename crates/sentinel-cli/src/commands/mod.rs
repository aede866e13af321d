//! CLI 명령어.

pub mod run;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sentinel_core::{init_logging, AppConfig, LogConfig, Timeframe};
use sentinel_exchange::{BinanceConfig, BinanceFuturesClient, FuturesApi};
use tracing::info;

/// 설정 파일과 명령행 재정의.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// 설정 파일 (TOML)
    pub config_path: Option<PathBuf>,
    pub symbol: Option<String>,
    pub leverage: Option<u32>,
    pub interval: Option<Timeframe>,
    /// 테스트넷 강제
    pub testnet: bool,
}

impl ConfigOverrides {
    /// 명령행 값을 설정에 덮어씁니다.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(symbol) = &self.symbol {
            config.trading.symbol = symbol.to_uppercase();
        }
        if let Some(leverage) = self.leverage {
            config.trading.leverage = leverage;
        }
        if let Some(interval) = self.interval {
            config.trading.interval = interval;
        }
        if self.testnet {
            config.exchange.testnet = true;
        }
    }
}

/// 설정을 로드하고 재정의를 적용한 뒤 다시 검증합니다.
pub fn load_config(overrides: &ConfigOverrides) -> Result<AppConfig> {
    let mut config = AppConfig::load(overrides.config_path.as_deref())
        .context("failed to load configuration")?;
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// 설정의 logging 섹션으로 로깅을 초기화합니다. `RUST_LOG`/`LOG_FORMAT`이 우선합니다.
pub fn setup_logging(config: &AppConfig) -> Result<()> {
    init_logging(LogConfig::from(&config.logging).with_env_overrides())
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}

/// 환경 변수의 API 키로 REST 클라이언트를 만듭니다.
///
/// WebSocket 기본 URL도 함께 반환합니다.
pub fn connect_exchange(config: &AppConfig) -> Result<(Arc<dyn FuturesApi>, String)> {
    let binance = BinanceConfig::from_env(&config.exchange).context("missing Binance credentials")?;
    let ws_base_url = binance.ws_base_url().to_string();
    info!(
        testnet = binance.testnet,
        rest = %binance.rest_base_url(),
        ws = %ws_base_url,
        "Exchange client configured"
    );
    let client = BinanceFuturesClient::new(binance).context("failed to build exchange client")?;
    Ok((Arc::new(client), ws_base_url))
}
