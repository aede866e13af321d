//! `run` 명령어: 엔진을 초기화하고 종료 신호까지 실행합니다.
//!
//! 종료 코드:
//! - 0: 종료 신호에 의한 정상 종료
//! - 1: 연결 실패(재연결 한도, 인증 실패, 워치독) 또는 치명적 에러
//!
//! 비정상 종료 시 외부 감시자(systemd 등)가 재시작하는 것을 전제로 합니다.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use sentinel_core::PassiveSignalSource;
use sentinel_exchange::BinanceStreamConnector;
use sentinel_execution::{EngineExit, LogNotifier, TradingEngine};
use tracing::{error, info, warn};

use super::{connect_exchange, load_config, setup_logging, ConfigOverrides};

/// 엔진 실행.
pub async fn run_engine(overrides: ConfigOverrides) -> Result<ExitCode> {
    let config = load_config(&overrides)?;
    setup_logging(&config)?;

    let (api, ws_base_url) = connect_exchange(&config)?;
    let trading = config.trading.clone();
    let keepalive = config.connection.listen_key_keepalive();

    let mut engine = TradingEngine::new(
        config,
        api.clone(),
        Arc::new(PassiveSignalSource),
        Arc::new(LogNotifier),
    );
    let handles = engine
        .initialize(&trading.symbol, trading.leverage, trading.interval)
        .await
        .context("engine initialization failed")?;

    {
        let snapshot = handles.ledger.borrow();
        info!(
            symbol = %snapshot.symbol,
            leverage = snapshot.leverage,
            balance = %snapshot.balance.total,
            long_open = snapshot.long.is_open(),
            short_open = snapshot.short.is_open(),
            "Ledger reconciled with exchange"
        );
    }

    let connector = Arc::new(BinanceStreamConnector::new(
        api,
        engine.gateway().clone(),
        ws_base_url,
        trading.symbol.clone(),
        trading.interval,
        keepalive,
    ));
    engine.start(connector).context("engine start failed")?;

    let shutdown = handles.shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let exit = engine.join().await;
    Ok(exit_code(&exit))
}

fn exit_code(exit: &EngineExit) -> ExitCode {
    if exit.is_failure() {
        error!(%exit, "Exiting with failure");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Ctrl-C 또는 (유닉스) SIGTERM 대기.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
