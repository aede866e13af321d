//! `sync` 명령어: 거래소 상태로 1회 정합한 뒤 원장을 출력합니다.
//!
//! 스트림은 열지 않습니다. 중복/고아 보호 주문 정리는 `run`과 같은 경로를 탑니다.

use std::fmt::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use sentinel_core::{PassiveSignalSource, PositionSide};
use sentinel_execution::{LedgerSnapshot, LogNotifier, TradingEngine};

use super::{connect_exchange, load_config, setup_logging, ConfigOverrides};

/// 정합 후 원장 출력.
pub async fn sync_ledger(overrides: ConfigOverrides, json: bool) -> Result<ExitCode> {
    let config = load_config(&overrides)?;
    setup_logging(&config)?;

    let (api, _) = connect_exchange(&config)?;
    let trading = config.trading.clone();
    let mut engine = TradingEngine::new(
        config,
        api,
        Arc::new(PassiveSignalSource),
        Arc::new(LogNotifier),
    );
    let handles = engine
        .initialize(&trading.symbol, trading.leverage, trading.interval)
        .await
        .context("reconciliation failed")?;

    let snapshot = handles.ledger.borrow().clone();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", render_snapshot(&snapshot));
    }
    Ok(ExitCode::SUCCESS)
}

/// 사람이 읽는 원장 요약.
pub fn render_snapshot(snapshot: &LedgerSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} | leverage {}x | balance {} {} (available {})",
        snapshot.symbol,
        snapshot.leverage,
        snapshot.balance.total,
        snapshot.balance.asset,
        snapshot.balance.available
    );

    for side in PositionSide::BOTH {
        let state = snapshot.side(side);
        let position = match &state.holding {
            Some(h) => format!("{} @ {}", h.amount, h.entry_price),
            None => "flat".to_string(),
        };
        let price = |order: &Option<sentinel_core::ProtectiveOrder>| {
            order
                .as_ref()
                .map(|o| format!("{} (#{})", o.trigger_price, o.order_id))
                .unwrap_or_else(|| "-".to_string())
        };
        let _ = writeln!(
            out,
            "  {:<5} {:<24} SL {:<24} TP {}",
            side.to_string(),
            position,
            price(&state.stop_loss),
            price(&state.take_profit)
        );
    }
    out
}
