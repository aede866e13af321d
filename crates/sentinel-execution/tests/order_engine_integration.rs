//! Order engine integration tests against an in-memory exchange.
//!
//! Covers entry with protection, averaging into an existing position,
//! cancel-then-replace of protective orders, verification after a lost
//! response, and startup reconciliation.

mod common;

use std::sync::Arc;

use common::{api_error, filters, gateway, timeout_error, MockExchange, SYMBOL};
use rust_decimal_macros::dec;
use sentinel_core::{
    Balance, OpenOrder, OrderSide, OrderStatus, PositionSide, ProtectiveKind, ProtectiveOrder,
};
use sentinel_execution::{EngineError, OpenOutcome, OrderEngine, PositionLedger};
use sentinel_exchange::FuturesApi;
use sentinel_risk::{PositionSizer, RiskConfig};
use tokio_util::sync::CancellationToken;

fn setup() -> (Arc<MockExchange>, OrderEngine, PositionLedger) {
    let exchange = MockExchange::new();
    let api: Arc<dyn FuturesApi> = exchange.clone();
    let engine = OrderEngine::new(
        api,
        gateway(CancellationToken::new()),
        filters(),
        PositionSizer::new(RiskConfig::default()),
    );
    let mut ledger = PositionLedger::new(SYMBOL, "USDT", 2);
    ledger.set_balance(Balance::new("USDT", dec!(1000), dec!(1000)));
    (exchange, engine, ledger)
}

// ==================== 진입 ====================

#[tokio::test]
async fn test_open_places_position_and_protection() {
    let (exchange, engine, mut ledger) = setup();

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(2), dec!(100), Some(dec!(95)), Some(dec!(107.5)))
        .await
        .unwrap();

    match outcome {
        OpenOutcome::Opened { holding, verified } => {
            assert!(!verified);
            assert_eq!(holding.amount, dec!(2));
            assert_eq!(holding.entry_price, dec!(100));
        }
        other => panic!("expected Opened, got {other:?}"),
    }

    let sl = ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).unwrap();
    let tp = ledger.protective(PositionSide::Long, ProtectiveKind::TakeProfit).unwrap();
    assert_eq!(sl.trigger_price, dec!(95));
    assert_eq!(tp.trigger_price, dec!(107.5));

    let live = exchange.protective_ids();
    assert_eq!(live.len(), 2);
    assert!(live.contains(&sl.order_id));
    assert!(live.contains(&tp.order_id));
    assert_eq!(exchange.position(PositionSide::Long), Some((dec!(2), dec!(100))));
}

#[tokio::test]
async fn test_add_averages_entry_and_replaces_protection() {
    let (exchange, engine, mut ledger) = setup();

    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(2), dec!(100), Some(dec!(95)), Some(dec!(110)))
        .await
        .unwrap();
    let old_ids = exchange.protective_ids();

    exchange.state().mark_price = dec!(110);
    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(2), dec!(110), Some(dec!(104)), Some(dec!(120)))
        .await
        .unwrap();
    assert!(outcome.is_opened());

    let holding = ledger.holding(PositionSide::Long).copied().unwrap();
    assert_eq!(holding.amount, dec!(4));
    assert_eq!(holding.entry_price, dec!(105));

    // 종류별로 정확히 1개씩만 남아야 함
    let live = exchange.protective_ids();
    assert_eq!(live.len(), 2);
    assert!(old_ids.iter().all(|id| !live.contains(id)));
    assert_eq!(exchange.calls("cancel_protective_order"), 2);
    assert_eq!(
        ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).unwrap().trigger_price,
        dec!(104)
    );
}

#[tokio::test]
async fn test_protection_on_wrong_side_is_kept() {
    let (exchange, engine, mut ledger) = setup();

    engine
        .open_or_add(&mut ledger, PositionSide::Short, dec!(1), dec!(100), Some(dec!(105)), Some(dec!(90)))
        .await
        .unwrap();
    let before = ledger.snapshot();

    // 숏 손절은 진입가보다 높아야 함
    engine
        .place_protection(&mut ledger, PositionSide::Short, Some(dec!(99)), Some(dec!(101)))
        .await
        .unwrap();

    assert_eq!(ledger.snapshot().short, before.short);
    assert_eq!(exchange.calls("cancel_protective_order"), 0);
    assert_eq!(exchange.calls("place_protective_order"), 2);
}

#[tokio::test]
async fn test_same_price_protection_is_not_replaced() {
    let (exchange, engine, mut ledger) = setup();

    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();
    let replaced = engine
        .replace_protective(&mut ledger, PositionSide::Long, ProtectiveKind::StopLoss, dec!(95))
        .await
        .unwrap();

    assert!(replaced);
    assert_eq!(exchange.calls("place_protective_order"), 1);
    assert_eq!(exchange.calls("cancel_protective_order"), 0);
}

#[tokio::test]
async fn test_off_tick_protection_near_entry_stays_on_valid_side() {
    let (exchange, engine, mut ledger) = setup();

    // 0.1 호가에서 99.96/100.04를 반올림하면 진입가 100에 붙음
    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(99.96)), Some(dec!(100.04)))
        .await
        .unwrap();

    let sl = ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).unwrap();
    let tp = ledger.protective(PositionSide::Long, ProtectiveKind::TakeProfit).unwrap();
    assert_eq!(sl.trigger_price, dec!(99.9));
    assert_eq!(tp.trigger_price, dec!(100.1));
    assert_eq!(exchange.calls("place_protective_order"), 2);
}

#[tokio::test]
async fn test_business_rejection_skips_signal() {
    let (exchange, engine, mut ledger) = setup();
    exchange
        .state()
        .market_failures
        .push_back(api_error(-2019, "Margin is insufficient."));

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::Rejected(_)));
    assert_eq!(exchange.calls("place_market_order"), 1);
    assert!(!ledger.is_open(PositionSide::Long));
    assert_eq!(exchange.calls("place_protective_order"), 0);
}

#[tokio::test]
async fn test_fatal_error_propagates() {
    let (exchange, engine, mut ledger) = setup();
    exchange
        .state()
        .market_failures
        .push_back(api_error(-2015, "Invalid API-key, IP, or permissions for action."));

    let result = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), None, None)
        .await;

    assert!(matches!(result, Err(EngineError::Fatal(_))));
    assert!(!ledger.is_open(PositionSide::Long));
}

// ==================== 결과 불명 검증 ====================

#[tokio::test(start_paused = true)]
async fn test_lost_response_partial_fill_is_adopted() {
    let (exchange, engine, mut ledger) = setup();
    {
        let mut state = exchange.state();
        state.market_failures.extend([timeout_error(), timeout_error(), timeout_error()]);
        state.lost_fills = 1;
        state.fill_ratio = dec!(0.5);
    }

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(2), dec!(100), Some(dec!(95)), Some(dec!(110)))
        .await
        .unwrap();

    match outcome {
        OpenOutcome::Opened { holding, verified } => {
            assert!(verified);
            assert_eq!(holding.amount, dec!(1));
        }
        other => panic!("expected verified Opened, got {other:?}"),
    }
    assert_eq!(exchange.calls("place_market_order"), 3);
    assert_eq!(ledger.holding(PositionSide::Long).unwrap().amount, dec!(1));
    // 검증으로 확인된 포지션에도 보호 주문이 걸림
    assert_eq!(exchange.protective_ids().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_duplicate_client_id_verifies_earlier_fill() {
    let (exchange, engine, mut ledger) = setup();
    {
        let mut state = exchange.state();
        // 첫 시도는 체결되었지만 응답 유실, 재시도는 중복 ID로 거절
        state.market_failures.extend([
            timeout_error(),
            api_error(-4116, "ClientOrderId is duplicated."),
        ]);
        state.lost_fills = 1;
    }

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();

    match outcome {
        OpenOutcome::Opened { holding, verified } => {
            assert!(verified);
            assert_eq!(holding.amount, dec!(1));
        }
        other => panic!("expected verified Opened, got {other:?}"),
    }
    let ids = exchange.state().market_client_ids.clone();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
    assert_eq!(exchange.position(PositionSide::Long), Some((dec!(1), dec!(100))));
}

#[tokio::test(start_paused = true)]
async fn test_lost_response_without_fill_is_not_opened() {
    let (exchange, engine, mut ledger) = setup();
    exchange
        .state()
        .market_failures
        .extend([timeout_error(), timeout_error(), timeout_error()]);

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Short, dec!(1), dec!(100), Some(dec!(105)), None)
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::NotOpened));
    assert!(!outcome.needs_resync());
    assert!(!ledger.is_open(PositionSide::Short));
    assert_eq!(exchange.calls("positions"), 1);
    assert_eq!(exchange.calls("open_orders"), 1);
    assert_eq!(exchange.calls("place_protective_order"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_response_with_flat_exchange_resets_ledger_side() {
    let (exchange, engine, mut ledger) = setup();
    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), Some(dec!(110)))
        .await
        .unwrap();
    assert_eq!(exchange.protective_ids().len(), 2);

    // 거래소에서 포지션이 외부 청산됨
    exchange.set_position(PositionSide::Long, dec!(0), dec!(0));
    exchange
        .state()
        .market_failures
        .extend([timeout_error(), timeout_error(), timeout_error()]);

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::NotOpened));
    assert!(!ledger.is_open(PositionSide::Long));
    assert!(ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).is_none());
    assert!(ledger.protective(PositionSide::Long, ProtectiveKind::TakeProfit).is_none());
    assert_eq!(exchange.calls("cancel_protective_order"), 2);
    assert!(exchange.protective_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lost_response_with_pending_order_requests_resync() {
    let (exchange, engine, mut ledger) = setup();
    {
        let mut state = exchange.state();
        state.market_failures.extend([timeout_error(), timeout_error(), timeout_error()]);
        state.open_orders.push(OpenOrder {
            order_id: "77".to_string(),
            client_order_id: "manual".to_string(),
            position_side: Some(PositionSide::Long),
            side: OrderSide::Buy,
            order_type: "LIMIT".to_string(),
            status: OrderStatus::New,
            orig_qty: dec!(1),
            executed_qty: dec!(0),
        });
    }

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::Pending { orders: 1 }));
    assert!(outcome.needs_resync());
    assert!(!ledger.is_open(PositionSide::Long));
}

#[tokio::test(start_paused = true)]
async fn test_verification_failure_is_unverified() {
    let (exchange, engine, mut ledger) = setup();
    {
        let mut state = exchange.state();
        state.market_failures.extend([timeout_error(), timeout_error(), timeout_error()]);
        state.query_failures.extend([timeout_error(), timeout_error(), timeout_error()]);
    }

    let outcome = engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), None, None)
        .await
        .unwrap();

    assert!(matches!(outcome, OpenOutcome::Unverified));
    assert!(outcome.needs_resync());
}

// ==================== 취소 ====================

#[tokio::test]
async fn test_cancel_unknown_order_is_success() {
    let (exchange, engine, mut ledger) = setup();
    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();
    let before = ledger.snapshot();

    let ghost = ProtectiveOrder {
        order_id: "does-not-exist".to_string(),
        ..ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).cloned().unwrap()
    };
    assert!(engine.cancel_protective(&ghost).await.unwrap());

    // 원장은 그대로
    assert_eq!(ledger.snapshot().long, before.long);
    assert_eq!(exchange.protective_ids().len(), 1);
}

#[tokio::test]
async fn test_replace_when_exchange_already_dropped_order() {
    let (exchange, engine, mut ledger) = setup();
    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();
    // 거래소 쪽에서 이미 사라진 주문
    exchange.state().protective.clear();

    let replaced = engine
        .replace_protective(&mut ledger, PositionSide::Long, ProtectiveKind::StopLoss, dec!(96))
        .await
        .unwrap();

    assert!(replaced);
    let live = exchange.protective_ids();
    assert_eq!(live.len(), 1);
    let tracked = ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).unwrap();
    assert_eq!(tracked.order_id, live[0]);
    assert_eq!(tracked.trigger_price, dec!(96));
}

#[tokio::test]
async fn test_rejected_cancel_keeps_existing_protection() {
    let (exchange, engine, mut ledger) = setup();
    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();
    let tracked = ledger
        .protective(PositionSide::Long, ProtectiveKind::StopLoss)
        .cloned()
        .unwrap();
    exchange
        .state()
        .cancel_failures
        .push_back(api_error(-1111, "Precision is over the maximum defined for this asset."));

    let replaced = engine
        .replace_protective(&mut ledger, PositionSide::Long, ProtectiveKind::StopLoss, dec!(97))
        .await
        .unwrap();

    assert!(!replaced);
    assert_eq!(
        ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss),
        Some(&tracked)
    );
    assert_eq!(exchange.calls("place_protective_order"), 1);
}

// ==================== 정합 ====================

#[tokio::test]
async fn test_reconcile_adopts_latest_and_cancels_extras() {
    let (exchange, engine, mut ledger) = setup();
    exchange.set_position(PositionSide::Long, dec!(1), dec!(100));
    let older = exchange.add_protective(PositionSide::Long, ProtectiveKind::StopLoss, dec!(94), 120);
    let newer = exchange.add_protective(PositionSide::Long, ProtectiveKind::StopLoss, dec!(95), 10);
    let tp = exchange.add_protective(PositionSide::Long, ProtectiveKind::TakeProfit, dec!(110), 60);
    let orphan = exchange.add_protective(PositionSide::Short, ProtectiveKind::StopLoss, dec!(105), 30);

    let report = engine.reconcile(&mut ledger).await.unwrap();

    assert_eq!(report.open_sides, vec![PositionSide::Long]);
    assert_eq!(report.adopted, 2);
    assert_eq!(report.cancelled_duplicates, 1);
    assert_eq!(report.cancelled_orphans, 1);

    let holding = ledger.holding(PositionSide::Long).copied().unwrap();
    assert_eq!(holding.amount, dec!(1));
    assert_eq!(
        ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).unwrap().order_id,
        newer
    );
    assert_eq!(
        ledger.protective(PositionSide::Long, ProtectiveKind::TakeProfit).unwrap().order_id,
        tp
    );

    let live = exchange.protective_ids();
    assert!(!live.contains(&older));
    assert!(!live.contains(&orphan));
    assert_eq!(live.len(), 2);
    assert!(ledger.side(PositionSide::Short).is_empty());
}

#[tokio::test]
async fn test_reconcile_clears_stale_and_closed_sides() {
    let (exchange, engine, mut ledger) = setup();
    engine
        .open_or_add(&mut ledger, PositionSide::Long, dec!(1), dec!(100), Some(dec!(95)), None)
        .await
        .unwrap();
    engine
        .open_or_add(&mut ledger, PositionSide::Short, dec!(1), dec!(100), Some(dec!(105)), None)
        .await
        .unwrap();

    // 롱 손절은 발동되어 사라지고, 숏 포지션은 밖에서 청산됨
    {
        let mut state = exchange.state();
        state.protective.retain(|o| o.position_side != PositionSide::Long);
        state.positions.remove(&PositionSide::Short);
    }

    let report = engine.reconcile(&mut ledger).await.unwrap();

    assert_eq!(report.open_sides, vec![PositionSide::Long]);
    assert_eq!(report.cleared_stale, 1);
    assert_eq!(report.cancelled_orphans, 1);
    assert!(ledger.is_open(PositionSide::Long));
    assert!(ledger.protective(PositionSide::Long, ProtectiveKind::StopLoss).is_none());
    assert!(ledger.side(PositionSide::Short).is_empty());
    assert!(exchange.protective_ids().is_empty());
}

#[tokio::test]
async fn test_reconcile_refreshes_balance() {
    let (exchange, engine, mut ledger) = setup();
    exchange.state().balance = Balance::new("USDT", dec!(1500), dec!(1200));

    engine.reconcile(&mut ledger).await.unwrap();

    assert_eq!(ledger.balance().total, dec!(1500));
    assert_eq!(ledger.balance().available, dec!(1200));
}
