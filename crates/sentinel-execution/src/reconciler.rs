//! 거래소 상태 정합.
//!
//! 기동 시, 주기적 동기화, 큐 유실(resync) 후 호출됩니다. 거래소를 기준으로
//! 원장을 다시 만듭니다.
//!
//! 1. 포지션: 방향별 스냅샷을 그대로 반영 (없거나 0이면 비움)
//! 2. 보호 주문: 방향/종류별 최신 1개를 채택, 중복과 포지션 없는 방향의
//!    주문은 취소
//! 3. 잔고 갱신

use std::collections::HashMap;

use sentinel_core::{PositionSide, ProtectiveKind, ProtectiveOrder};
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::ledger::PositionLedger;
use crate::order_engine::OrderEngine;

/// 정합 결과 요약.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 포지션이 있는 방향
    pub open_sides: Vec<PositionSide>,
    /// 원장에 새로 채택한 보호 주문 수
    pub adopted: usize,
    /// 거래소에 없어 원장에서 지운 보호 주문 수
    pub cleared_stale: usize,
    /// 취소한 중복 보호 주문 수
    pub cancelled_duplicates: usize,
    /// 취소한 고아 보호 주문 수
    pub cancelled_orphans: usize,
}

impl OrderEngine {
    /// 전체 정합.
    pub async fn reconcile(&self, ledger: &mut PositionLedger) -> EngineResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        // 비워진 방향의 주문은 아래 보호 주문 정합에서 고아로 취소됨
        self.sync_positions(ledger).await?;
        report.open_sides = PositionSide::BOTH
            .into_iter()
            .filter(|side| ledger.is_open(*side))
            .collect();

        self.reconcile_protective(ledger, &mut report).await?;
        self.refresh_balance(ledger).await?;

        info!(
            symbol = %self.symbol(),
            open_sides = ?report.open_sides,
            adopted = report.adopted,
            cleared_stale = report.cleared_stale,
            cancelled_duplicates = report.cancelled_duplicates,
            cancelled_orphans = report.cancelled_orphans,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// 포지션만 동기화합니다. 비워진 방향에서 지운 보호 주문을 반환합니다.
    pub async fn sync_positions(&self, ledger: &mut PositionLedger) -> EngineResult<Vec<ProtectiveOrder>> {
        let positions = self.fetch_positions().await?;
        let mut cleared = Vec::new();

        for side in PositionSide::BOTH {
            match positions.iter().find(|p| p.position_side == side) {
                Some(snapshot) => cleared.extend(ledger.apply_snapshot(snapshot)),
                None => cleared.extend(ledger.reset_side(side)),
            }
        }
        debug!(cleared = cleared.len(), "Positions synchronized");
        Ok(cleared)
    }

    /// 잔고를 갱신합니다.
    pub async fn refresh_balance(&self, ledger: &mut PositionLedger) -> EngineResult<()> {
        let asset = ledger.balance().asset.clone();
        let balance = self.fetch_balance(&asset).await?;
        debug!(%asset, total = %balance.total, available = %balance.available, "Balance refreshed");
        ledger.set_balance(balance);
        Ok(())
    }

    async fn reconcile_protective(
        &self,
        ledger: &mut PositionLedger,
        report: &mut ReconcileReport,
    ) -> EngineResult<()> {
        let live: Vec<ProtectiveOrder> = self
            .fetch_protective_orders()
            .await?
            .into_iter()
            .filter(|o| o.symbol == self.symbol())
            .collect();

        // 원장에만 남은 주문 (이미 발동/취소됨)
        for side in PositionSide::BOTH {
            for kind in ProtectiveKind::BOTH {
                let stale = ledger
                    .protective(side, kind)
                    .is_some_and(|tracked| !live.iter().any(|o| o.order_id == tracked.order_id));
                if stale {
                    ledger.clear_protective(side, kind);
                    report.cleared_stale += 1;
                }
            }
        }

        let mut groups: HashMap<(PositionSide, ProtectiveKind), Vec<ProtectiveOrder>> = HashMap::new();
        for order in live {
            groups
                .entry((order.position_side, order.kind))
                .or_default()
                .push(order);
        }

        for ((side, kind), mut orders) in groups {
            if !ledger.is_open(side) {
                warn!(%side, %kind, count = orders.len(), "Protective orders without position, cancelling");
                report.cancelled_orphans += self.cancel_all(&orders).await?;
                continue;
            }

            // 최신 순
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let duplicates = orders.split_off(1);
            if let Some(latest) = orders.pop() {
                let tracked = ledger
                    .protective(side, kind)
                    .is_some_and(|o| o.order_id == latest.order_id);
                if !tracked {
                    info!(%side, %kind, order_id = %latest.order_id, trigger = %latest.trigger_price, "Adopted protective order");
                    ledger.set_protective(latest);
                    report.adopted += 1;
                }
            }

            if !duplicates.is_empty() {
                warn!(%side, %kind, count = duplicates.len(), "Duplicate protective orders, keeping latest");
                report.cancelled_duplicates += self.cancel_all(&duplicates).await?;
            }
        }
        Ok(())
    }
}
