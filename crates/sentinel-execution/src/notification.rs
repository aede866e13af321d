//! 알림 인터페이스.
//!
//! 전달 채널(텔레그램 등)은 이 crate 밖에서 구현합니다. 기본 구현인
//! `LogNotifier`는 tracing으로만 기록합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sentinel_core::{PositionSide, Price, Quantity};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// 알림 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// 포지션 진입/추가
    PositionOpened {
        symbol: String,
        side: PositionSide,
        quantity: Quantity,
        entry_price: Price,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    },
    /// 체결로 실현된 손익
    RealizedPnl {
        symbol: String,
        side: Option<PositionSide>,
        quantity: Quantity,
        price: Price,
        pnl: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// 엔진 중지 사유
    EngineStopped { reason: String, failure: bool },
}

/// 알림 전송자.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 이벤트를 전달합니다. 실패는 전송자 내부에서 처리합니다.
    async fn notify(&self, event: NotificationEvent);
}

/// 로그 기반 알림.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent) {
        match event {
            NotificationEvent::PositionOpened {
                symbol,
                side,
                quantity,
                entry_price,
                stop_loss,
                take_profit,
            } => {
                info!(
                    %symbol, %side, %quantity, %entry_price,
                    stop_loss = ?stop_loss, take_profit = ?take_profit,
                    "[알림] 포지션 진입"
                );
            }
            NotificationEvent::RealizedPnl {
                symbol,
                side,
                quantity,
                price,
                pnl,
                ..
            } => {
                info!(%symbol, side = ?side, %quantity, %price, %pnl, "[알림] 실현 손익");
            }
            NotificationEvent::EngineStopped { reason, failure } => {
                if failure {
                    error!(%reason, "[알림] 엔진 비정상 중지");
                } else {
                    info!(%reason, "[알림] 엔진 중지");
                }
            }
        }
    }
}
