//! 주문 실행 및 포지션 정합.
//!
//! 이 crate는 다음을 제공합니다:
//! - `PositionLedger`: 방향별 포지션/보호 주문의 로컬 원장
//! - `OrderEngine`: 수량 계산, 시장가 진입, 보호 주문 교체, 결과 검증, 정합
//! - `EventDispatcher`: 시장/계정 이벤트 큐를 소비하는 단일 루프
//! - `TradingEngine`: initialize / start / stop 수명주기
//!
//! # 예제
//!
//! ```rust,ignore
//! use sentinel_execution::{LogNotifier, TradingEngine};
//!
//! let mut engine = TradingEngine::new(config, api, signal, Arc::new(LogNotifier));
//! let handles = engine.initialize("BTCUSDT", 3, Timeframe::M15).await?;
//! engine.start(connector)?;
//! let exit = engine.join().await;
//! ```

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod notification;
pub mod order_engine;
pub mod reconciler;

// 주요 타입 재내보내기
pub use dispatcher::EventDispatcher;
pub use engine::{EngineExit, EngineHandles, TradingEngine};
pub use error::{EngineError, EngineResult};
pub use ledger::{Holding, LedgerSnapshot, PositionLedger, SideState};
pub use notification::{LogNotifier, NotificationEvent, Notifier};
pub use order_engine::{OpenOutcome, OrderEngine, Verification};
pub use reconciler::ReconcileReport;
