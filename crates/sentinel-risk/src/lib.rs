//! 리스크 관리.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 잔고/손실 한도 기반 포지션 사이징
//! - 시그널 후보로부터 손절/익절 가격 산출
//!
//! # 예제
//!
//! ```rust,ignore
//! use sentinel_risk::{PositionSizer, RiskConfig, SizingContext};
//!
//! let sizer = PositionSizer::new(RiskConfig::default());
//! let decision = sizer.size_position(PositionSide::Long, entry, stop, &ctx);
//! if !decision.is_rejected() {
//!     // 주문 진행
//! }
//! ```

pub mod config;
pub mod planner;
pub mod position_sizing;

// 주요 타입 재내보내기
pub use config::{ConfigValidationError, RiskConfig};
pub use planner::{quantize_protective_price, TradePlan, TradePlanner};
pub use position_sizing::{PositionSizer, SizingContext, SizingDecision, SizingRejection};
