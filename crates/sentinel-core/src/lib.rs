//! # Sentinel Core
//!
//! 선물 자동매매 엔진의 공통 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 엔진 전반에서 사용되는 기본 타입을 제공합니다:
//! - 포지션 방향, 주문 방향, 보호 주문 타입
//! - 캔들 및 캔들 윈도우
//! - 심볼 거래 필터 (step size / tick size)
//! - 시그널 소스 인터페이스
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
