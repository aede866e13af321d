//! sentinel CLI 구성 요소.
//!
//! - 설정 로드와 명령행 재정의
//! - 거래소 클라이언트 생성
//! - `run`: 엔진 실행 (종료 신호까지)
//! - `sync`: 1회 정합 후 원장 출력

pub mod commands;

pub use commands::*;
