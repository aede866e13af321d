//! 에러 분류기.
//!
//! 거래소 에러를 다섯 가지 처리 등급으로 나누는 유일한 기준입니다.
//! 다른 컴포넌트는 에러 코드를 직접 해석하지 않고 이 모듈에 묻습니다.
//!
//! | 등급 | 처리 |
//! |---|---|
//! | Fatal | 엔진 즉시 중지, 재시도 없음 |
//! | Retryable | 백오프 후 재시도 |
//! | Conflict | 경고 로그 후 no-op 성공 |
//! | AlreadySatisfied | 성공으로 간주 |
//! | Business | 이 요청만 건너뜀 |

use crate::error::ExchangeError;
use serde::Serialize;
use std::fmt;

/// 에러 처리 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    /// 인증 실패, 계정 차단
    Fatal,
    /// 전송 실패, 일시적 과부하/타임스탬프 에러
    Retryable,
    /// 원하는 상태와 충돌 (예: 미체결 주문이 있어 모드 변경 불가)
    Conflict,
    /// 이미 원하는 상태 (예: 마진 타입이 이미 설정됨)
    AlreadySatisfied,
    /// 그 외 거래소가 거부한 요청
    Business,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Fatal => "fatal",
            ErrorClass::Retryable => "retryable",
            ErrorClass::Conflict => "conflict",
            ErrorClass::AlreadySatisfied => "already_satisfied",
            ErrorClass::Business => "business",
        };
        f.write_str(s)
    }
}

/// -1002 unauthorized, -1022 invalid signature, -2014 key format,
/// -2015 invalid key/IP/permission, -2008 invalid key id
const FATAL_CODES: &[i32] = &[-1002, -1022, -2014, -2015, -2008];

/// -1000 unknown, -1001 disconnected, -1003 too many requests,
/// -1007 backend timeout, -1008 server busy, -1021 timestamp outside recvWindow
const RETRYABLE_CODES: &[i32] = &[-1000, -1001, -1003, -1007, -1008, -1021];

/// -4047/-4048 margin type change with open orders/position,
/// -4067/-4068 position side change with open orders/position
const CONFLICT_CODES: &[i32] = &[-4047, -4048, -4067, -4068];

/// -4046 no need to change margin type, -4059 no need to change position side,
/// -2011 cancel rejected (unknown order), -2013 order does not exist,
/// -4116 client order id duplicated (재시도 전 요청이 이미 접수됨)
const ALREADY_SATISFIED_CODES: &[i32] = &[-4046, -4059, -2011, -2013, -4116];

/// API 에러 코드를 분류합니다. 표에 없는 코드는 Business입니다.
pub fn classify_code(code: i32) -> ErrorClass {
    if FATAL_CODES.contains(&code) {
        ErrorClass::Fatal
    } else if RETRYABLE_CODES.contains(&code) {
        ErrorClass::Retryable
    } else if CONFLICT_CODES.contains(&code) {
        ErrorClass::Conflict
    } else if ALREADY_SATISFIED_CODES.contains(&code) {
        ErrorClass::AlreadySatisfied
    } else {
        ErrorClass::Business
    }
}

/// 거래소 에러를 분류합니다.
pub fn classify(err: &ExchangeError) -> ErrorClass {
    match err {
        ExchangeError::Api { code, .. } => classify_code(*code),
        ExchangeError::Network(_)
        | ExchangeError::Timeout(_)
        | ExchangeError::Disconnected(_)
        | ExchangeError::WebSocket(_) => ErrorClass::Retryable,
        ExchangeError::Http { status, .. } => match *status {
            401 | 403 => ErrorClass::Fatal,
            408 | 429 | 418 => ErrorClass::Retryable,
            s if s >= 500 => ErrorClass::Retryable,
            _ => ErrorClass::Business,
        },
        ExchangeError::Parse(_) | ExchangeError::Config(_) => ErrorClass::Business,
    }
}
