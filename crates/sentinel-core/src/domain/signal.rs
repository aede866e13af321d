//! 시그널 소스 인터페이스.
//!
//! 지표 계산은 이 크레이트 밖의 협력자가 담당합니다. 엔진은 후보
//! `(bar_index, stop_loss, entry_price)`만 소비합니다.

use crate::domain::{Candle, PositionSide};
use crate::types::Price;
use serde::{Deserialize, Serialize};

/// 진입 후보.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCandidate {
    /// 후보가 나온 캔들 인덱스 (윈도우 기준)
    pub bar_index: usize,
    /// 제안 손절가
    pub stop_loss: Price,
    /// 제안 진입가
    pub entry_price: Price,
}

/// 방향별 진입 후보 목록.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCandidates {
    pub long: Vec<SignalCandidate>,
    pub short: Vec<SignalCandidate>,
}

impl SignalCandidates {
    pub fn for_side(&self, side: PositionSide) -> &[SignalCandidate] {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }

    /// `bar_index`에 해당하는 후보 (여러 개면 마지막 것).
    pub fn at_bar(&self, side: PositionSide, bar_index: usize) -> Option<&SignalCandidate> {
        self.for_side(side)
            .iter()
            .rev()
            .find(|c| c.bar_index == bar_index)
    }
}

/// 캔들 윈도우를 분석해 진입 후보를 만드는 순수 함수.
pub trait SignalSource: Send + Sync {
    /// 로그용 이름.
    fn name(&self) -> &str;

    /// 오래된 순서의 마감 캔들을 분석합니다.
    fn analyze(&self, candles: &[Candle]) -> SignalCandidates;
}

/// 후보를 만들지 않는 소스. 기존 포지션 유지/정합만 수행할 때 사용합니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveSignalSource;

impl SignalSource for PassiveSignalSource {
    fn name(&self) -> &str {
        "passive"
    }

    fn analyze(&self, _candles: &[Candle]) -> SignalCandidates {
        SignalCandidates::default()
    }
}
