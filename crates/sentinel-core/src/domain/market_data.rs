//! 캔들 데이터와 고정 용량 캔들 윈도우.

use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// OHLCV 캔들.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시간
    pub open_time: DateTime<Utc>,
    /// 캔들 종료 시간
    pub close_time: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
    /// 마감 여부. 미마감 캔들은 시그널 계산에 사용하지 않습니다.
    pub closed: bool,
}

/// 가장 오래된 캔들부터 밀어내는 고정 용량 윈도우.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            candles: VecDeque::with_capacity(capacity),
        }
    }

    /// 마감 캔들을 추가합니다.
    ///
    /// 마지막 캔들과 시작 시간이 같으면 교체하고, 더 오래된 캔들은 무시합니다.
    /// 추가/교체되었으면 true를 반환합니다.
    pub fn push(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.candles.back_mut() {
            if candle.open_time < last.open_time {
                return false;
            }
            if candle.open_time == last.open_time {
                *last = candle;
                return true;
            }
        }
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
        true
    }

    /// 여러 캔들을 순서대로 추가합니다 (백필).
    pub fn extend(&mut self, candles: impl IntoIterator<Item = Candle>) {
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 마지막 캔들의 인덱스.
    pub fn last_index(&self) -> Option<usize> {
        self.candles.len().checked_sub(1)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// 마지막 캔들의 종가. 진입 기준 가격으로 사용됩니다.
    pub fn last_close(&self) -> Option<Price> {
        self.candles.back().map(|c| c.close)
    }

    /// 오래된 순서의 연속 슬라이스.
    pub fn as_slice(&mut self) -> &[Candle] {
        self.candles.make_contiguous()
    }
}
