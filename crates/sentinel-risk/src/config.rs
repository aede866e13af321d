//! 리스크 관리 설정.
//!
//! 포지션 사이징과 손절/익절 산출에 필요한 값만 담습니다.
//! 매매 설정(`TradingConfig`)에서 만들어집니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::TradingConfig;
use serde::{Deserialize, Serialize};

/// 리스크 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// 거래당 최대 손실 (잔고 대비 %, 기본값: 1%)
    pub risk_percentage: Decimal,
    /// 레버리지 (기본값: 3)
    pub leverage: u32,
    /// 잔고 × 레버리지 대비 최대 포지션 명목 가치 비율 (기본값: 0.5)
    pub max_position_ratio: Decimal,
    /// 손익비 (기본값: 1.5)
    pub risk_reward_ratio: Decimal,
    /// 진입가 대비 최대 손절 거리 (기본값: 0.02)
    pub max_loss_ratio: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_percentage: dec!(1),
            leverage: 3,
            max_position_ratio: dec!(0.5),
            risk_reward_ratio: dec!(1.5),
            max_loss_ratio: dec!(0.02),
        }
    }
}

impl From<&TradingConfig> for RiskConfig {
    fn from(trading: &TradingConfig) -> Self {
        Self {
            risk_percentage: trading.risk_percentage,
            leverage: trading.leverage,
            max_position_ratio: trading.max_position_ratio,
            risk_reward_ratio: trading.risk_reward_ratio,
            max_loss_ratio: trading.max_loss_ratio,
        }
    }
}

impl RiskConfig {
    /// 레버리지를 바꾼 설정.
    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    /// 설정 값을 검증.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.risk_percentage <= Decimal::ZERO || self.risk_percentage > dec!(100) {
            return Err(ConfigValidationError::InvalidValue(
                "risk_percentage must be between 0 and 100".into(),
            ));
        }

        if self.leverage == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "leverage must be at least 1".into(),
            ));
        }

        if self.max_position_ratio <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "max_position_ratio must be greater than 0".into(),
            ));
        }

        if self.risk_reward_ratio <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "risk_reward_ratio must be greater than 0".into(),
            ));
        }

        if self.max_loss_ratio <= Decimal::ZERO || self.max_loss_ratio >= Decimal::ONE {
            return Err(ConfigValidationError::InvalidValue(
                "max_loss_ratio must be between 0 and 1".into(),
            ));
        }

        Ok(())
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
