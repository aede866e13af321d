//! 도메인 모델.

mod filters;
mod market_data;
mod order;
mod position;
mod signal;

pub use filters::*;
pub use market_data::*;
pub use order::*;
pub use position::*;
pub use signal::*;
