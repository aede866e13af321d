//! Binance 선물 WebSocket 스트림.

pub mod events;
pub mod stream;

pub use events::*;
pub use stream::*;
