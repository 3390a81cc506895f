//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 時刻・ID 生成・暗号エンジンを trait の向こう側に置き、
//! タスク機構そのものはテストで決定的に動かせるようにします。

pub mod clock;
pub mod engine;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::engine::{CryptoEngine, EngineOutput};
pub use self::id_generator::{IdGenerator, SequenceIdGenerator, UlidGenerator};
