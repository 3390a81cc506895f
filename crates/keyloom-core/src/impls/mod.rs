//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryEngine**: 開発用の暗号エンジン（キーリングはメモリ上）
//!
//! # 本番用実装
//! 実際の OpenPGP エンジンへのバインディングは別クレートに置きます。

pub mod inmem_engine;

pub use self::inmem_engine::InMemoryEngine;
