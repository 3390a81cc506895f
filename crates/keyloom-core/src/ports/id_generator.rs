//! IdGenerator port - ID 生成の抽象化
//!
//! タスク ID の生成を ambient な乱数ではなく明示的なサービスにしています。
//! テストでは SequenceIdGenerator を注入して決定的な ID を得ます。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）
//! - **SequenceIdGenerator**: 固定シーケンス（テスト用）

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::ids::TaskId;
use crate::ports::Clock;

/// IdGenerator はプロセス内で一意なタスク ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（origin context からもワーカーからも使える）
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から、残り 80 bit は乱数から作ります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from(ulid)
    }
}

/// Deterministic generator: `1, 2, 3, ...` encoded as ULIDs with a zero timestamp.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate_task_id(&self) -> TaskId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        TaskId::from(Ulid::from_parts(0, u128::from(n)))
    }
}
