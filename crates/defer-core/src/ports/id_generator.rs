//! CodeGenerator port - task code の生成
//!
//! Streaming transport では task code は server が採番しますが、
//! pub/sub transport には採番する主体がいないので consumer 側で作ります。
//!
//! # 実装
//! - **SequentialCodes**: `sim-1`, `sim-2`, ...（pub/sub listener 用）
//! - **UlidCodes**: ULID ベース（in-memory queue server 用）

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::ports::Clock;

/// CodeGenerator は task code を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait CodeGenerator: Send + Sync {
    fn next_code(&self) -> String;
}

/// Monotonically increasing codes with a fixed prefix.
#[derive(Debug)]
pub struct SequentialCodes {
    prefix: &'static str,
    counter: AtomicU64,
}

impl SequentialCodes {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            counter: AtomicU64::new(0),
        }
    }
}

impl CodeGenerator for SequentialCodes {
    fn next_code(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

/// UlidCodes は Clock を使って現在時刻ベースの ULID を生成します。
/// テスト時に FixedClock を使えば timestamp 部分が決定的になります。
pub struct UlidCodes<C> {
    clock: C,
}

impl<C: Clock> UlidCodes<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> CodeGenerator for UlidCodes<C> {
    fn next_code(&self) -> String {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        format!("task-{ulid}")
    }
}
