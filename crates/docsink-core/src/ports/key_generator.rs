//! KeyGenerator port - 内容に依存しないキーの生成
//!
//! JSON モードでない場合、または key field が見つからない場合に使う。
//!
//! # 実装
//! - **UlidKeyGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::DocKey;
use crate::ports::Clock;

/// KeyGenerator は一意なドキュメントキーを生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の handler から同時に呼ばれる）
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> DocKey;
}

/// UlidKeyGenerator は ULID ベースのキー生成器
///
/// # ULID の特性
/// - 時刻でソート可能（生成順にキーが並ぶ）
/// - 分散環境で生成可能（調整不要）
/// - 80-bit のランダム部分で衝突しない
pub struct UlidKeyGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidKeyGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> KeyGenerator for UlidKeyGenerator<C> {
    fn generate(&self) -> DocKey {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        DocKey::new(ulid.to_string())
    }
}
