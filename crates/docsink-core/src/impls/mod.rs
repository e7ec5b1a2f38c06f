//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryMessageSource**: プロセス内のループバック queue transport
//! - **InMemoryBucket**: `mem://` の bucket
//! - **FsBucket**: `file://` の bucket
//! - **cluster**: 接続文字列から bucket を開く

pub mod inmem_source;
pub mod inmem_store;
pub mod fs_store;
pub mod cluster;

// 主要な型を再エクスポート
pub use self::cluster::{Cluster, connect};
pub use self::fs_store::FsBucket;
pub use self::inmem_source::{InMemoryMessageSource, SourceCounts};
pub use self::inmem_store::InMemoryBucket;
