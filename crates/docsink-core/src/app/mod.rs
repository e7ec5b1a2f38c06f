//! App - アプリケーション層
//!
//! ports を組み合わせてコネクタのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **KeyResolver**: メッセージ本文 → 保存キー
//! - **DeliveryHandler**: resolve → insert → finish / requeue
//! - **ConsumerGroup**: receive ループ（shutdown 対応）
//! - **ConnectorBuilder**: 検証済み設定からの組み立て
//! - **DeliveryStats**: disposition ごとのカウンタ

pub mod resolver;
pub mod handler;
pub mod consumer;
pub mod builder;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{Connector, ConnectorBuilder};
pub use self::consumer::{ConsumerGroup, ShutdownHandle};
pub use self::handler::DeliveryHandler;
pub use self::resolver::{DEFAULT_IDENTITY_FIELD, KeyResolver};
pub use self::status::{DeliveryCounts, DeliveryStats};
