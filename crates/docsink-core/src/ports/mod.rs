//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（キューの transport、ドキュメントストア）への
//! 狭いインターフェースだけを提供し、接続まわりの詳細は実装側に閉じ込めます。
//!
//! # 設計原則
//! - キュー: `receive()` と配送ハンドルの `finish()` / `requeue()` だけ
//! - ストア: `insert(key, bytes, expiry) -> ok | conflict | error` だけ
//! - 時刻と ID 生成は差し替え可能（テストで決定的にするため）

pub mod message_source;
pub mod document_store;
pub mod clock;
pub mod key_generator;

pub use self::message_source::{Delivery, MessageSource, QueueError};
pub use self::document_store::{DocumentStore, Expiry, StoreError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::key_generator::{KeyGenerator, UlidKeyGenerator};
