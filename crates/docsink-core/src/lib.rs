//! docsink-core
//!
//! メッセージキューの consumer とドキュメントストアをつなぐコネクタの中核。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（message, key, outcome, state, errors）
//! - **ports**: 抽象化レイヤー（MessageSource, Delivery, DocumentStore, Clock, KeyGenerator）
//! - **app**: アプリケーションロジック（resolver, handler, consumer, builder, status）
//! - **impls**: 実装（InMemoryMessageSource, InMemoryBucket, FsBucket, cluster）
//! - **config**: 起動時設定（TOML + CLI 上書き、fail-fast 検証）
//! - **telemetry**: tracing subscriber の初期化
//! - **error**: 起動時エラー（設定・接続）

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
pub mod config;
pub mod telemetry;
pub mod error;

pub use self::app::{ConnectorBuilder, ConsumerGroup, DeliveryHandler, KeyResolver};
pub use self::config::{ConnectorConfig, ValidatedConfig};
pub use self::error::DocsinkError;
