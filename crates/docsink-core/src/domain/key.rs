//! Key - ドキュメントの保存キー
//!
//! # 学習ポイント
//! - newtype による「ただの String」との区別
//! - キーの出自（どこから決まったか）を enum で表現

use serde::{Deserialize, Serialize};
use std::fmt;

/// DocKey はドキュメントストアに保存する際のキー
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocKey(String);

impl DocKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// KeyOrigin はキーがどこから決まったかを表す
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyOrigin {
    /// 既定の identity フィールド（`messageId`）から取得
    DefaultIdentity,

    /// 設定された key field から取得
    Field(String),

    /// 内容に依存しない新規生成キー
    Generated,
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrigin::DefaultIdentity => f.write_str("default_identity"),
            KeyOrigin::Field(name) => write!(f, "field:{name}"),
            KeyOrigin::Generated => f.write_str("generated"),
        }
    }
}

/// ResolvedKey は KeyResolver の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key: DocKey,
    pub origin: KeyOrigin,
}

impl ResolvedKey {
    pub fn new(key: DocKey, origin: KeyOrigin) -> Self {
        Self { key, origin }
    }

    pub fn is_generated(&self) -> bool {
        self.origin == KeyOrigin::Generated
    }
}

/// KeyFieldList は key として参照するフィールド名の順序付きリスト
///
/// 起動時に一度だけ構築し、以降は読み取り専用。
/// 先頭から順に見て、最初に「存在する」フィールドが採用される。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFieldList(Vec<String>);

impl KeyFieldList {
    pub fn new(fields: Vec<String>) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for KeyFieldList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for KeyFieldList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_field_list_keeps_configured_order() {
        let fields: KeyFieldList = ["uid", "id", "name"].into_iter().collect();
        let order: Vec<&str> = fields.iter().collect();
        assert_eq!(order, vec!["uid", "id", "name"]);
        assert_eq!(fields.to_string(), "uid,id,name");
    }

    #[test]
    fn key_field_list_deserializes_from_array() {
        let fields: KeyFieldList = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(fields.len(), 2);
        assert!(!fields.is_empty());
    }

    #[test]
    fn origin_display_names_field() {
        assert_eq!(KeyOrigin::Field("uid".into()).to_string(), "field:uid");
        assert_eq!(KeyOrigin::Generated.to_string(), "generated");
    }
}
