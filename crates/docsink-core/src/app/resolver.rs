//! KeyResolver - メッセージ本文から保存キーを決める
//!
//! # ポリシー
//! 1. JSON モードでなければ、常に新規生成キー
//! 2. JSON モードで key field 未設定なら、既定の identity（`messageId`）を見る
//! 3. key field を先頭から走査し、最初に「存在する」フィールドで決着する
//!    - 文字列ならそれがキー
//!    - 文字列以外なら TypeError（後続フィールドは見ない）
//! 4. どのフィールドも存在しなければ新規生成キー
//!
//! JSON として読めない本文は ParseError。再配送しても読めるようにはならない。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::domain::errors::json_type_name;
use crate::domain::{DocKey, KeyError, KeyFieldList, KeyOrigin, ResolvedKey};
use crate::ports::KeyGenerator;

/// Conventional name of the default identity field.
pub const DEFAULT_IDENTITY_FIELD: &str = "messageId";

/// KeyResolver は起動時設定だけを保持する（不変・共有可能）
///
/// 内部状態を持たないので、複数の handler から同時に `resolve` してよい。
pub struct KeyResolver {
    json: bool,
    key_fields: KeyFieldList,
    generator: Arc<dyn KeyGenerator>,
}

impl KeyResolver {
    pub fn new(json: bool, key_fields: KeyFieldList, generator: Arc<dyn KeyGenerator>) -> Self {
        Self {
            json,
            key_fields,
            generator,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn key_fields(&self) -> &KeyFieldList {
        &self.key_fields
    }

    pub fn resolve(&self, body: &[u8]) -> Result<ResolvedKey, KeyError> {
        if !self.json {
            return Ok(self.generated());
        }

        let object: Map<String, Value> = serde_json::from_slice(body)?;

        if self.key_fields.is_empty()
            && let Some(key) = default_identity(&object)?
        {
            return Ok(ResolvedKey::new(key, KeyOrigin::DefaultIdentity));
        }

        match scan_key_fields(&object, &self.key_fields)? {
            Some(resolved) => Ok(resolved),
            None => Ok(self.generated()),
        }
    }

    fn generated(&self) -> ResolvedKey {
        ResolvedKey::new(self.generator.generate(), KeyOrigin::Generated)
    }
}

/// `messageId` が非空文字列ならそれを返す。null・空文字・欠落は「なし」。
fn default_identity(object: &Map<String, Value>) -> Result<Option<DocKey>, KeyError> {
    match object.get(DEFAULT_IDENTITY_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) if id.is_empty() => Ok(None),
        Some(Value::String(id)) => Ok(Some(DocKey::new(id.as_str()))),
        Some(other) => Err(KeyError::Parse(format!(
            "{DEFAULT_IDENTITY_FIELD} must be a string, found {}",
            json_type_name(other)
        ))),
    }
}

/// 設定順に走査し、最初に存在したフィールドで打ち切る。
fn scan_key_fields(
    object: &Map<String, Value>,
    fields: &KeyFieldList,
) -> Result<Option<ResolvedKey>, KeyError> {
    for field in fields.iter() {
        let Some(value) = object.get(field) else {
            continue;
        };

        return match value {
            Value::String(key) => Ok(Some(ResolvedKey::new(
                DocKey::new(key.as_str()),
                KeyOrigin::Field(field.to_string()),
            ))),
            other => Err(KeyError::Type {
                field: field.to_string(),
                found: json_type_name(other),
            }),
        };
    }
    Ok(None)
}
