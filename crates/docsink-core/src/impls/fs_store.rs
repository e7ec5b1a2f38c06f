//! FsBucket - 1 ドキュメント = 1 ファイルの bucket
//!
//! # 学習ポイント
//! - 一時ファイルに書いてから hard link で公開（create-new をアトミックに）
//! - async context でのブロッキング I/O は spawn_blocking に逃がす
//!
//! # レイアウト
//! ```text
//! <root>/<bucket>/            bucket ディレクトリ（事前に作成しておく）
//! <root>/<bucket>/.password   任意。存在すれば open 時のパスワードと照合
//! <root>/<bucket>/<encoded>   ドキュメント本体
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;
use ulid::Ulid;

use crate::domain::DocKey;
use crate::ports::{DocumentStore, Expiry, StoreError};

const PASSWORD_FILE: &str = ".password";
const MAX_FILE_NAME: usize = 240;

/// FsBucket はディレクトリを bucket として扱う
#[derive(Debug, Clone)]
pub struct FsBucket {
    dir: PathBuf,
}

impl FsBucket {
    /// Open an existing bucket directory.
    pub fn open(dir: impl Into<PathBuf>, password: Option<&str>) -> io::Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("bucket directory {} does not exist", dir.display()),
            ));
        }

        match fs::read_to_string(dir.join(PASSWORD_FILE)) {
            Ok(expected) => {
                if password != Some(expected.trim_end_matches(['\r', '\n'])) {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "bucket password mismatch",
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn doc_path(&self, key: &DocKey) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(encode_key(key)?))
    }
}

/// キーをファイル名に変換する。`[A-Za-z0-9_-]` 以外は `%XX`。
///
/// `.` も必ずエスケープされるので、`.password` や一時ファイルと衝突しない。
pub fn encode_key(key: &DocKey) -> Result<String, StoreError> {
    let raw = key.as_str();
    if raw.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }

    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }

    if encoded.len() > MAX_FILE_NAME {
        return Err(StoreError::InvalidKey(format!(
            "key too long for file bucket ({} bytes encoded)",
            encoded.len()
        )));
    }
    Ok(encoded)
}

fn write_new(dir: &Path, path: &Path, body: &[u8]) -> Result<(), io::Error> {
    let tmp = dir.join(format!(".tmp-{}", Ulid::new()));
    let result = (|| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(body)?;
        file.sync_data()?;
        // hard_link は宛先が存在すると AlreadyExists で失敗する
        fs::hard_link(&tmp, path)
    })();
    let _ = fs::remove_file(&tmp);
    result
}

#[async_trait]
impl DocumentStore for FsBucket {
    async fn insert(&self, key: &DocKey, body: &[u8], expiry: Expiry) -> Result<(), StoreError> {
        if expiry != Expiry::Never {
            trace!(%key, ?expiry, "file bucket ignores document expiry");
        }

        let path = self.doc_path(key)?;
        let dir = self.dir.clone();
        let body = body.to_vec();

        let written = tokio::task::spawn_blocking(move || write_new(&dir, &path, &body))
            .await
            .map_err(|e| StoreError::Unavailable(format!("insert task failed: {e}")))?;

        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(key.clone()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn get(&self, key: &DocKey) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.doc_path(key)?;
        let read = tokio::task::spawn_blocking(move || fs::read(path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("get task failed: {e}")))?;

        match read {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_key_escapes_separators_and_dots() {
        assert_eq!(encode_key(&DocKey::new("user-1_a")).unwrap(), "user-1_a");
        assert_eq!(encode_key(&DocKey::new("a/b")).unwrap(), "a%2Fb");
        assert_eq!(encode_key(&DocKey::new("..")).unwrap(), "%2E%2E");
        assert_eq!(encode_key(&DocKey::new(".password")).unwrap(), "%2Epassword");
        assert_eq!(encode_key(&DocKey::new("é")).unwrap(), "%C3%A9");
    }

    #[test]
    fn encode_key_rejects_empty_and_oversized() {
        assert!(matches!(
            encode_key(&DocKey::new("")),
            Err(StoreError::InvalidKey(_))
        ));
        let long = "/".repeat(100);
        assert!(matches!(
            encode_key(&DocKey::new(long)),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn open_requires_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let err = FsBucket::open(tmp.path().join("missing"), None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn open_checks_password_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PASSWORD_FILE), "s3cret\n").unwrap();

        assert!(FsBucket::open(tmp.path(), Some("s3cret")).is_ok());
        let err = FsBucket::open(tmp.path(), Some("wrong")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(FsBucket::open(tmp.path(), None).is_err());
    }

    #[tokio::test]
    async fn insert_creates_one_file_and_conflicts_on_second() {
        let tmp = tempfile::tempdir().unwrap();
        let bucket = FsBucket::open(tmp.path(), None).unwrap();
        let key = DocKey::new("orders/42");

        bucket.insert(&key, b"{\"n\":1}", Expiry::Never).await.unwrap();
        let err = bucket.insert(&key, b"{\"n\":2}", Expiry::Never).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(
            bucket.get(&key).await.unwrap().as_deref(),
            Some(&b"{\"n\":1}"[..])
        );
        // 一時ファイルは残らない
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["orders%2F42".to_string()]);
    }

    #[tokio::test]
    async fn get_missing_document_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let bucket = FsBucket::open(tmp.path(), None).unwrap();
        assert!(bucket.get(&DocKey::new("nope")).await.unwrap().is_none());
    }
}
