//! Cluster - 接続文字列からストアに接続し、bucket を開く
//!
//! # 対応する接続文字列
//! - `mem://`: プロセス内の cluster（bucket は初回 open で作成）
//! - `file:///path/to/root`: ディレクトリ（存在しなければ接続エラー）

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use super::fs_store::FsBucket;
use super::inmem_store::InMemoryBucket;
use crate::error::ConnectError;
use crate::ports::DocumentStore;

const MEM_SCHEME: &str = "mem://";
const FILE_SCHEME: &str = "file://";

/// Connect to a document store.
pub fn connect(connection_string: &str) -> Result<Cluster, ConnectError> {
    if connection_string.starts_with(MEM_SCHEME) {
        info!(connection_string, "connected to in-memory document store");
        return Ok(Cluster::Memory(MemoryCluster::default()));
    }

    if let Some(root) = connection_string.strip_prefix(FILE_SCHEME) {
        let root = PathBuf::from(root);
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ConnectError::Unreachable {
                    path: root,
                    source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
                });
            }
            Err(source) => return Err(ConnectError::Unreachable { path: root, source }),
        }
        info!(root = %root.display(), "connected to file document store");
        return Ok(Cluster::Fs { root });
    }

    Err(ConnectError::UnsupportedScheme(connection_string.to_string()))
}

/// A connected document store, able to open buckets.
#[derive(Debug)]
pub enum Cluster {
    Memory(MemoryCluster),
    Fs { root: PathBuf },
}

impl Cluster {
    pub fn open_bucket(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<Arc<dyn DocumentStore>, ConnectError> {
        validate_bucket_name(name)?;
        match self {
            Cluster::Memory(cluster) => Ok(cluster.open_bucket(name, password)?),
            Cluster::Fs { root } => {
                let bucket = FsBucket::open(root.join(name), password).map_err(|source| {
                    if source.kind() == io::ErrorKind::PermissionDenied {
                        ConnectError::Auth(name.to_string())
                    } else {
                        ConnectError::Bucket {
                            bucket: name.to_string(),
                            source,
                        }
                    }
                })?;
                Ok(Arc::new(bucket))
            }
        }
    }
}

/// In-process cluster. A bucket remembers the password it was first opened with.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    buckets: Mutex<HashMap<String, MemoryBucketEntry>>,
}

struct MemoryBucketEntry {
    password: Option<String>,
    bucket: Arc<InMemoryBucket>,
}

impl std::fmt::Debug for MemoryBucketEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBucketEntry")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl MemoryCluster {
    /// Open (or create) a bucket, returning the concrete type.
    pub fn open_bucket(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<Arc<InMemoryBucket>, ConnectError> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = buckets
            .entry(name.to_string())
            .or_insert_with(|| MemoryBucketEntry {
                password: password.map(str::to_string),
                bucket: Arc::new(InMemoryBucket::new()),
            });
        if entry.password.as_deref() != password {
            return Err(ConnectError::Auth(name.to_string()));
        }
        Ok(Arc::clone(&entry.bucket))
    }
}

fn validate_bucket_name(name: &str) -> Result<(), ConnectError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '%'));
    if valid {
        Ok(())
    } else {
        Err(ConnectError::InvalidBucketName(name.to_string()))
    }
}
