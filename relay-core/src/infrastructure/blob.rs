// relay-core/src/infrastructure/blob.rs
//
// Blob backend selection: S3 through object_store, or the local
// filesystem under LOCAL_STORAGE_PATH. URIs recorded on runs are either
// `s3://bucket/key` or the absolute local path; the query engine reads
// whichever form it finds.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use datafusion::prelude::SessionContext;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use url::Url;

use crate::error::RelayError;
use crate::infrastructure::config::{Settings, StorageMode};

pub struct BlobStore {
    mode: StorageMode,
    local_root: PathBuf,
    region: String,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
}

impl BlobStore {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: settings.storage_mode,
            local_root: settings.local_storage_path.clone(),
            region: settings.aws_region.clone(),
            access_key_id: settings.aws_access_key_id.clone(),
            secret_access_key: settings.aws_secret_access_key.clone(),
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// URI an object will be addressable under once written.
    pub fn uri_for(&self, bucket: &str, key: &str) -> Result<String, RelayError> {
        match self.mode {
            StorageMode::S3 => Ok(format!("s3://{bucket}/{key}")),
            StorageMode::Local => {
                let path = std::path::absolute(self.local_root.join(bucket).join(key))?;
                Ok(path.to_string_lossy().into_owned())
            }
        }
    }

    /// Write raw bytes and return the recorded URI.
    pub async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<String, RelayError> {
        match self.mode {
            StorageMode::Local => {
                let uri = self.uri_for(bucket, key)?;
                let path = PathBuf::from(&uri);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, bytes).await?;
                Ok(uri)
            }
            StorageMode::S3 => {
                let store = self.s3_store(bucket)?;
                store
                    .put(&ObjectPath::from(key), Bytes::from(bytes).into())
                    .await?;
                Ok(format!("s3://{bucket}/{key}"))
            }
        }
    }

    fn s3_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, RelayError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(self.region.clone());
        if let (Some(key_id), Some(secret)) = (&self.access_key_id, &self.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id.clone())
                .with_secret_access_key(secret.clone());
        }
        Ok(Arc::new(builder.build()?))
    }

    /// Make `s3://bucket/...` URLs resolvable inside a DataFusion session.
    /// No-op in local mode, where absolute paths resolve natively.
    pub fn register_bucket(&self, ctx: &SessionContext, bucket: &str) -> Result<(), RelayError> {
        if self.mode != StorageMode::S3 {
            return Ok(());
        }
        let url = Url::parse(&format!("s3://{bucket}"))
            .map_err(|e| RelayError::Internal(format!("Bad bucket URL: {e}")))?;
        ctx.register_object_store(&url, self.s3_store(bucket)?);
        Ok(())
    }

    /// Register whatever bucket a recorded `s3://` URI points at.
    pub fn register_for_uri(&self, ctx: &SessionContext, uri: &str) -> Result<(), RelayError> {
        if let Some(rest) = uri.strip_prefix("s3://") {
            if let Some((bucket, _)) = rest.split_once('/') {
                self.register_bucket(ctx, bucket)?;
            }
        }
        Ok(())
    }

    /// Make sure the parent directory of a local target exists before a
    /// DataFusion writer opens it. No-op in S3 mode.
    pub async fn prepare_local_parent(&self, uri: &str) -> Result<(), RelayError> {
        if self.mode == StorageMode::Local {
            if let Some(parent) = PathBuf::from(uri).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_store(root: &std::path::Path) -> BlobStore {
        BlobStore {
            mode: StorageMode::Local,
            local_root: root.to_path_buf(),
            region: "us-west-1".into(),
            access_key_id: None,
            secret_access_key: None,
        }
    }

    #[tokio::test]
    async fn test_local_put_returns_absolute_path() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let blob = local_store(tmp.path());
        let uri = blob
            .put_bytes("demo", "data/2024.csv", b"a,b\n1,2\n".to_vec())
            .await?;
        assert!(PathBuf::from(&uri).is_absolute());
        assert_eq!(std::fs::read_to_string(&uri)?, "a,b\n1,2\n");
        Ok(())
    }

    #[test]
    fn test_s3_uri_shape() -> anyhow::Result<()> {
        let blob = BlobStore {
            mode: StorageMode::S3,
            local_root: PathBuf::new(),
            region: "us-west-1".into(),
            access_key_id: None,
            secret_access_key: None,
        };
        assert_eq!(
            blob.uri_for("bucket", "path/file.parquet")?,
            "s3://bucket/path/file.parquet"
        );
        Ok(())
    }
}
