use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::{Result, TtmlError};
use crate::storage::ObjectStore;

pub const TTML_CONTENT_TYPE: &str = "application/ttml+xml";

/// `<basename>_<lang>.ttml`
pub fn output_file_name(basename: &str, language: &str) -> String {
    format!("{}_{}.ttml", basename, language)
}

/// Write serialized output under `output_dir`, creating it if needed
pub async fn write_local(output_dir: &Path, file_name: &str, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(file_name);
    fs::write(&path, content).await?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Uploads translated files to `<bucket>/<prefix>/<name>`, creating the bucket
/// and prefix placeholder on first use
pub struct Publisher<S> {
    store: S,
    bucket: String,
    prefix: String,
    location: String,
    bucket_ready: OnceCell<()>,
    prefix_ready: OnceCell<()>,
}

impl<S: ObjectStore> Publisher<S> {
    pub fn new(store: S, bucket: &str, prefix: &str, location: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            location: location.to_string(),
            bucket_ready: OnceCell::new(),
            prefix_ready: OnceCell::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a file name under the configured prefix
    pub fn object_key(&self, file_name: &str) -> String {
        if self.prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    /// Check-then-create; only runs once per publisher
    pub async fn ensure_bucket(&self) -> Result<()> {
        self.bucket_ready
            .get_or_try_init(|| async {
                if self.store.bucket_exists(&self.bucket).await? {
                    info!("Using existing bucket gs://{}", self.bucket);
                } else {
                    info!("Bucket gs://{} not found, creating it in {}", self.bucket, self.location);
                    self.store.create_bucket(&self.bucket, &self.location).await?;
                }
                Ok::<(), TtmlError>(())
            })
            .await?;
        Ok(())
    }

    /// Make the prefix visible as a folder by uploading an empty `<prefix>/` object
    pub async fn ensure_prefix(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Ok(());
        }

        self.prefix_ready
            .get_or_try_init(|| async {
                let placeholder = format!("{}/", self.prefix);
                if !self.store.object_exists(&self.bucket, &placeholder).await? {
                    self.store
                        .upload(&self.bucket, &placeholder, Vec::new(), "application/x-directory")
                        .await?;
                    info!("Created prefix gs://{}/{}", self.bucket, placeholder);
                }
                Ok::<(), TtmlError>(())
            })
            .await?;
        Ok(())
    }

    /// Upload a local file as `<prefix>/<file name>` and return its `gs://` URI
    pub async fn publish(&self, local_path: &Path) -> Result<String> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TtmlError::Storage(format!("Invalid file name: {}", local_path.display())))?;

        self.ensure_bucket().await?;
        self.ensure_prefix().await?;

        let data = fs::read(local_path).await?;
        let key = self.object_key(file_name);
        let uri = self
            .store
            .upload(&self.bucket, &key, data, TTML_CONTENT_TYPE)
            .await?;

        info!("Uploaded {} -> {}", local_path.display(), uri);
        Ok(uri)
    }
}
