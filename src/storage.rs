use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, TtmlError};
use crate::gcp::{GcpContext, describe_failure};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Object storage operations the publisher relies on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str, location: &str) -> Result<()>;

    async fn object_exists(&self, bucket: &str, name: &str) -> Result<bool>;

    /// Upload `data` to `bucket/name` and return its `gs://` URI
    async fn upload(&self, bucket: &str, name: &str, data: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Cloud Storage JSON API client
pub struct GcsStore {
    ctx: GcpContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBucketRequest<'a> {
    name: &'a str,
    location: &'a str,
    storage_class: &'static str,
}

impl GcsStore {
    pub fn new(ctx: GcpContext) -> Self {
        Self { ctx }
    }

    fn url(base: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(base)
            .map_err(|e| TtmlError::Storage(format!("Invalid storage URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| TtmlError::Storage(format!("Storage URL cannot be a base: {}", base)))?
            .extend(segments);
        Ok(url)
    }

    fn bucket_url(bucket: &str) -> Result<Url> {
        Self::url(STORAGE_API, &["b", bucket])
    }

    fn object_url(bucket: &str, name: &str) -> Result<Url> {
        Self::url(STORAGE_API, &["b", bucket, "o", name])
    }

    fn upload_url(bucket: &str, name: &str) -> Result<Url> {
        let mut url = Self::url(UPLOAD_API, &["b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", name);
        Ok(url)
    }

    async fn exists(&self, url: Url, what: &str) -> Result<bool> {
        let response = self.ctx.execute(self.ctx.get(url.as_str())).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(TtmlError::Storage(format!(
                "Failed to look up {}: {}",
                what,
                describe_failure(response).await
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.exists(Self::bucket_url(bucket)?, &format!("bucket {}", bucket)).await
    }

    async fn create_bucket(&self, bucket: &str, location: &str) -> Result<()> {
        let mut url = Self::url(STORAGE_API, &["b"])?;
        url.query_pairs_mut().append_pair("project", self.ctx.project_id());

        let body = CreateBucketRequest {
            name: bucket,
            location,
            storage_class: "STANDARD",
        };
        let response = self.ctx.execute(self.ctx.post(url.as_str()).json(&body)).await?;

        match response.status() {
            status if status.is_success() => {
                info!("Created bucket gs://{} in {}", bucket, location);
                Ok(())
            }
            // Created concurrently by someone else; the bucket is there either way
            StatusCode::CONFLICT => {
                debug!("Bucket {} already exists", bucket);
                Ok(())
            }
            _ => Err(TtmlError::Storage(format!(
                "Failed to create bucket {}: {}",
                bucket,
                describe_failure(response).await
            ))),
        }
    }

    async fn object_exists(&self, bucket: &str, name: &str) -> Result<bool> {
        self.exists(Self::object_url(bucket, name)?, &format!("gs://{}/{}", bucket, name))
            .await
    }

    async fn upload(&self, bucket: &str, name: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        let url = Self::upload_url(bucket, name)?;
        debug!("Uploading {} bytes to gs://{}/{}", data.len(), bucket, name);

        let request = self
            .ctx
            .post(url.as_str())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        let response = self.ctx.execute(request).await?;

        if !response.status().is_success() {
            return Err(TtmlError::Storage(format!(
                "Upload of gs://{}/{} failed: {}",
                bucket,
                name,
                describe_failure(response).await
            )));
        }

        Ok(format!("gs://{}/{}", bucket, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_names_are_percent_encoded() {
        let url = GcsStore::object_url("subs", "output/ep 1_fr.ttml").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/subs/o/output%2Fep%201_fr.ttml"
        );
    }

    #[test]
    fn test_upload_url() {
        let url = GcsStore::upload_url("subs", "output/ep1_fr.ttml").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/upload/storage/v1/b/subs/o?uploadType=media&name=output%2Fep1_fr.ttml"
        );
    }

    #[test]
    fn test_bucket_url() {
        assert_eq!(
            GcsStore::bucket_url("acme-ttml").unwrap().as_str(),
            "https://storage.googleapis.com/storage/v1/b/acme-ttml"
        );
    }

    #[test]
    fn test_create_bucket_body() {
        let body = serde_json::to_value(CreateBucketRequest {
            name: "acme-ttml",
            location: "US",
            storage_class: "STANDARD",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"name": "acme-ttml", "location": "US", "storageClass": "STANDARD"})
        );
    }
}
