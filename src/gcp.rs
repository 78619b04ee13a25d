// Google Cloud plumbing shared by the translation backends and the storage client:
// process identity, access tokens and authenticated requests with retry.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::GcpConfig;
use crate::error::{Result, TtmlError};

/// Variables the Google tooling reads to pick a project
pub const PROJECT_ENV_VARS: [&str; 4] = [
    "GOOGLE_CLOUD_PROJECT",
    "GCLOUD_PROJECT",
    "CLOUDSDK_CORE_PROJECT",
    "GOOGLE_CLOUD_QUOTA_PROJECT",
];

/// Header that pins billing and quota to a project
pub const USER_PROJECT_HEADER: &str = "x-goog-user-project";

/// Point every project-selecting environment variable at `project_id`.
///
/// # Safety
///
/// Mutates the process environment. Must be called while no other thread
/// exists, i.e. before the async runtime is built.
pub unsafe fn force_process_identity(project_id: &str) {
    for key in PROJECT_ENV_VARS {
        // SAFETY: upheld by the caller, see above.
        unsafe { std::env::set_var(key, project_id) };
    }
}

/// Resolve an OAuth access token: configured value first, then `gcloud`
pub async fn resolve_access_token(config: &GcpConfig) -> Result<String> {
    if let Some(token) = config.access_token.as_deref().filter(|t| !t.is_empty()) {
        debug!("Using configured access token");
        return Ok(token.to_string());
    }

    info!("Requesting access token from {}", config.gcloud_binary);
    let output = Command::new(&config.gcloud_binary)
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| TtmlError::Config(format!(
            "Failed to run {}: {}", config.gcloud_binary, e
        )))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TtmlError::Config(format!(
            "{} auth print-access-token failed: {}", config.gcloud_binary, stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(TtmlError::Config("Empty access token received".to_string()));
    }
    Ok(token)
}

/// Authenticated HTTP access to Google Cloud APIs for one project
#[derive(Debug, Clone)]
pub struct GcpContext {
    client: Client,
    project_id: String,
    access_token: String,
    max_retries: u32,
}

impl GcpContext {
    pub fn new(config: &GcpConfig, access_token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            project_id: config.project_id.clone(),
            access_token,
            max_retries: config.max_retries,
        })
    }

    /// Build a context, minting a token if none is configured
    pub async fn connect(config: &GcpConfig) -> Result<Self> {
        let token = resolve_access_token(config).await?;
        Self::new(config, token)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.access_token)
            .header(USER_PROJECT_HEADER, &self.project_id)
    }

    /// Send a request, retrying throttled (429) and server-side (5xx) failures.
    /// Any other status is handed back to the caller.
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let current = request
                .try_clone()
                .ok_or_else(|| TtmlError::Backend("Request body cannot be retried".to_string()))?;

            match current.send().await {
                Ok(response) if is_retryable(response.status()) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Request returned {}, retrying ({}/{})",
                        response.status(), attempt, self.max_retries
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("Request failed: {}, retrying ({}/{})", e, attempt, self.max_retries);
                }
                Err(e) => return Err(TtmlError::Http(e)),
            }

            tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Status line and body of a failed response, for error messages
pub async fn describe_failure(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{}: {}", status, body.trim())
}
