use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

use crate::error::{Result, TtmlError};

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_gcloud_binary() -> String {
    "gcloud".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_translate_location() -> String {
    "global".to_string()
}

fn default_max_segments_per_request() -> usize {
    128
}

fn default_max_codepoints_per_request() -> usize {
    30_000
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_chunk_size() -> usize {
    40
}

fn default_output_folder() -> String {
    "output".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcpConfig {
    /// Billing/quota project forced onto every API call (`PROJECT_ID`)
    #[serde(default)]
    pub project_id: String,
    /// Compute region for Vertex AI (`GCP_REGION`)
    #[serde(default = "default_region")]
    pub region: String,
    /// Pre-issued OAuth access token (`GOOGLE_OAUTH_ACCESS_TOKEN`)
    #[serde(default)]
    pub access_token: Option<String>,
    /// Binary used to mint an access token when none is configured
    #[serde(default = "default_gcloud_binary")]
    pub gcloud_binary: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries for throttled or failed (5xx) API calls
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateConfig {
    /// Cloud Translation location
    #[serde(default = "default_translate_location")]
    pub location: String,
    /// Optional Cloud Translation model, e.g. "general/base"
    #[serde(default)]
    pub model: Option<String>,
    /// Upper bound on strings per translateText request
    #[serde(default = "default_max_segments_per_request")]
    pub max_segments_per_request: usize,
    /// Upper bound on code points per translateText request
    #[serde(default = "default_max_codepoints_per_request")]
    pub max_codepoints_per_request: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    /// Vertex AI model name
    #[serde(default = "default_gemini_model")]
    pub model: String,
    /// Lines sent per batched prompt
    #[serde(default = "default_gemini_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Destination bucket (`BUCKET_NAME`), may reference `${PROJECT_ID}`
    #[serde(default)]
    pub bucket_name: String,
    /// Destination path prefix (`OUTPUT_FOLDER`)
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    /// Location for newly created buckets; falls back to the GCP region, then "US"
    #[serde(default)]
    pub bucket_location: Option<String>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: default_region(),
            access_token: None,
            gcloud_binary: default_gcloud_binary(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            location: default_translate_location(),
            model: None,
            max_segments_per_request: default_max_segments_per_request(),
            max_codepoints_per_request: default_max_codepoints_per_request(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            chunk_size: default_gemini_chunk_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            output_folder: default_output_folder(),
            bucket_location: None,
        }
    }
}

impl StorageConfig {
    /// Output folder without leading or trailing slashes
    pub fn prefix(&self) -> &str {
        self.output_folder.trim_matches('/')
    }

    pub fn bucket_location<'a>(&'a self, region: Option<&'a str>) -> &'a str {
        self.bucket_location
            .as_deref()
            .or(region)
            .filter(|loc| !loc.is_empty())
            .unwrap_or("US")
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TtmlError::Config(format!("Failed to read config file: {}", e)))?;

        Ok(toml::from_str(&content)?)
    }

    /// Load the explicit config file, else `config.toml` if present, else defaults,
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None if Path::new("config.toml").exists() => {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            }
            None => Config::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override settings from `PROJECT_ID`, `GCP_REGION`, `BUCKET_NAME`,
    /// `OUTPUT_FOLDER` and `GOOGLE_OAUTH_ACCESS_TOKEN`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(project_id) = non_empty("PROJECT_ID") {
            self.gcp.project_id = project_id.trim().to_string();
        }
        if let Some(region) = non_empty("GCP_REGION") {
            self.gcp.region = region.trim().to_string();
        }
        if let Some(bucket) = non_empty("BUCKET_NAME") {
            self.storage.bucket_name = bucket.trim().to_string();
        }
        if let Some(folder) = non_empty("OUTPUT_FOLDER") {
            self.storage.output_folder = folder.trim().to_string();
        }
        if let Some(token) = non_empty("GOOGLE_OAUTH_ACCESS_TOKEN") {
            self.gcp.access_token = Some(token.trim().to_string());
        }

        let project_id = self.gcp.project_id.clone();
        self.storage.bucket_name = expand_env_vars(&self.storage.bucket_name, |key| {
            if key == "PROJECT_ID" && !project_id.is_empty() {
                Some(project_id.clone())
            } else {
                lookup(key)
            }
        });
    }

    /// Check the settings every run needs; the bucket is only needed when uploading
    pub fn validate(&self, require_bucket: bool) -> Result<()> {
        if self.gcp.project_id.is_empty() {
            return Err(TtmlError::Config(
                "PROJECT_ID must be set in .env, the environment or the config file".to_string(),
            ));
        }
        if require_bucket && self.storage.bucket_name.is_empty() {
            return Err(TtmlError::Config(
                "BUCKET_NAME must be set in .env, the environment or the config file".to_string(),
            ));
        }
        if self.gemini.chunk_size == 0 || self.translate.max_segments_per_request == 0 {
            return Err(TtmlError::Config(
                "Batch sizes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `${VAR}` and `$VAR` references; unknown variables are left as written
pub fn expand_env_vars<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static pattern is valid")
    });

    pattern
        .replace_all(value, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Split a comma-separated language list, trimming and dropping empty entries
pub fn parse_languages(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
