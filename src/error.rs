use thiserror::Error;

#[derive(Error, Debug)]
pub enum TtmlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("TTML parse error: {0}")]
    Parse(String),

    #[error("Alignment error: expected {expected} translations, got {actual}")]
    Alignment { expected: usize, actual: usize },

    #[error("Translation backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, TtmlError>;
