// Translation engines
//
// Both engines take an ordered list of source lines and return a list of the
// same length where `output[i]` translates `input[i]`:
// - Batch MT: Cloud Translation, strict order/length contract, no fallback
// - Generative: Gemini on Vertex AI, JSON-array prompt with a per-line fallback ladder

pub mod batch_mt;
pub mod generative;
pub mod json;

use async_trait::async_trait;

pub use batch_mt::{BatchMtEngine, CloudTranslateClient, MachineTranslator};
pub use generative::{FallbackStats, GenerativeEngine, GenerativeModel, VertexGeminiClient};

use crate::config::Config;
use crate::error::{Result, TtmlError};
use crate::gcp::GcpContext;

/// Non-blank lines of an input together with their positions in it.
///
/// Blank and whitespace-only lines never reach a backend; they are copied
/// through unchanged by `merge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NonBlankLines {
    positions: Vec<usize>,
    lines: Vec<String>,
}

impl NonBlankLines {
    pub(crate) fn collect(texts: &[String]) -> Self {
        let (positions, lines) = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| (i, text.clone()))
            .unzip();
        Self { positions, lines }
    }

    pub(crate) fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Position in the original input of each entry of `lines()`
    pub(crate) fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// `texts` with `translated[i]` written back at `positions()[i]`
    pub(crate) fn merge(&self, texts: &[String], translated: Vec<String>) -> Vec<String> {
        let mut out = texts.to_vec();
        for (&position, line) in self.positions.iter().zip(translated) {
            out[position] = line;
        }
        out
    }
}

/// Main trait for translation operations
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Short label used in logs and in the default output directory name
    fn name(&self) -> &'static str;

    /// Translate `texts` into `target_language`, preserving length and order
    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Gemini on Vertex AI
    Gemini,
    /// Cloud Translation API
    Translate,
}

impl EngineKind {
    /// Parse an engine name; `translateLLM` is accepted as an alias of `translate`
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "translate" | "translatellm" => Ok(Self::Translate),
            _ => Err(TtmlError::Config(format!(
                "Invalid engine '{}'. Valid engines: gemini, translate, translateLLM",
                name
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Translate => "translateLLM",
        }
    }
}

/// Factory for creating engine instances
pub struct EngineFactory;

impl EngineFactory {
    pub fn create(kind: EngineKind, config: &Config, ctx: &GcpContext) -> Box<dyn TranslationEngine> {
        match kind {
            EngineKind::Gemini => {
                let model = VertexGeminiClient::new(
                    ctx.clone(),
                    config.gcp.region.clone(),
                    config.gemini.model.clone(),
                );
                Box::new(GenerativeEngine::new(model, config.gemini.chunk_size))
            }
            EngineKind::Translate => {
                let backend = CloudTranslateClient::new(ctx.clone(), config.translate.clone());
                Box::new(BatchMtEngine::new(
                    backend,
                    config.translate.max_segments_per_request,
                    config.translate.max_codepoints_per_request,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcpConfig;

    #[test]
    fn test_blank_lines_are_set_aside() {
        let texts: Vec<String> = ["Hello", "", "  ", "World"].iter().map(|s| s.to_string()).collect();
        let pending = NonBlankLines::collect(&texts);

        assert_eq!(pending.lines(), ["Hello", "World"]);
        assert_eq!(pending.positions(), [0, 3]);
        assert_eq!(
            pending.merge(&texts, vec!["Hallo".to_string(), "Welt".to_string()]),
            vec!["Hallo", "", "  ", "Welt"]
        );
    }

    #[test]
    fn test_engine_names() {
        assert_eq!(EngineKind::parse("gemini").unwrap(), EngineKind::Gemini);
        assert_eq!(EngineKind::parse("translate").unwrap(), EngineKind::Translate);
        assert_eq!(EngineKind::parse("translateLLM").unwrap(), EngineKind::Translate);
        assert!(matches!(EngineKind::parse("deepl"), Err(TtmlError::Config(_))));
    }

    #[test]
    fn test_factory_labels() {
        let config = Config::default();
        let ctx = GcpContext::new(&GcpConfig::default(), "tok".to_string()).unwrap();

        assert_eq!(EngineFactory::create(EngineKind::Gemini, &config, &ctx).name(), "gemini");
        assert_eq!(
            EngineFactory::create(EngineKind::Translate, &config, &ctx).name(),
            "translateLLM"
        );
    }
}
