use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

use super::{EngineKind, NonBlankLines, TranslationEngine};
use crate::config::TranslateConfig;
use crate::error::{Result, TtmlError};
use crate::gcp::{GcpContext, describe_failure};

/// Ordered batch translation backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MachineTranslator: Send + Sync {
    /// Translate `contents` in one request; the result should match it element for element
    async fn translate_batch(&self, contents: &[String], target_language: &str) -> Result<Vec<String>>;
}

/// Cloud Translation v3 `translateText` client
pub struct CloudTranslateClient {
    ctx: GcpContext,
    config: TranslateConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateTextRequest<'a> {
    contents: &'a [String],
    target_language_code: &'a str,
    mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslateTextResponse {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    #[serde(default)]
    translated_text: String,
}

impl CloudTranslateClient {
    pub fn new(ctx: GcpContext, config: TranslateConfig) -> Self {
        Self { ctx, config }
    }

    fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.ctx.project_id(), self.config.location)
    }

    fn endpoint(&self) -> String {
        format!("https://translation.googleapis.com/v3/{}:translateText", self.parent())
    }

    /// Full model resource name; short forms like "general/base" are expanded
    fn model_resource(&self) -> Option<String> {
        self.config.model.as_deref().filter(|m| !m.is_empty()).map(|model| {
            if model.starts_with("projects/") {
                model.to_string()
            } else {
                format!("{}/models/{}", self.parent(), model)
            }
        })
    }
}

#[async_trait]
impl MachineTranslator for CloudTranslateClient {
    async fn translate_batch(&self, contents: &[String], target_language: &str) -> Result<Vec<String>> {
        let request = TranslateTextRequest {
            contents,
            target_language_code: target_language,
            mime_type: "text/plain",
            model: self.model_resource(),
        };

        debug!("Sending {} segments to {}", contents.len(), self.endpoint());
        let response = self
            .ctx
            .execute(self.ctx.post(&self.endpoint()).json(&request))
            .await?;

        if !response.status().is_success() {
            return Err(TtmlError::Backend(format!(
                "Cloud Translation API error {}",
                describe_failure(response).await
            )));
        }

        let body: TranslateTextResponse = response
            .json()
            .await
            .map_err(|e| TtmlError::Backend(format!("Failed to parse response: {}", e)))?;

        Ok(body.translations.into_iter().map(|t| t.translated_text).collect())
    }
}

/// Translation engine over an order-preserving batch backend
pub struct BatchMtEngine<B> {
    backend: B,
    max_segments: usize,
    max_codepoints: usize,
}

impl<B: MachineTranslator> BatchMtEngine<B> {
    pub fn new(backend: B, max_segments: usize, max_codepoints: usize) -> Self {
        Self {
            backend,
            max_segments: max_segments.max(1),
            max_codepoints: max_codepoints.max(1),
        }
    }
}

#[async_trait]
impl<B: MachineTranslator> TranslationEngine for BatchMtEngine<B> {
    fn name(&self) -> &'static str {
        EngineKind::Translate.label()
    }

    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>> {
        let pending = NonBlankLines::collect(texts);
        let lines = pending.lines();
        let batches = plan_batches(lines, self.max_segments, self.max_codepoints);
        info!(
            "Translating {} of {} lines to {} in {} request(s)",
            lines.len(), texts.len(), target_language, batches.len()
        );

        let mut translated = Vec::with_capacity(lines.len());
        for range in batches {
            let chunk = &lines[range.clone()];
            let result = self.backend.translate_batch(chunk, target_language).await?;

            if result.len() != chunk.len() {
                return Err(TtmlError::Alignment {
                    expected: chunk.len(),
                    actual: result.len(),
                });
            }
            debug!("Batch {}..{} translated", range.start, range.end);
            translated.extend(result);
        }

        Ok(pending.merge(texts, translated))
    }
}

/// Split `texts` into consecutive ranges bounded by segment and code point counts.
/// A single string over the code point limit gets a range of its own.
pub fn plan_batches(texts: &[String], max_segments: usize, max_codepoints: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut codepoints = 0;

    for (i, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        let full = i - start >= max_segments || (i > start && codepoints + len > max_codepoints);
        if full {
            batches.push(start..i);
            start = i;
            codepoints = 0;
        }
        codepoints += len;
    }

    if start < texts.len() {
        batches.push(start..texts.len());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcpConfig;
    use mockall::Sequence;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_batches_by_count() {
        let texts = strings(&["a", "b", "c", "d", "e"]);
        assert_eq!(plan_batches(&texts, 2, 1000), vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn test_plan_batches_by_codepoints() {
        let texts = strings(&["aaaa", "bbbb", "cc", "ddddddddddd", "e"]);
        assert_eq!(plan_batches(&texts, 100, 10), vec![0..3, 3..4, 4..5]);
    }

    #[test]
    fn test_plan_batches_empty() {
        assert!(plan_batches(&[], 10, 10).is_empty());
    }

    #[tokio::test]
    async fn test_scenario_french_batch() {
        let mut backend = MockMachineTranslator::new();
        backend
            .expect_translate_batch()
            .withf(|contents, lang| contents == ["Hello", "World"] && lang == "fr")
            .times(1)
            .returning(|_, _| Ok(strings(&["Bonjour", "Monde"])));

        let engine = BatchMtEngine::new(backend, 128, 30_000);
        let out = engine.translate(&strings(&["Hello", "World", ""]), "fr").await.unwrap();
        assert_eq!(out, strings(&["Bonjour", "Monde", ""]));
    }

    #[tokio::test]
    async fn test_sub_batches_concatenate_in_order() {
        let mut backend = MockMachineTranslator::new();
        let mut seq = Sequence::new();
        backend
            .expect_translate_batch()
            .withf(|contents, _| contents == ["one", "two"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(strings(&["uno", "dos"])));
        backend
            .expect_translate_batch()
            .withf(|contents, _| contents == ["three"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(strings(&["tres"])));

        let engine = BatchMtEngine::new(backend, 2, 30_000);
        let out = engine.translate(&strings(&["one", "two", "three"]), "es").await.unwrap();
        assert_eq!(out, strings(&["uno", "dos", "tres"]));
    }

    #[tokio::test]
    async fn test_wrong_count_is_fatal() {
        let mut backend = MockMachineTranslator::new();
        backend
            .expect_translate_batch()
            .times(1)
            .returning(|_, _| Ok(strings(&["Bonjour"])));

        let engine = BatchMtEngine::new(backend, 128, 30_000);
        let err = engine.translate(&strings(&["Hello", "World"]), "fr").await.unwrap_err();
        assert!(matches!(err, TtmlError::Alignment { expected: 2, actual: 1 }));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let mut backend = MockMachineTranslator::new();
        backend
            .expect_translate_batch()
            .returning(|_, _| Err(TtmlError::Backend("quota exceeded".to_string())));

        let engine = BatchMtEngine::new(backend, 128, 30_000);
        assert!(matches!(
            engine.translate(&strings(&["Hello"]), "fr").await,
            Err(TtmlError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_lines_skip_the_backend() {
        let mut backend = MockMachineTranslator::new();
        backend
            .expect_translate_batch()
            .withf(|contents, _| contents == ["Hello", "World"])
            .times(1)
            .returning(|_, _| Ok(strings(&["Hallo", "Welt"])));

        let engine = BatchMtEngine::new(backend, 128, 30_000);
        let out = engine
            .translate(&strings(&["", "Hello", "  ", "World"]), "de")
            .await
            .unwrap();
        assert_eq!(out, strings(&["", "Hallo", "  ", "Welt"]));

        let idle = BatchMtEngine::new(MockMachineTranslator::new(), 128, 30_000);
        assert_eq!(idle.translate(&strings(&["", " "]), "de").await.unwrap(), strings(&["", " "]));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let backend = MockMachineTranslator::new();
        let engine = BatchMtEngine::new(backend, 128, 30_000);
        assert!(engine.translate(&[], "fr").await.unwrap().is_empty());
    }

    #[test]
    fn test_request_shape_and_model_resource() {
        let gcp = GcpConfig {
            project_id: "acme".to_string(),
            ..GcpConfig::default()
        };
        let ctx = GcpContext::new(&gcp, "tok".to_string()).unwrap();
        let config = TranslateConfig {
            model: Some("general/base".to_string()),
            ..TranslateConfig::default()
        };
        let client = CloudTranslateClient::new(ctx, config);

        assert_eq!(
            client.endpoint(),
            "https://translation.googleapis.com/v3/projects/acme/locations/global:translateText"
        );
        assert_eq!(
            client.model_resource().as_deref(),
            Some("projects/acme/locations/global/models/general/base")
        );

        let contents = strings(&["Hi"]);
        let body = serde_json::to_value(TranslateTextRequest {
            contents: &contents,
            target_language_code: "de",
            mime_type: "text/plain",
            model: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"contents": ["Hi"], "targetLanguageCode": "de", "mimeType": "text/plain"})
        );
    }

    #[test]
    fn test_response_parsing() {
        let body: TranslateTextResponse = serde_json::from_str(
            r#"{"translations": [{"translatedText": "Hallo", "detectedLanguageCode": "en"}, {"translatedText": ""}]}"#,
        )
        .unwrap();
        let texts: Vec<_> = body.translations.into_iter().map(|t| t.translated_text).collect();
        assert_eq!(texts, vec!["Hallo", ""]);
    }
}
