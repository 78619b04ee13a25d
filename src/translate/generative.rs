use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::json::parse_string_array;
use super::{EngineKind, NonBlankLines, TranslationEngine};
use crate::error::{Result, TtmlError};
use crate::gcp::{GcpContext, describe_failure};

/// Sampling and output settings for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub response_mime_type: &'static str,
}

impl GenerationSettings {
    /// Settings for the batched JSON-array request
    pub fn batch() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.4,
            max_output_tokens: 8192,
            response_mime_type: "application/json",
        }
    }

    /// Settings for single-line fallback requests
    pub fn per_line() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.4,
            max_output_tokens: 1024,
            response_mime_type: "text/plain",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Prompt parts, sent in order as one user turn
    pub parts: Vec<String>,
    pub settings: GenerationSettings,
}

/// Free-form text generation backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Run one generation request and return the response text
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Gemini `generateContent` on Vertex AI
pub struct VertexGeminiClient {
    ctx: GcpContext,
    region: String,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfigBody,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigBody {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

impl VertexGeminiClient {
    pub fn new(ctx: GcpContext, region: String, model: String) -> Self {
        Self { ctx, region, model }
    }

    fn endpoint(&self) -> String {
        let host = if self.region == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{}-aiplatform.googleapis.com", self.region)
        };
        format!(
            "https://{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            host,
            self.ctx.project_id(),
            self.region,
            self.model
        )
    }

    fn build_body<'a>(request: &'a GenerationRequest) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: request.parts.iter().map(|p| TextPart { text: p }).collect(),
            }],
            generation_config: GenerationConfigBody {
                temperature: request.settings.temperature,
                top_p: request.settings.top_p,
                max_output_tokens: request.settings.max_output_tokens,
                response_mime_type: request.settings.response_mime_type,
            },
            safety_settings: SAFETY_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_ONLY_HIGH",
                })
                .collect(),
        }
    }
}

/// Concatenated text of the first candidate
fn response_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[async_trait]
impl GenerativeModel for VertexGeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = Self::build_body(request);
        debug!("Sending generation request to: {}", self.endpoint());

        let response = self
            .ctx
            .execute(self.ctx.post(&self.endpoint()).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(TtmlError::Backend(format!(
                "Vertex AI error {}",
                describe_failure(response).await
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| TtmlError::Backend(format!("Failed to parse response: {}", e)))?;

        Ok(response_text(parsed))
    }
}

/// Outcome of the fallback ladder across one `translate` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackStats {
    /// Chunks sent as batched prompts
    pub chunks: usize,
    /// Chunks that had to be retried line by line
    pub fallback_chunks: usize,
    /// Global indices of lines that kept their source text
    pub substituted_lines: Vec<usize>,
}

/// Where a chunk is in the fallback ladder
enum Stage {
    Batch,
    PerLine,
    Done(Vec<String>),
}

/// Why a batched response was not accepted
#[derive(Debug)]
enum Rejection {
    Malformed,
    LengthMismatch { expected: usize, actual: usize },
}

/// Translation engine over a generative model with a batch → per-line ladder
pub struct GenerativeEngine<M> {
    model: M,
    chunk_size: usize,
}

impl<M: GenerativeModel> GenerativeEngine<M> {
    pub fn new(model: M, chunk_size: usize) -> Self {
        Self {
            model,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Translate and report how much of the fallback ladder was used
    pub async fn translate_with_stats(
        &self,
        texts: &[String],
        target_language: &str,
    ) -> Result<(Vec<String>, FallbackStats)> {
        let mut stats = FallbackStats::default();
        let pending = NonBlankLines::collect(texts);
        let mut out = Vec::with_capacity(pending.lines().len());

        let chunks = pending
            .lines()
            .chunks(self.chunk_size)
            .zip(pending.positions().chunks(self.chunk_size));
        for (chunk, positions) in chunks {
            stats.chunks += 1;
            let translated = self
                .translate_chunk(chunk, positions, target_language, &mut stats)
                .await?;
            out.extend(translated);
        }

        Ok((pending.merge(texts, out), stats))
    }

    async fn translate_chunk(
        &self,
        chunk: &[String],
        positions: &[usize],
        target_language: &str,
        stats: &mut FallbackStats,
    ) -> Result<Vec<String>> {
        let mut stage = Stage::Batch;
        loop {
            stage = match stage {
                Stage::Batch => match self.request_batch(chunk, target_language).await? {
                    Ok(lines) => Stage::Done(lines),
                    Err(rejection) => {
                        warn!(
                            "Batched response for lines {:?} rejected ({:?}), translating line by line",
                            positions,
                            rejection
                        );
                        stats.fallback_chunks += 1;
                        Stage::PerLine
                    }
                },
                Stage::PerLine => {
                    Stage::Done(self.translate_per_line(chunk, positions, target_language, stats).await)
                }
                Stage::Done(lines) => return Ok(lines),
            };
        }
    }

    /// One batched request. Backend errors are fatal; unusable responses are a rejection.
    async fn request_batch(
        &self,
        chunk: &[String],
        target_language: &str,
    ) -> Result<std::result::Result<Vec<String>, Rejection>> {
        let request = GenerationRequest {
            parts: vec![batch_rules(target_language), serde_json::to_string(chunk)?],
            settings: GenerationSettings::batch(),
        };

        let text = self.model.generate(&request).await?;
        debug!("Raw batched response: {}", text);

        Ok(match parse_string_array(&text) {
            None => Err(Rejection::Malformed),
            Some(lines) if lines.len() != chunk.len() => Err(Rejection::LengthMismatch {
                expected: chunk.len(),
                actual: lines.len(),
            }),
            Some(lines) => Ok(lines),
        })
    }

    /// One request per line; a failed or empty answer keeps the source line
    async fn translate_per_line(
        &self,
        chunk: &[String],
        positions: &[usize],
        target_language: &str,
        stats: &mut FallbackStats,
    ) -> Vec<String> {
        let mut out = Vec::with_capacity(chunk.len());

        for (&position, line) in positions.iter().zip(chunk) {
            let request = GenerationRequest {
                parts: vec![line_prompt(line, target_language)],
                settings: GenerationSettings::per_line(),
            };

            let translated = match self.model.generate(&request).await {
                Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                Ok(_) => {
                    warn!("Line {}: empty response, keeping source text", position);
                    None
                }
                Err(e) => {
                    warn!("Line {}: {}, keeping source text", position, e);
                    None
                }
            };

            match translated {
                Some(text) => out.push(text),
                None => {
                    stats.substituted_lines.push(position);
                    out.push(line.clone());
                }
            }
        }

        out
    }
}

#[async_trait]
impl<M: GenerativeModel> TranslationEngine for GenerativeEngine<M> {
    fn name(&self) -> &'static str {
        EngineKind::Gemini.label()
    }

    async fn translate(&self, texts: &[String], target_language: &str) -> Result<Vec<String>> {
        let (lines, stats) = self.translate_with_stats(texts, target_language).await?;

        info!(
            "Translated {} lines to {} ({} chunk(s), {} fell back to per-line)",
            lines.len(),
            target_language,
            stats.chunks,
            stats.fallback_chunks
        );
        if !stats.substituted_lines.is_empty() {
            warn!(
                "{} line(s) kept their source text after per-line failures: {:?}",
                stats.substituted_lines.len(),
                stats.substituted_lines
            );
        }

        Ok(lines)
    }
}

fn batch_rules(target_language: &str) -> String {
    format!(
        "You are a professional subtitle translator. Translate each input line to \
         {} using the most natural phrasing for TV/film dialogue.\n\n\
         Return ONLY a JSON array of strings, the same length and order as input.\n\
         Do not add or remove lines, do not merge or split.\n\
         Preserve speaker intent, tone, and register. Keep punctuation natural.",
        target_language
    )
}

fn line_prompt(line: &str, target_language: &str) -> String {
    format!(
        "Translate the following subtitle line to {}. Return only the translation.\n\nLine: {}",
        target_language, line
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcpConfig;
    use mockall::Sequence;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn is_batch(request: &GenerationRequest) -> bool {
        request.settings == GenerationSettings::batch()
    }

    fn is_line(request: &GenerationRequest, line: &str) -> bool {
        request.settings == GenerationSettings::per_line()
            && request.parts[0].ends_with(&format!("Line: {}", line))
    }

    #[tokio::test]
    async fn test_batched_json_response() {
        let mut model = MockGenerativeModel::new();
        model
            .expect_generate()
            .withf(|req| is_batch(req) && req.parts[1] == r#"["Hello","World"]"#)
            .times(1)
            .returning(|_| Ok(r#"["Bonjour", "Monde"]"#.to_string()));

        let engine = GenerativeEngine::new(model, 40);
        let (out, stats) = engine
            .translate_with_stats(&strings(&["Hello", "World", ""]), "fr")
            .await
            .unwrap();

        assert_eq!(out, strings(&["Bonjour", "Monde", ""]));
        assert_eq!(stats.fallback_chunks, 0);
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back_and_keeps_failed_line() {
        let mut model = MockGenerativeModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .withf(is_batch)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("not json".to_string()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "Hello"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Bonjour\n".to_string()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "World"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TtmlError::Backend("safety block".to_string())));
        model
            .expect_generate()
            .withf(|req| is_line(req, "Goodbye"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Au revoir".to_string()));

        let engine = GenerativeEngine::new(model, 40);
        let (out, stats) = engine
            .translate_with_stats(&strings(&["Hello", "World", "Goodbye"]), "fr")
            .await
            .unwrap();

        assert_eq!(out, strings(&["Bonjour", "World", "Au revoir"]));
        assert_eq!(stats.fallback_chunks, 1);
        assert_eq!(stats.substituted_lines, vec![1]);
    }

    #[tokio::test]
    async fn test_blank_lines_never_reach_the_model() {
        let mut model = MockGenerativeModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .withf(|req| is_batch(req) && req.parts[1] == r#"["Hello"]"#)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("not json".to_string()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "Hello"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Bonjour".to_string()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "") || is_line(req, "   "))
            .times(0)
            .returning(|_| Ok("Please provide the line to translate.".to_string()));

        let engine = GenerativeEngine::new(model, 40);
        let (out, stats) = engine
            .translate_with_stats(&strings(&["Hello", "", "   "]), "fr")
            .await
            .unwrap();

        assert_eq!(out, strings(&["Bonjour", "", "   "]));
        assert!(stats.substituted_lines.is_empty());
    }

    #[tokio::test]
    async fn test_substituted_lines_use_input_positions() {
        let mut model = MockGenerativeModel::new();
        model.expect_generate().withf(is_batch).returning(|_| Ok(String::new()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "One"))
            .returning(|_| Ok("Uno".to_string()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "Two"))
            .returning(|_| Err(TtmlError::Backend("timeout".to_string())));

        let engine = GenerativeEngine::new(model, 40);
        let (out, stats) = engine
            .translate_with_stats(&strings(&["", "One", "", "Two"]), "es")
            .await
            .unwrap();

        assert_eq!(out, strings(&["", "Uno", "", "Two"]));
        assert_eq!(stats.substituted_lines, vec![3]);
    }

    #[tokio::test]
    async fn test_wrong_length_array_falls_back() {
        let mut model = MockGenerativeModel::new();
        model
            .expect_generate()
            .withf(is_batch)
            .times(1)
            .returning(|_| Ok(r#"["Bonjour le monde"]"#.to_string()));
        model
            .expect_generate()
            .withf(|req| req.settings == GenerationSettings::per_line())
            .times(2)
            .returning(|req| {
                Ok(if req.parts[0].ends_with("Hello") { "Bonjour" } else { "Monde" }.to_string())
            });

        let engine = GenerativeEngine::new(model, 40);
        let out = engine.translate(&strings(&["Hello", "World"]), "fr").await.unwrap();
        assert_eq!(out, strings(&["Bonjour", "Monde"]));
    }

    #[tokio::test]
    async fn test_empty_per_line_response_keeps_source() {
        let mut model = MockGenerativeModel::new();
        model.expect_generate().withf(is_batch).returning(|_| Ok(String::new()));
        model
            .expect_generate()
            .withf(|req| !is_batch(req))
            .returning(|_| Ok("   ".to_string()));

        let engine = GenerativeEngine::new(model, 40);
        let (out, stats) = engine
            .translate_with_stats(&strings(&["Hi"]), "de")
            .await
            .unwrap();
        assert_eq!(out, strings(&["Hi"]));
        assert_eq!(stats.substituted_lines, vec![0]);
    }

    #[tokio::test]
    async fn test_chunks_track_global_indices() {
        let mut model = MockGenerativeModel::new();
        model
            .expect_generate()
            .withf(|req| is_batch(req) && req.parts[1] == r#"["a","b"]"#)
            .returning(|_| Ok(r#"["A","B"]"#.to_string()));
        model
            .expect_generate()
            .withf(|req| is_batch(req) && req.parts[1] == r#"["c"]"#)
            .returning(|_| Ok("[]".to_string()));
        model
            .expect_generate()
            .withf(|req| is_line(req, "c"))
            .returning(|_| Err(TtmlError::Backend("boom".to_string())));

        let engine = GenerativeEngine::new(model, 2);
        let (out, stats) = engine
            .translate_with_stats(&strings(&["a", "b", "c"]), "xx")
            .await
            .unwrap();

        assert_eq!(out, strings(&["A", "B", "c"]));
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.fallback_chunks, 1);
        assert_eq!(stats.substituted_lines, vec![2]);
    }

    #[tokio::test]
    async fn test_batch_backend_error_is_fatal() {
        let mut model = MockGenerativeModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(|_| Err(TtmlError::Backend("permission denied".to_string())));

        let engine = GenerativeEngine::new(model, 40);
        assert!(matches!(
            engine.translate(&strings(&["Hello"]), "fr").await,
            Err(TtmlError::Backend(_))
        ));
    }

    #[test]
    fn test_request_body_and_endpoint() {
        let gcp = GcpConfig {
            project_id: "acme".to_string(),
            ..GcpConfig::default()
        };
        let ctx = GcpContext::new(&gcp, "tok".to_string()).unwrap();
        let client = VertexGeminiClient::new(ctx, "us-central1".to_string(), "gemini-2.5-flash".to_string());
        assert_eq!(
            client.endpoint(),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/acme/locations/us-central1/publishers/google/models/gemini-2.5-flash:generateContent"
        );

        let request = GenerationRequest {
            parts: strings(&["rules", "[\"Hi\"]"]),
            settings: GenerationSettings::batch(),
        };
        let body = serde_json::to_value(VertexGeminiClient::build_body(&request)).unwrap();
        assert_eq!(body["contents"][0]["parts"][1]["text"], "[\"Hi\"]");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let parsed: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "[\"Hola\","}, {"text": " \"Mundo\"]"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response_text(parsed), r#"["Hola", "Mundo"]"#);

        let blocked: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        assert_eq!(response_text(blocked), "");
    }
}
