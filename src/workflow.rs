use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, TtmlError};
use crate::publish::{Publisher, output_file_name, write_local};
use crate::storage::ObjectStore;
use crate::translate::TranslationEngine;
use crate::ttml::{TtmlDocument, apply_translations, extract_units};
use crate::ttml::extract::source_texts;

/// Outcome of one (file, language) pair
#[derive(Debug)]
pub struct ItemReport {
    pub input: PathBuf,
    pub language: String,
    /// Number of text units translated
    pub units: usize,
    /// Local output, when the pipeline got that far
    pub local_path: Option<PathBuf>,
    /// Result of the upload, when publishing was attempted
    pub upload: Option<std::result::Result<String, String>>,
    /// Fatal error that prevented local output
    pub error: Option<String>,
}

impl ItemReport {
    fn new(input: &Path, language: &str) -> Self {
        Self {
            input: input.to_path_buf(),
            language: language.to_string(),
            units: 0,
            local_path: None,
            upload: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.local_path.is_some()
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub items: Vec<ItemReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| !i.succeeded()).count()
    }

    pub fn upload_failures(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.upload, Some(Err(_))))
            .count()
    }

    /// Print the per-item outcome table
    pub fn print_summary(&self) {
        println!("\nDone. Outputs:");
        for item in &self.items {
            let name = item
                .input
                .file_name()
                .unwrap_or_default()
                .to_string_lossy();
            match (&item.error, &item.local_path) {
                (Some(e), _) => println!("- {} [{}] FAILED: {}", name, item.language, e),
                (None, Some(path)) => {
                    let remote = match &item.upload {
                        Some(Ok(uri)) => uri.clone(),
                        Some(Err(e)) => format!("upload failed: {}", e),
                        None => "not uploaded".to_string(),
                    };
                    println!(
                        "- {} [{}] {} lines -> {}  |  {}",
                        name, item.language, item.units, path.display(), remote
                    );
                }
                (None, None) => println!("- {} [{}] skipped", name, item.language),
            }
        }
    }
}

/// Drives extract → translate → reinsert → write → publish for each (file, language)
pub struct Workflow<S> {
    engine: Box<dyn TranslationEngine>,
    publisher: Option<Publisher<S>>,
    output_dir: PathBuf,
}

impl<S: ObjectStore> Workflow<S> {
    pub fn new(engine: Box<dyn TranslationEngine>, publisher: Option<Publisher<S>>, output_dir: PathBuf) -> Self {
        Self {
            engine,
            publisher,
            output_dir,
        }
    }

    /// Default local output directory for an engine, e.g. `translated_outputs_gemini`
    pub fn default_output_dir(engine_label: &str) -> PathBuf {
        PathBuf::from(format!("translated_outputs_{}", engine_label))
    }

    /// Translate one file into every target language
    pub async fn process_single_file(&self, input_path: &Path, languages: &[String]) -> Result<RunReport> {
        info!("Processing single file: {}", input_path.display());

        if !input_path.is_file() {
            return Err(TtmlError::FileNotFound(input_path.display().to_string()));
        }

        let mut report = RunReport::default();
        report.items.extend(self.process_file(input_path, languages, None).await);
        Ok(report)
    }

    /// Translate every matching file under `input_dir`
    pub async fn process_directory(
        &self,
        input_dir: &Path,
        languages: &[String],
        pattern: &str,
        recursive: bool,
    ) -> Result<RunReport> {
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(TtmlError::FileNotFound(input_dir.display().to_string()));
        }

        let files = find_files(input_dir, pattern, recursive)?;
        info!("Found {} file(s) matching {}", files.len(), pattern);
        if files.is_empty() {
            warn!("No files matched. Check --pattern or the directory contents.");
        }

        let progress = ProgressBar::new((files.len() * languages.len()) as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| TtmlError::Config(format!("Invalid progress template: {}", e)))?
                .progress_chars("#>-"),
        );

        let mut report = RunReport::default();
        let mut claimed: HashMap<String, &PathBuf> = HashMap::new();
        for file in &files {
            // Outputs are named by stem only
            let stem = file.file_stem().unwrap_or_default().to_string_lossy().into_owned();
            if let Some(first) = claimed.get(&stem) {
                warn!(
                    "Skipping {}: its outputs would overwrite those of {}",
                    file.display(),
                    first.display()
                );
                for language in languages {
                    let mut item = ItemReport::new(file, language);
                    item.error = Some(format!("output name collides with {}", first.display()));
                    report.items.push(item);
                    progress.inc(1);
                }
                continue;
            }
            claimed.insert(stem, file);

            report
                .items
                .extend(self.process_file(file, languages, Some(&progress)).await);
        }
        progress.finish_and_clear();

        info!("Processed {} file(s) from {}", files.len(), input_dir.display());
        Ok(report)
    }

    async fn process_file(
        &self,
        input_path: &Path,
        languages: &[String],
        progress: Option<&ProgressBar>,
    ) -> Vec<ItemReport> {
        let source = match fs::read_to_string(input_path).await {
            Ok(source) => Some(source),
            Err(e) => {
                error!("Failed to read {}: {}", input_path.display(), e);
                None
            }
        };

        let mut items = Vec::with_capacity(languages.len());
        for language in languages {
            if let Some(pb) = progress {
                pb.set_message(format!(
                    "{} [{}]",
                    input_path.file_name().unwrap_or_default().to_string_lossy(),
                    language
                ));
            }

            let mut item = ItemReport::new(input_path, language);
            match &source {
                Some(source) => self.process_item(input_path, source, &mut item).await,
                None => item.error = Some("input file could not be read".to_string()),
            }
            items.push(item);

            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
        items
    }

    /// One (file, language) pair; every error stays inside its report
    async fn process_item(&self, input_path: &Path, source: &str, item: &mut ItemReport) {
        let language = item.language.clone();

        match self.translate_to_file(input_path, source, &language, item).await {
            Ok(path) => item.local_path = Some(path),
            Err(e) => {
                error!("Failed {} lang={}: {}", input_path.display(), language, e);
                item.error = Some(e.to_string());
                return;
            }
        }

        if let (Some(publisher), Some(path)) = (&self.publisher, &item.local_path) {
            item.upload = Some(match publisher.publish(path).await {
                Ok(uri) => Ok(uri),
                Err(e) => {
                    warn!("Upload of {} to gs://{} failed: {}", path.display(), publisher.bucket(), e);
                    Err(e.to_string())
                }
            });
        }

        info!(
            "[{}] {} -> {} ({} lines)",
            self.engine.name(),
            input_path.display(),
            language,
            item.units
        );
    }

    async fn translate_to_file(
        &self,
        input_path: &Path,
        source: &str,
        language: &str,
        item: &mut ItemReport,
    ) -> Result<PathBuf> {
        // Fresh parse per language keeps every output independent
        let mut doc = TtmlDocument::parse(source)?;
        let units = extract_units(&doc);
        item.units = units.len();
        info!("Translating {} units to {} with {}", units.len(), language, self.engine.name());

        let translations = self.engine.translate(&source_texts(&units), language).await?;
        apply_translations(&mut doc, &units, &translations)?;

        let stem = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TtmlError::Config(format!("Invalid input filename: {}", input_path.display())))?;
        let content = doc.to_xml_string()?;

        write_local(&self.output_dir, &output_file_name(stem, language), &content).await
    }
}

/// Files under `dir` whose name matches a `*`/`?` glob pattern
pub fn find_files(dir: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(pattern)?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(|name| matcher.is_match(name)))
        .map(|e| e.into_path())
        .collect();

    files.sort();
    Ok(files)
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| TtmlError::Config(format!("Invalid pattern '{}': {}", pattern, e)))
}
