use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Languages used by `batch` when none are given
pub const DEFAULT_BATCH_LANGS: &str = "en,de,fr-fr,pt-br,es-419,es-es,tr";

#[derive(Parser)]
#[command(author, version, about = "Translate TTML subtitles using Gemini or Cloud Translation", long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a single TTML file into one or more languages
    Translate {
        /// Path to input .ttml file
        #[arg(short, long)]
        file: PathBuf,

        /// Comma-separated list of target language codes (e.g. "es,fr,de")
        #[arg(short, long)]
        lang: String,

        /// Translation engine: gemini, translate or translateLLM
        #[arg(short, long, default_value = "gemini")]
        engine: String,

        /// Local output directory (default: translated_outputs_<engine>)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Write local files only, skip Cloud Storage
        #[arg(long)]
        no_upload: bool,
    },

    /// Translate every TTML file in a directory
    Batch {
        /// Folder containing TTML files
        #[arg(short, long)]
        dir: PathBuf,

        /// Comma-separated list of target language codes
        #[arg(short, long, default_value = DEFAULT_BATCH_LANGS)]
        lang: String,

        /// Translation engine: gemini, translate or translateLLM
        #[arg(short, long, default_value = "translateLLM")]
        engine: String,

        /// Recurse into subdirectories
        #[arg(long)]
        recursive: bool,

        /// File name pattern to match
        #[arg(long, default_value = "*.ttml")]
        pattern: String,

        /// Local output directory (default: translated_outputs_<engine>)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Write local files only, skip Cloud Storage
        #[arg(long)]
        no_upload: bool,
    },
}

impl Commands {
    pub fn no_upload(&self) -> bool {
        match self {
            Commands::Translate { no_upload, .. } | Commands::Batch { no_upload, .. } => *no_upload,
        }
    }
}
