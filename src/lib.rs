//! ttml-translate - TTML subtitle translation workflow
//!
//! Translates the text of TTML subtitle files with Cloud Translation or Gemini
//! while keeping timing, styling and structure untouched, then publishes the
//! results to Cloud Storage.

pub mod cli;
pub mod config;
pub mod error;
pub mod gcp;
pub mod publish;
pub mod storage;
pub mod translate;
pub mod ttml;
pub mod workflow;
