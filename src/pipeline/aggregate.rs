//! Aggregate cleanup: ask a model to merge page transcripts into one narrative.
//!
//! This step is a quality enhancement only. Any failure is logged and turned
//! into `None`, and the assembler then builds its deterministic aggregate.

use crate::error::AggregateError;
use async_trait::async_trait;
use tracing::{debug, warn};

/// A service that rewrites joined page text into one clean narrative.
#[async_trait]
pub trait AggregateService: Send + Sync {
    async fn rewrite(&self, joined: &str) -> Result<String, AggregateError>;
}

/// Join the non-blank, trimmed page texts with a blank line between them.
pub fn join_page_texts<S: AsRef<str>>(page_texts: &[S]) -> String {
    page_texts
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Runs the optional cleanup call for one document.
pub struct AggregateCleaner<'a> {
    service: &'a dyn AggregateService,
}

impl<'a> AggregateCleaner<'a> {
    pub fn new(service: &'a dyn AggregateService) -> Self {
        Self { service }
    }

    /// Returns the cleaned text, `Some("")` when there is nothing to clean,
    /// or `None` when the service failed.
    pub async fn clean<S: AsRef<str> + Sync>(&self, page_texts: &[S]) -> Option<String> {
        let joined = join_page_texts(page_texts);
        if joined.is_empty() {
            debug!("Aggregate cleanup skipped: no page text");
            return Some(String::new());
        }

        match self.service.rewrite(&joined).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                warn!("Aggregate cleanup failed; using fallback aggregate. Reason: {}", e);
                None
            }
        }
    }
}
