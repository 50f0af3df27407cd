use crate::core::tokenizer::{count_with, Tokenizer};
use crate::domain::model::{
    BatchEntry, BatchReport, FailureKind, Manifest, SourceDocument, TextForm,
};
use crate::utils::error::{AppError, Result};

/// Batch token accounting over manifest documents.
pub struct TokenAccountant {
    tokenizer: Tokenizer,
}

impl TokenAccountant {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn estimate(&self, text: &str, model: &str) -> Result<usize> {
        Ok(self.tokenizer.estimate(text, model)?.tokens)
    }

    /// Explicit threshold wins; otherwise the model's known context window.
    pub fn effective_threshold(&self, model: &str, configured: Option<usize>) -> Option<usize> {
        configured.or_else(|| self.tokenizer.registry().context_limit(model))
    }

    /// Count every (identifier, text) pair. Each pair yields exactly one entry;
    /// per-item problems are recorded, never raised.
    pub fn count_batch(
        &self,
        items: Vec<(String, String)>,
        model: &str,
        threshold: Option<usize>,
        form: TextForm,
    ) -> BatchReport {
        let documents = items
            .into_iter()
            .map(|(path, text)| SourceDocument {
                path,
                content: Ok(text),
            })
            .collect();
        self.count_documents(documents, model, threshold, form)
    }

    pub fn count_documents(
        &self,
        documents: Vec<SourceDocument>,
        model: &str,
        threshold: Option<usize>,
        form: TextForm,
    ) -> BatchReport {
        let resolved = self
            .tokenizer
            .registry()
            .resolve(model)
            .and_then(|encoding| Ok((encoding, self.tokenizer.bpe(encoding)?)));

        let (encoding, bpe) = match resolved {
            Ok((encoding, bpe)) => (Some(encoding), Some(bpe)),
            Err(e) => {
                tracing::warn!("⚠️ {} - every item will be recorded as failed", e);
                (None, None)
            }
        };

        let mut entries = Vec::with_capacity(documents.len());
        for document in documents {
            let entry = match (&document.content, &bpe) {
                (Err(reason), _) => {
                    BatchEntry::failed(&document.path, FailureKind::Unreadable, reason.as_str())
                }
                (Ok(_), None) => BatchEntry::failed(
                    &document.path,
                    FailureKind::UnsupportedModel,
                    AppError::UnsupportedModel {
                        model: model.to_string(),
                    }
                    .to_string(),
                ),
                (Ok(content), Some(bpe)) => match serialize(&document.path, content, form) {
                    Ok(text) => {
                        let tokens = count_with(bpe, &text);
                        let oversized = threshold.is_some_and(|limit| tokens > limit);
                        if oversized {
                            tracing::warn!(
                                "📏 {} is oversized: {} tokens (threshold {})",
                                document.path,
                                tokens,
                                threshold.unwrap_or_default()
                            );
                        }
                        BatchEntry::counted(&document.path, tokens, oversized)
                    }
                    Err(e) => {
                        tracing::debug!("Skipping malformed {}: {}", document.path, e);
                        BatchEntry::failed(
                            &document.path,
                            FailureKind::MalformedDocument,
                            e.to_string(),
                        )
                    }
                },
            };
            entries.push(entry);
        }

        BatchReport::from_entries(
            model,
            encoding.map(|e| e.name().to_string()),
            threshold,
            form,
            entries,
        )
    }
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new(Tokenizer::default())
    }
}

/// An empty document is valid and serializes to empty text (zero tokens).
fn serialize(path: &str, content: &str, form: TextForm) -> Result<String> {
    if content.trim().is_empty() {
        return Ok(String::new());
    }
    let manifest = Manifest::parse(path, content).map_err(|e| AppError::MalformedDocument {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    manifest.text(form)
}
