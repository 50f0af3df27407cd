use super::{read_documents, timestamp};
use crate::core::accounting::TokenAccountant;
use crate::core::{BatchReport, ConfigProvider, Pipeline, Storage};
use crate::domain::model::SourceDocument;
use crate::utils::error::Result;

/// Counts tokens for every manifest in a directory and writes a
/// timestamped JSON report.
pub struct TokenPipeline<I: Storage, O: Storage, C: ConfigProvider> {
    input: I,
    output: O,
    config: C,
    accountant: TokenAccountant,
}

impl<I: Storage, O: Storage, C: ConfigProvider> TokenPipeline<I, O, C> {
    pub fn new(input: I, output: O, config: C, accountant: TokenAccountant) -> Self {
        Self {
            input,
            output,
            config,
            accountant,
        }
    }
}

#[async_trait::async_trait]
impl<I: Storage, O: Storage, C: ConfigProvider> Pipeline for TokenPipeline<I, O, C> {
    type Item = SourceDocument;
    type Output = BatchReport;

    async fn extract(&self) -> Result<Vec<SourceDocument>> {
        tracing::info!("🔍 Scanning manifests in: {}", self.config.input_dir());
        read_documents(&self.input, self.config.input_dir()).await
    }

    async fn transform(&self, data: Vec<SourceDocument>) -> Result<BatchReport> {
        let model = self.config.model();
        let threshold = self
            .accountant
            .effective_threshold(model, self.config.max_tokens());

        tracing::info!(
            "🧮 Counting tokens for {} manifests (model: {}, threshold: {:?})",
            data.len(),
            model,
            threshold
        );

        Ok(self
            .accountant
            .count_documents(data, model, threshold, self.config.text_form()))
    }

    async fn load(&self, report: BatchReport) -> Result<String> {
        let stats = &report.stats;
        tracing::info!(
            "📊 {} succeeded, {} failed, {} oversized, {} tokens total",
            stats.succeeded,
            stats.failed,
            stats.oversized,
            stats.total_tokens
        );
        match (stats.min_tokens, stats.max_tokens, stats.mean_tokens) {
            (Some(min), Some(max), Some(mean)) => {
                tracing::info!("📊 min {} / max {} / mean {:.1} tokens", min, max, mean)
            }
            _ => tracing::warn!("📊 No manifest was counted; min/max/mean are undefined"),
        }
        for failure in report.failures() {
            tracing::debug!("Failed entry: {:?}", failure);
        }

        let file_name = format!("token_report_{}.json", timestamp());
        let json = serde_json::to_string_pretty(&report)?;
        self.output.write_file(&file_name, json.as_bytes()).await?;

        Ok(format!("{}/{}", self.config.output_path(), file_name))
    }
}
