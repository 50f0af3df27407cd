use super::{read_documents, timestamp};
use crate::config::toml_config::{DescribeConfig, OversizedPolicy, MANIFEST_PLACEHOLDER};
use crate::core::accounting::TokenAccountant;
use crate::core::budget::{estimate_prompt_tokens, fit_to_budget};
use crate::core::{ChatClient, ChatMessage, ConfigProvider, Manifest, Pipeline, Storage};
use crate::domain::model::{
    Description, DescriptionBatch, DescriptionEntry, DescriptionOutcome, DescriptionReport,
    SourceDocument,
};
use crate::utils::error::Result;
use chrono::Utc;
use std::path::Path;

/// Tokens at the joins between instruction and manifest text can merge
/// differently than when counted apart.
const JOIN_SLACK: usize = 4;

/// Sends each manifest to the configured chat endpoint, one at a time, and
/// writes one text file per description plus a JSON run report.
pub struct DescribePipeline<I: Storage, O: Storage, L: ChatClient> {
    input: I,
    output: O,
    client: L,
    config: DescribeConfig,
    accountant: TokenAccountant,
}

/// Prompt ready to send, with its pre-flight token estimate.
struct PreparedPrompt {
    messages: Vec<ChatMessage>,
    prompt_tokens: usize,
}

impl<I: Storage, O: Storage, L: ChatClient> DescribePipeline<I, O, L> {
    pub fn new(
        input: I,
        output: O,
        client: L,
        config: DescribeConfig,
        accountant: TokenAccountant,
    ) -> Self {
        Self {
            input,
            output,
            client,
            config,
            accountant,
        }
    }

    fn build_messages(&self, manifest_text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.config.system_prompt()),
            ChatMessage::user(
                self.config
                    .instruction()
                    .replace(MANIFEST_PLACEHOLDER, manifest_text),
            ),
        ]
    }

    fn context_limit(&self) -> Option<usize> {
        self.accountant
            .effective_threshold(self.config.model(), self.config.max_tokens())
    }

    /// Err(reason) means the manifest is skipped.
    fn prepare(&self, manifest: &Manifest) -> Result<std::result::Result<PreparedPrompt, String>> {
        let model = self.config.model();
        let tokenizer = self.accountant.tokenizer();
        let text = manifest.text(self.config.text_form())?;

        let messages = self.build_messages(&text);
        let prompt_tokens = estimate_prompt_tokens(tokenizer, &messages, model)?;
        let response_tokens = self.config.max_response_tokens();

        let Some(limit) = self.context_limit() else {
            return Ok(Ok(PreparedPrompt {
                messages,
                prompt_tokens,
            }));
        };

        if prompt_tokens.saturating_add(response_tokens) <= limit {
            return Ok(Ok(PreparedPrompt {
                messages,
                prompt_tokens,
            }));
        }

        let reason = format!(
            "oversized: {} prompt + {} response tokens exceed the {} token context window",
            prompt_tokens, response_tokens, limit
        );

        match self.config.on_oversized() {
            OversizedPolicy::Skip => Ok(Err(reason)),
            OversizedPolicy::Send => {
                tracing::warn!("📏 {} {}; sending anyway", manifest.path, reason);
                Ok(Ok(PreparedPrompt {
                    messages,
                    prompt_tokens,
                }))
            }
            OversizedPolicy::Truncate => {
                let text_tokens = self.accountant.estimate(&text, model)?;
                let framing = prompt_tokens.saturating_sub(text_tokens);
                let budget = limit.saturating_sub(
                    response_tokens
                        .saturating_add(framing)
                        .saturating_add(JOIN_SLACK),
                );
                if budget == 0 {
                    return Ok(Err(format!("{}; no room left for the manifest", reason)));
                }

                let fitted = fit_to_budget(tokenizer, &text, budget, model)?;
                let messages = self.build_messages(&fitted);
                let prompt_tokens = estimate_prompt_tokens(tokenizer, &messages, model)?;
                tracing::info!(
                    "✂️ {} truncated from {} to {} manifest tokens",
                    manifest.path,
                    text_tokens,
                    budget
                );
                Ok(Ok(PreparedPrompt {
                    messages,
                    prompt_tokens,
                }))
            }
        }
    }

    async fn describe_one(
        &self,
        document: SourceDocument,
        descriptions: &mut Vec<Description>,
    ) -> DescriptionOutcome {
        let content = match document.content {
            Ok(content) => content,
            Err(reason) => return DescriptionOutcome::Failed { message: reason },
        };

        let manifest = match Manifest::parse(&document.path, &content) {
            Ok(manifest) => manifest,
            Err(e) => {
                return DescriptionOutcome::Failed {
                    message: format!("malformed document: {}", e),
                }
            }
        };

        let output_file = description_file_name(&manifest.path);
        if let Some(taken) = descriptions
            .iter()
            .find(|d| description_file_name(&d.path) == output_file)
        {
            return DescriptionOutcome::Failed {
                message: format!("{} is already written for {}", output_file, taken.path),
            };
        }

        let prepared = match self.prepare(&manifest) {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(reason)) => {
                tracing::warn!("⏭️ Skipping {}: {}", manifest.path, reason);
                return DescriptionOutcome::Skipped { reason };
            }
            Err(e) => {
                return DescriptionOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        tracing::info!(
            "🤖 Describing {} ({} prompt tokens)",
            manifest.path,
            prepared.prompt_tokens
        );

        match self
            .client
            .complete(self.config.model(), &prepared.messages)
            .await
        {
            Ok(text) => {
                let generated_at = Utc::now();
                descriptions.push(Description {
                    path: manifest.path,
                    model: self.config.model().to_string(),
                    text,
                    prompt_tokens: prepared.prompt_tokens,
                    generated_at,
                });
                DescriptionOutcome::Described {
                    output_file,
                    prompt_tokens: prepared.prompt_tokens,
                    generated_at,
                }
            }
            Err(e) => {
                tracing::error!("❌ {} failed: {}", manifest.path, e);
                DescriptionOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

/// `dir/climate.json` → `climate.txt`
pub fn description_file_name(manifest_path: &str) -> String {
    let stem = Path::new(manifest_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("manifest");
    format!("{}.txt", stem)
}

#[async_trait::async_trait]
impl<I: Storage, O: Storage, L: ChatClient> Pipeline for DescribePipeline<I, O, L> {
    type Item = SourceDocument;
    type Output = DescriptionBatch;

    async fn extract(&self) -> Result<Vec<SourceDocument>> {
        tracing::info!("🔍 Scanning manifests in: {}", self.config.input_dir());
        read_documents(&self.input, self.config.input_dir()).await
    }

    async fn transform(&self, data: Vec<SourceDocument>) -> Result<DescriptionBatch> {
        let started_at = Utc::now();
        let mut descriptions = Vec::new();
        let mut entries = Vec::with_capacity(data.len());

        for document in data {
            let path = document.path.clone();
            let outcome = self.describe_one(document, &mut descriptions).await;
            entries.push(DescriptionEntry { path, outcome });
        }

        Ok(DescriptionBatch {
            started_at,
            descriptions,
            entries,
        })
    }

    async fn load(&self, batch: DescriptionBatch) -> Result<String> {
        for description in &batch.descriptions {
            let file_name = description_file_name(&description.path);
            self.output
                .write_file(&file_name, description.text.as_bytes())
                .await?;
            tracing::debug!("Wrote {}", file_name);
        }

        let report = DescriptionReport::new(self.config.model(), batch.started_at, batch.entries);
        tracing::info!(
            "📊 {}: {} described, {} not described",
            self.config.run_name(),
            report.succeeded,
            report.failed
        );

        let file_name = format!("description_report_{}.json", timestamp());
        let json = serde_json::to_string_pretty(&report)?;
        self.output.write_file(&file_name, json.as_bytes()).await?;

        Ok(format!("{}/{}", self.config.output_path(), file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AppError;
    use std::sync::Mutex;

    struct ScriptedClient {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.replies.lock().unwrap().remove(0)
        }
    }

    struct NoStorage;

    impl Storage for NoStorage {
        async fn read_file(&self, _path: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn write_file(&self, _path: &str, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn list_files(&self, _extension: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn config(extra: &str) -> DescribeConfig {
        DescribeConfig::from_toml_str(&format!(
            r#"
[provider]
endpoint = "http://localhost/chat"
api_key = "sk-test"
model = "gpt-4"
max_response_tokens = 100

[input]
manifest_dir = "manifests"

[output]
output_path = "results"
{}
"#,
            extra
        ))
        .unwrap()
    }

    fn doc(path: &str, content: &str) -> SourceDocument {
        SourceDocument {
            path: path.to_string(),
            content: Ok(content.to_string()),
        }
    }

    fn big_manifest() -> String {
        let files: Vec<serde_json::Value> = (0..10)
            .map(|i| {
                serde_json::json!({
                    "@id": format!("data_{}.csv", i),
                    "@type": "File",
                    "description": "Hourly sensor readings from the northern monitoring station network ".repeat(8)
                })
            })
            .collect();
        let mut graph = vec![serde_json::json!({
            "@id": "./", "@type": "Dataset", "name": "Sensors", "description": "Station data"
        })];
        graph.extend(files);
        serde_json::json!({ "@graph": graph }).to_string()
    }

    fn pipeline(
        client: ScriptedClient,
        extra: &str,
    ) -> DescribePipeline<NoStorage, NoStorage, ScriptedClient> {
        DescribePipeline::new(
            NoStorage,
            NoStorage,
            client,
            config(extra),
            TokenAccountant::default(),
        )
    }

    #[test]
    fn test_description_file_name() {
        assert_eq!(description_file_name("manifests/climate.json"), "climate.txt");
        assert_eq!(description_file_name("x"), "x.txt");
    }

    #[tokio::test]
    async fn test_every_manifest_gets_one_entry() {
        let client = ScriptedClient::new(vec![
            Ok("A small dataset.".to_string()),
            Err(AppError::ApiStatusError {
                status: 400,
                body: "bad request".to_string(),
            }),
        ]);
        let pipeline = pipeline(client, "");

        let batch = pipeline
            .transform(vec![
                doc("m/a.json", r#"{"@graph": [{"@id": "./", "@type": "Dataset", "name": "A"}]}"#),
                doc("m/b.json", "{not valid json"),
                doc("m/c.json", r#"{"@graph": []}"#),
            ])
            .await
            .unwrap();

        assert_eq!(batch.entries.len(), 3);
        assert_eq!(batch.descriptions.len(), 1);
        assert!(matches!(batch.entries[0].outcome, DescriptionOutcome::Described { .. }));
        assert!(matches!(batch.entries[1].outcome, DescriptionOutcome::Failed { .. }));
        assert!(matches!(batch.entries[2].outcome, DescriptionOutcome::Failed { .. }));

        let prompts = pipeline.client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0][1].content.contains("Dataset Name: A"));
    }

    #[tokio::test]
    async fn test_oversized_manifest_is_skipped() {
        let client = ScriptedClient::new(vec![]);
        let pipeline = pipeline(client, "[preflight]\ncontext_limit = 300\n");

        let batch = pipeline
            .transform(vec![doc("m/big.json", &big_manifest())])
            .await
            .unwrap();

        assert!(matches!(
            &batch.entries[0].outcome,
            DescriptionOutcome::Skipped { reason } if reason.starts_with("oversized")
        ));
        assert!(pipeline.client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_manifest_is_truncated_to_fit() {
        let client = ScriptedClient::new(vec![Ok("Sensor data.".to_string())]);
        let pipeline = pipeline(
            client,
            "[preflight]\ncontext_limit = 300\non_oversized = \"truncate\"\n",
        );

        let batch = pipeline
            .transform(vec![doc("m/big.json", &big_manifest())])
            .await
            .unwrap();

        match &batch.entries[0].outcome {
            DescriptionOutcome::Described { prompt_tokens, .. } => {
                assert!(*prompt_tokens + 100 <= 300)
            }
            other => panic!("expected a description, got {:?}", other),
        }
        let prompts = pipeline.client.prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("Dataset Name: Sensors"));
    }

    #[tokio::test]
    async fn test_multibyte_manifest_is_truncated_to_fit() {
        let client = ScriptedClient::new(vec![Ok("Wetterdaten.".to_string())]);
        let pipeline = pipeline(
            client,
            "[preflight]\ncontext_limit = 300\non_oversized = \"truncate\"\n",
        );
        let graph: Vec<serde_json::Value> = std::iter::once(serde_json::json!({
            "@id": "./", "@type": "Dataset", "name": "Klimadaten über 東京",
            "description": "気象観測データ 🌍🌦️ ".repeat(20)
        }))
        .chain((0..10).map(|i| {
            serde_json::json!({
                "@id": format!("messung_{}.csv", i),
                "@type": "File",
                "description": "Stündliche Messwerte der Wetterstation 東京 🌡️ ".repeat(6)
            })
        }))
        .collect();
        let manifest = serde_json::json!({ "@graph": graph }).to_string();

        let batch = pipeline
            .transform(vec![doc("m/tokyo.json", &manifest)])
            .await
            .unwrap();

        assert!(
            matches!(batch.entries[0].outcome, DescriptionOutcome::Described { .. }),
            "got {:?}",
            batch.entries[0].outcome
        );
        let prompts = pipeline.client.prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("Klimadaten über 東京"));
    }

    #[tokio::test]
    async fn test_manifests_sharing_a_stem_do_not_overwrite() {
        let client = ScriptedClient::new(vec![Ok("First.".to_string())]);
        let pipeline = pipeline(client, "");
        let manifest = r#"{"@graph": [{"@id": "./", "@type": "Dataset", "name": "A"}]}"#;

        let batch = pipeline
            .transform(vec![doc("m/a.JSON", manifest), doc("m/a.json", manifest)])
            .await
            .unwrap();

        assert_eq!(batch.descriptions.len(), 1);
        assert!(matches!(batch.entries[0].outcome, DescriptionOutcome::Described { .. }));
        assert!(matches!(
            &batch.entries[1].outcome,
            DescriptionOutcome::Failed { message } if message.contains("a.txt")
        ));
        assert_eq!(pipeline.client.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_response_budget_is_skipped() {
        let client = ScriptedClient::new(vec![]);
        let mut config = config("[preflight]\ncontext_limit = 300\n");
        config.provider.max_response_tokens = Some(usize::MAX);
        let pipeline = DescribePipeline::new(
            NoStorage,
            NoStorage,
            client,
            config,
            TokenAccountant::default(),
        );

        let batch = pipeline
            .transform(vec![doc(
                "m/a.json",
                r#"{"@graph": [{"@id": "./", "@type": "Dataset", "name": "A"}]}"#,
            )])
            .await
            .unwrap();

        assert!(matches!(batch.entries[0].outcome, DescriptionOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_send_policy_ignores_the_limit() {
        let client = ScriptedClient::new(vec![Ok("Sensor data.".to_string())]);
        let pipeline = pipeline(
            client,
            "[preflight]\ncontext_limit = 300\non_oversized = \"send\"\n",
        );

        let batch = pipeline
            .transform(vec![doc("m/big.json", &big_manifest())])
            .await
            .unwrap();

        match &batch.entries[0].outcome {
            DescriptionOutcome::Described { prompt_tokens, .. } => {
                assert!(*prompt_tokens + 100 > 300)
            }
            other => panic!("expected a description, got {:?}", other),
        }
    }
}
