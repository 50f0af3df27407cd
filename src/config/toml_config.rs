use crate::core::llm::ChatClientSettings;
use crate::core::tokenizer::{Encoding, TokenizerRegistry};
use crate::core::ConfigProvider;
use crate::domain::model::TextForm;
use crate::utils::error::{AppError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a research data specialist who helps researchers understand and discover relevant datasets and research objects.";

pub const DEFAULT_INSTRUCTION: &str = "Please provide a clear, human-readable description of this research object based on the following metadata:

{manifest}

Please write a comprehensive summary that would help a researcher understand what this research object contains and its potential value for their work.";

/// Placeholder replaced by the manifest text in the instruction template.
pub const MANIFEST_PLACEHOLDER: &str = "{manifest}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeConfig {
    pub run: Option<RunConfig>,
    pub provider: ProviderConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub preflight: Option<PreflightConfig>,
    pub prompt: Option<PromptConfig>,
    pub tokenizer: Option<TokenizerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub temperature: Option<f32>,
    pub max_response_tokens: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub manifest_dir: String,
    pub text_form: Option<TextForm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizedPolicy {
    #[default]
    Skip,
    Truncate,
    Send,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    pub context_limit: Option<usize>,
    pub on_oversized: Option<OversizedPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub system: Option<String>,
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub fallback_encoding: Option<Encoding>,
    #[serde(default)]
    pub models: HashMap<String, Encoding>,
    #[serde(default)]
    pub prefixes: HashMap<String, Encoding>,
    #[serde(default)]
    pub context_limits: HashMap<String, usize>,
}

impl DescribeConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(AppError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AppError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${OPENAI_API_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| AppError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// API key after substitution; an unresolved `${VAR}` counts as missing.
    pub fn api_key(&self) -> Option<&str> {
        self.provider
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !key.starts_with("${"))
    }

    pub fn require_api_key(&self) -> Result<&str> {
        validation::validate_required_field("provider.api_key", &self.api_key()).copied()
    }

    pub fn on_oversized(&self) -> OversizedPolicy {
        self.preflight
            .as_ref()
            .and_then(|p| p.on_oversized)
            .unwrap_or_default()
    }

    pub fn max_response_tokens(&self) -> usize {
        self.provider.max_response_tokens.unwrap_or(1000)
    }

    pub fn system_prompt(&self) -> &str {
        self.prompt
            .as_ref()
            .and_then(|p| p.system.as_deref())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn instruction(&self) -> &str {
        self.prompt
            .as_ref()
            .and_then(|p| p.instruction.as_deref())
            .unwrap_or(DEFAULT_INSTRUCTION)
    }

    pub fn run_name(&self) -> &str {
        self.run.as_ref().map(|r| r.name.as_str()).unwrap_or("describe")
    }

    /// 預設對照表加上設定檔中的覆寫
    pub fn registry(&self) -> TokenizerRegistry {
        let mut registry = TokenizerRegistry::default();
        if let Some(table) = &self.tokenizer {
            for (model, encoding) in &table.models {
                registry.insert_model(model.clone(), *encoding);
            }
            for (prefix, encoding) in &table.prefixes {
                registry.insert_prefix(prefix.clone(), *encoding);
            }
            for (model, limit) in &table.context_limits {
                registry.insert_context_limit(model.clone(), *limit);
            }
            registry = registry.with_fallback(table.fallback_encoding);
        }
        registry
    }

    pub fn client_settings(&self) -> ChatClientSettings {
        ChatClientSettings {
            endpoint: self.provider.endpoint.clone(),
            api_key: self.api_key().map(str::to_string),
            timeout: Duration::from_secs(self.provider.timeout_seconds.unwrap_or(30)),
            max_retries: self.provider.max_retries.unwrap_or(3),
            retry_delay: Duration::from_secs(self.provider.retry_delay_seconds.unwrap_or(2)),
            temperature: self.provider.temperature.unwrap_or(0.7),
            max_response_tokens: self.max_response_tokens(),
        }
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("provider.endpoint", &self.provider.endpoint)?;
        validation::validate_non_empty_string("provider.model", &self.provider.model)?;
        validation::validate_path("input.manifest_dir", &self.input.manifest_dir)?;
        validation::validate_path("output.output_path", &self.output.output_path)?;

        if let Some(timeout) = self.provider.timeout_seconds {
            validation::validate_positive_number("provider.timeout_seconds", timeout as usize, 1)?;
        }
        if let Some(temperature) = self.provider.temperature {
            validation::validate_range("provider.temperature", temperature, 0.0, 2.0)?;
        }
        validation::validate_positive_number(
            "provider.max_response_tokens",
            self.max_response_tokens(),
            1,
        )?;
        if let Some(limit) = self.preflight.as_ref().and_then(|p| p.context_limit) {
            validation::validate_positive_number("preflight.context_limit", limit, 1)?;
        }

        if !self.instruction().contains(MANIFEST_PLACEHOLDER) {
            return Err(AppError::InvalidConfigValueError {
                field: "prompt.instruction".to_string(),
                value: self.instruction().to_string(),
                reason: format!("must contain the {} placeholder", MANIFEST_PLACEHOLDER),
            });
        }

        Ok(())
    }
}

impl ConfigProvider for DescribeConfig {
    fn input_dir(&self) -> &str {
        &self.input.manifest_dir
    }

    fn output_path(&self) -> &str {
        &self.output.output_path
    }

    fn model(&self) -> &str {
        &self.provider.model
    }

    fn max_tokens(&self) -> Option<usize> {
        self.preflight.as_ref().and_then(|p| p.context_limit)
    }

    fn text_form(&self) -> TextForm {
        self.input.text_form.unwrap_or(TextForm::Summary)
    }
}

impl Validate for DescribeConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
