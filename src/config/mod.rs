pub mod cli;
pub mod toml_config;

use crate::core::tokenizer::{Encoding, TokenizerRegistry};
use crate::core::ConfigProvider;
use crate::domain::model::TextForm;
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "rocrate-llm")]
#[command(about = "Count how many tokens RO-Crate manifests consume for a model")]
pub struct CliConfig {
    /// Directory containing *.json manifests
    #[arg(long, default_value = "./manifests")]
    pub input_dir: String,

    #[arg(long, default_value = "./results")]
    pub output_path: String,

    #[arg(long, default_value = "gpt-3.5-turbo")]
    pub model: String,

    /// Flag manifests above this many tokens (defaults to the model's context window)
    #[arg(long)]
    pub max_tokens: Option<usize>,

    #[arg(long, value_enum, default_value_t = TextForm::Pretty)]
    pub text_form: TextForm,

    /// Encoding used for models missing from the tokenizer table
    #[arg(long)]
    pub fallback_encoding: Option<String>,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    pub fn registry(&self) -> Result<TokenizerRegistry> {
        let fallback = self
            .fallback_encoding
            .as_deref()
            .map(str::parse::<Encoding>)
            .transpose()?;
        Ok(TokenizerRegistry::default().with_fallback(fallback))
    }
}

impl ConfigProvider for CliConfig {
    fn input_dir(&self) -> &str {
        &self.input_dir
    }

    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> Option<usize> {
        self.max_tokens
    }

    fn text_form(&self) -> TextForm {
        self.text_form
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("model", &self.model)?;
        validation::validate_path("input_dir", &self.input_dir)?;
        validation::validate_path("output_path", &self.output_path)?;
        if let Some(max) = self.max_tokens {
            validation::validate_positive_number("max_tokens", max, 1)?;
        }
        self.registry()?;
        Ok(())
    }
}
