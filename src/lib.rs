pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use app::pipelines::{describe_pipeline::DescribePipeline, token_pipeline::TokenPipeline};
pub use config::{cli::LocalStorage, toml_config::DescribeConfig, CliConfig};
pub use core::{
    accounting::TokenAccountant,
    engine::BatchEngine,
    llm::OpenAiChatClient,
    tokenizer::{Encoding, Tokenizer, TokenizerRegistry},
};
pub use utils::error::{AppError, Result};
