pub mod accounting;
pub mod budget;
pub mod engine;
pub mod llm;
pub mod rocrate;
pub mod tokenizer;

pub use crate::domain::model::{BatchReport, Description, DescriptionReport, Manifest, TextForm};
pub use crate::domain::ports::{ChatClient, ChatMessage, ConfigProvider, Pipeline, Storage};
pub use crate::utils::error::Result;
