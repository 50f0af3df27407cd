use crate::domain::model::TextForm;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// 列出目錄下指定副檔名的檔案（依名稱排序，不遞迴）
    fn list_files(
        &self,
        extension: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn input_dir(&self) -> &str;
    fn output_path(&self) -> &str;
    fn model(&self) -> &str;
    fn max_tokens(&self) -> Option<usize>;
    fn text_form(&self) -> TextForm;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            name: None,
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    type Item: Send;
    type Output: Send;

    async fn extract(&self) -> Result<Vec<Self::Item>>;
    async fn transform(&self, data: Vec<Self::Item>) -> Result<Self::Output>;
    async fn load(&self, result: Self::Output) -> Result<String>;
}
