use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported model '{model}': no tokenizer mapping")]
    UnsupportedModel { model: String },

    #[error("Malformed document {path}: {reason}")]
    MalformedDocument { path: String, reason: String },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    ApiStatusError { status: u16, body: String },

    #[error("Tokenizer error: {message}")]
    TokenizerError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Network,
    Tokenizer,
    Storage,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedModel { .. } | Self::TokenizerError { .. } => ErrorCategory::Tokenizer,
            Self::MalformedDocument { .. } => ErrorCategory::Input,
            Self::ApiError(_) | Self::ApiStatusError { .. } => ErrorCategory::Network,
            Self::IoError(_) => ErrorCategory::Storage,
            Self::SerializationError(_) | Self::ProcessingError { .. } => {
                ErrorCategory::Processing
            }
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::MalformedDocument { .. } => ErrorSeverity::Low,
            Self::ApiError(_) | Self::ApiStatusError { .. } => ErrorSeverity::Medium,
            Self::UnsupportedModel { .. }
            | Self::SerializationError(_)
            | Self::ProcessingError { .. }
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorSeverity::High,
            Self::IoError(_) | Self::TokenizerError { .. } => ErrorSeverity::Critical,
        }
    }

    /// 可重試的錯誤：逾時、連線失敗、429 與 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ApiError(e) => e.is_timeout() || e.is_connect(),
            Self::ApiStatusError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::UnsupportedModel { .. } => {
                "Use a model listed in the tokenizer table, or configure a fallback encoding"
            }
            Self::MalformedDocument { .. } => "Check that the manifest is valid UTF-8 JSON",
            Self::ApiError(_) => "Check network connectivity and the provider endpoint",
            Self::ApiStatusError { .. } => "Check the API key, model name and provider quota",
            Self::TokenizerError { .. } => "Reinstall the binary; the embedded vocabulary failed to load",
            Self::IoError(_) => "Check that the paths exist and are readable/writable",
            Self::SerializationError(_) => "Inspect the offending document or report for invalid JSON",
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => "Fix the configuration file or command-line flags",
            Self::ProcessingError { .. } => "Run again with --verbose for details",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Input => format!("Input problem: {}", self),
            ErrorCategory::Network => format!("Could not reach the LLM provider: {}", self),
            ErrorCategory::Tokenizer => format!("Token counting problem: {}", self),
            ErrorCategory::Storage => format!("File system problem: {}", self),
            ErrorCategory::Processing => format!("Processing failed: {}", self),
        }
    }

    /// 依嚴重程度決定結束碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    /// 執行失敗時的結束碼，低嚴重度也不會回傳 0
    pub fn failure_exit_code(&self) -> i32 {
        self.exit_code().max(1)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
