use clap::Parser;
use rocrate_llm::utils::{logger, validation::Validate};
use rocrate_llm::{
    BatchEngine, CliConfig, LocalStorage, TokenAccountant, TokenPipeline, Tokenizer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting rocrate-llm token accounting");
    tracing::debug!("CLI config: {:?}", config);

    // 驗證配置；只有配置錯誤會在處理任何檔案前中止
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let registry = config.registry()?;
    let accountant = TokenAccountant::new(Tokenizer::new(registry));
    let input = LocalStorage::new(config.input_dir.clone());
    let output = LocalStorage::new(config.output_path.clone());
    let pipeline = TokenPipeline::new(input, output, config, accountant);

    let engine = BatchEngine::new(pipeline);

    match engine.run().await {
        Ok(report_path) => {
            println!("✅ Token report written to: {}", report_path);
        }
        Err(e) => {
            tracing::error!(
                "❌ Token accounting failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());

            std::process::exit(e.failure_exit_code());
        }
    }

    Ok(())
}
