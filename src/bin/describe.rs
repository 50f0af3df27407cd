use clap::Parser;
use rocrate_llm::core::ConfigProvider;
use rocrate_llm::utils::{logger, validation::Validate};
use rocrate_llm::{
    AppError, BatchEngine, DescribeConfig, DescribePipeline, LocalStorage, OpenAiChatClient,
    TokenAccountant, TokenPipeline, Tokenizer,
};

#[derive(Parser)]
#[command(name = "describe")]
#[command(about = "Generate human-readable descriptions of RO-Crate manifests with an LLM")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "describe.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Only run the token pre-flight; no API calls are made
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日誌
    logger::init_cli_logger(args.verbose);

    tracing::info!("🚀 Starting RO-Crate description run");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    // 載入 TOML 配置
    let config = match DescribeConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 驗證配置
    let validated = config.validate().and_then(|_| {
        if args.dry_run {
            Ok(())
        } else {
            config.require_api_key().map(|_| ())
        }
    });
    if let Err(e) = validated {
        fail(&e);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&config);

    let accountant = TokenAccountant::new(Tokenizer::new(config.registry()));
    let input = LocalStorage::new(config.input_dir().to_string());
    let output = LocalStorage::new(config.output_path().to_string());

    let result = if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - counting tokens only, no API calls");
        let pipeline = TokenPipeline::new(input, output, config, accountant);
        BatchEngine::new(pipeline).run().await
    } else {
        let client = OpenAiChatClient::new(config.client_settings())?;
        let pipeline = DescribePipeline::new(input, output, client, config, accountant);
        BatchEngine::new(pipeline).run().await
    };

    match result {
        Ok(report_path) => {
            println!("✅ Run completed successfully!");
            println!("📁 Report saved to: {}", report_path);
        }
        Err(e) => fail(&e),
    }

    Ok(())
}

fn display_config_summary(config: &DescribeConfig) {
    tracing::info!("📋 Run: {}", config.run_name());
    tracing::info!("   Endpoint: {}", config.provider.endpoint);
    tracing::info!("   Model: {}", config.model());
    tracing::info!("   Manifests: {}", config.input_dir());
    tracing::info!("   Output: {}", config.output_path());
    tracing::info!("   Text form: {:?}", config.text_form());
    tracing::info!("   Oversized policy: {:?}", config.on_oversized());
    tracing::info!(
        "   API key: {}",
        if config.api_key().is_some() { "set" } else { "not set" }
    );
}

fn fail(e: &AppError) -> ! {
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    std::process::exit(e.failure_exit_code())
}
