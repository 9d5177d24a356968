use anonymization_engine::{AnonymizerConfig, AnonymizerEngine, AnonymizerError, RetryConfig};
use clap::Parser;
use tokio::sync::watch;

#[derive(Parser)]
#[command(
    name = "anonymizer",
    about = "Sync customer records into an anonymized collection"
)]
struct Cli {
    /// Path to a JSON configuration file. Defaults apply when omitted.
    #[arg(long, env = "ANONYMIZER_CONFIG")]
    config: Option<String>,

    /// Redis URL for both source and target, overriding the config file.
    #[arg(long, env = "ANONYMIZER_REDIS_URL")]
    redis_url: Option<String>,

    /// Copy the whole source collection once, then exit.
    #[arg(long)]
    full_reindex: bool,
}

fn exit_with(e: &AnonymizerError) -> ! {
    tracing::error!(error = %e, kind = e.kind(), exit_code = e.exit_code(), "fatal error");
    std::process::exit(e.exit_code());
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(config = %path, "loading configuration");
            match AnonymizerConfig::from_json_file(path) {
                Ok(c) => c,
                Err(e) => exit_with(&e),
            }
        }
        None => AnonymizerConfig::default(),
    };
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url);
    }

    let engine = match AnonymizerEngine::connect(config, &RetryConfig::startup()).await {
        Ok(e) => e,
        Err(e) => exit_with(&e),
    };

    if cli.full_reindex {
        tokio::select! {
            result = engine.run_reindex() => match result {
                Ok(summary) => {
                    tracing::info!(documents = summary.documents, written = summary.written, "reindex finished");
                }
                Err(e) => exit_with(&e),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("reindex interrupted; it must be restarted from scratch");
                std::process::exit(130);
            }
        }
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            // Keep the sender alive: a dropped sender also stops the engine
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down...");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!("anonymizer started, press Ctrl+C to stop");
    match engine.run_live(shutdown_rx).await {
        Ok(summary) => {
            tracing::info!(events = summary.events, written = summary.written, "stopped");
        }
        Err(e) => exit_with(&e),
    }
}
