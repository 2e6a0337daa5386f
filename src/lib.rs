pub mod config;
pub mod models;
pub mod pipeline;
pub mod store;

use tracing_subscriber::EnvFilter;

use config::AnnotatorConfig;
use pipeline::PipelineError;

/// Binary entry point: configure logging, run one batch from the
/// environment, write the output.
pub fn run() -> Result<(), PipelineError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AnnotatorConfig::from_env()?;
    tracing::info!(
        input = %config.input_path.display(),
        output = %config.output_path.display(),
        mode = %config.mode,
        legacy_format = config.legacy_format,
        api_url = %config.api_url,
        "Configuration loaded"
    );

    let cancel = pipeline::CancellationToken::new();
    if let Err(e) = pipeline::cancel::cancel_on_ctrl_c(&cancel) {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler, the batch can only be stopped by its deadline");
    }

    pipeline::run_from_config(&config, &cancel)?;
    Ok(())
}
