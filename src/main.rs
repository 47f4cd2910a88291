use modelops::cli::commands::{CliArgs, Commands};
use modelops::cli::handlers::{
    handle_cancel, handle_compress_cleanup, handle_execution_status, handle_extract_sanitize_inputs,
    handle_fetch_executables, handle_fetch_inputs, handle_postprocess, handle_preprocess,
    handle_result_upload, handle_run, handle_unique_id,
};
use modelops::VERSION;

use clap::Parser;
use std::env;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("modelops v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::FetchExecutables(fetch_args) => handle_fetch_executables(fetch_args).await,
        Commands::FetchInputs(fetch_args) => handle_fetch_inputs(fetch_args).await,
        Commands::ExtractSanitizeInputs(model_args) => {
            handle_extract_sanitize_inputs(model_args).await
        }
        Commands::UniqueId(id_args) => handle_unique_id(id_args).await,
        Commands::Preprocess(preprocess_args) => handle_preprocess(preprocess_args).await,
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::ExecutionStatus(job_args) => handle_execution_status(job_args).await,
        Commands::Postprocess(model_args) => handle_postprocess(model_args).await,
        Commands::CompressCleanup(compress_args) => handle_compress_cleanup(compress_args).await,
        Commands::ResultUpload(upload_args) => handle_result_upload(upload_args).await,
        Commands::Cancel(job_args) => handle_cancel(job_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let level = if let Some(level_str) = &args.log_level {
            parse_level(level_str)
        } else if args.verbose {
            Level::DEBUG
        } else if args.quiet {
            Level::ERROR
        } else {
            let level_str = env::var("MODELOPS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            parse_level(&level_str)
        };

        let mut filter = EnvFilter::from_default_env();

        if env::var("RUST_LOG").is_err() {
            filter = filter
                .add_directive(format!("modelops={}", level).parse().unwrap())
                .add_directive("h2=warn".parse().unwrap())
                .add_directive("hyper=warn".parse().unwrap())
                .add_directive("reqwest=warn".parse().unwrap());
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    });
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}
