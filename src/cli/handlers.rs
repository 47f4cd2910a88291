//! Stage handlers: build the execution context, dispatch to the model
//! adapter and turn failures into exit codes
//!
//! Every stage runs as its own process inside a cluster job script, so a
//! failure must surface in two places at once: the platform bridge (for the
//! orchestrating service) and the process exit code (for the script).

use tracing::{error, info};

use super::commands::{
    CompressCleanupArgs, FetchExecutablesArgs, FetchInputsArgs, JobArgs, ModelArgs,
    PreprocessArgs, ResultUploadArgs, RunArgs, UniqueIdArgs,
};
use crate::bridge::PlatformBridge;
use crate::config::ModelOpsConfig;
use crate::error::Result;
use crate::models::{ModelFactory, StageContext};

/// Context rooted at the process working directory, configured from the
/// environment
fn stage_context() -> Result<StageContext> {
    let config = ModelOpsConfig::default();
    config.validate()?;
    StageContext::new(config)
}

/// Maps a stage result to the process exit code, reporting failures to the
/// platform before exiting
fn conclude(stage: &str, result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(error) => {
            PlatformBridge::set_model_error();
            error!(stage, %error, "Stage failed");
            1
        }
    }
}

pub async fn handle_fetch_executables(args: &FetchExecutablesArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.check_and_fetch_executables(&ctx, &args.path).await
    }
    .await;
    conclude("fetch-executables", result)
}

pub async fn handle_fetch_inputs(args: &FetchInputsArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model
            .check_and_fetch_inputs(&ctx, &args.path, args.parent_path.as_deref(), args.delete)
            .await
    }
    .await;
    conclude("fetch-inputs", result)
}

pub async fn handle_extract_sanitize_inputs(args: &ModelArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.extract_sanitize_inputs(&ctx).await
    }
    .await;
    conclude("extract-sanitize-inputs", result)
}

/// Prints the computed id on stdout so the job script can capture it
pub async fn handle_unique_id(args: &UniqueIdArgs) -> i32 {
    let result = (|| {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        let unique_id =
            model.generate_unique_input_id(&ctx, &args.version, args.parent_id.as_deref())?;
        println!("{unique_id}");
        Ok(())
    })();
    conclude("unique-id", result)
}

pub async fn handle_preprocess(args: &PreprocessArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.preprocess(&ctx, &args.execution_name).await
    }
    .await;
    conclude("preprocess", result)
}

pub async fn handle_run(args: &RunArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        info!(
            queue = args.queue.as_str(),
            cores = args.core_count,
            "Starting the model execution"
        );
        model.run(&ctx, &args.queue, args.core_count).await?;
        info!("Model execution terminated");
        Ok(())
    }
    .await;
    conclude("run", result)
}

pub async fn handle_execution_status(args: &JobArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        let status = model.generate_execution_status(&ctx, &args.job_id).await?;
        info!(status = status.as_str(), "Generated execution status");
        Ok(())
    }
    .await;
    conclude("execution-status", result)
}

pub async fn handle_postprocess(args: &ModelArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.postprocess(&ctx).await
    }
    .await;
    conclude("postprocess", result)
}

pub async fn handle_compress_cleanup(args: &CompressCleanupArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.output_compression_and_cleanup(&ctx, args.num_cpus).await
    }
    .await;
    conclude("compress-cleanup", result)
}

pub async fn handle_result_upload(args: &ResultUploadArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.result_upload(&ctx, &args.path).await
    }
    .await;
    conclude("result-upload", result)
}

pub async fn handle_cancel(args: &JobArgs) -> i32 {
    let result = async {
        let ctx = stage_context()?;
        let model = ModelFactory::create(&args.model_name)?;
        model.cancel_run(&ctx, &args.job_id).await
    }
    .await;
    conclude("cancel", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Serialized with the configuration tests: building the stage context
    // reads the MODELOPS_* environment they mutate

    #[tokio::test]
    #[serial]
    async fn test_unknown_model_exits_nonzero() {
        let args = ModelArgs {
            model_name: "prospec".to_string(),
        };
        assert_eq!(handle_postprocess(&args).await, 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_cancel_without_job_id_succeeds() {
        let args = JobArgs {
            model_name: "decomp".to_string(),
            job_id: String::new(),
        };
        assert_eq!(handle_cancel(&args).await, 0);
    }
}
