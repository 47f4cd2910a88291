//! Model adapters and the workflow contract they implement
//!
//! Every supported simulation family goes through the same stage sequence:
//! fetch executables, fetch inputs, extract/sanitize, compute the unique id,
//! preprocess, run, diagnose status, postprocess, compress/cleanup, upload.
//! Each stage is one method on [`ModelAdapter`]; the concrete adapter is
//! picked from [`ModelFactory`] by model name. Stages run as separate host
//! processes, so everything an adapter learns is persisted through the
//! metadata descriptor rather than held in memory.
//!
//! The pieces every adapter shares (deck download, parent validation,
//! executable staging, result upload) live here as free functions; the
//! adapters keep only their family-specific file naming and business rules.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bridge::PlatformBridge;
use crate::cache::DeckCache;
use crate::config::ModelOpsConfig;
use crate::error::{Error, Result};
use crate::files;
use crate::hashing;
use crate::metadata::{
    self, metadata_str, Metadata, METADATA_FILE, METADATA_MODEL_NAME, METADATA_MODEL_VERSION,
    METADATA_PARENT_ID, METADATA_PARENT_STARTING_DATE, METADATA_STATUS, METADATA_UNIQUE_ID,
};
use crate::process::ShellRunner;
use crate::scheduler::SlurmClient;
use crate::status::RunStatus;
use crate::storage::{self, ObjectStorage};

pub mod decomp;
pub mod dessem;
pub mod newave;

/// Name the downloaded input deck archive is normalized to
pub const RAW_DECK_FILE: &str = "raw.zip";
/// Archive of the deck as it was actually executed, built at cleanup
pub const PROCESSED_DECK_FILE: &str = "deck.zip";
/// Remote prefix receiving the echo of the inputs
pub const INPUTS_ECHO_PREFIX: &str = "inputs";
/// Remote prefix receiving the execution outputs
pub const OUTPUTS_PREFIX: &str = "outputs";
/// Local directory holding post-processed synthesis files
pub const SYNTHESIS_DIR: &str = "sintese";

/// Matches the pipeline marker files shipped with every upload
const MARKER_FILES_PATTERN: &str = r".*\.modelops$";

/// Everything a stage needs: where it runs, how it is configured and which
/// storage backend it talks to
pub struct StageContext {
    workdir: PathBuf,
    config: ModelOpsConfig,
    storage: Box<dyn ObjectStorage>,
    cache: DeckCache,
}

impl StageContext {
    /// Builds a context rooted at the current working directory
    pub fn new(config: ModelOpsConfig) -> Result<Self> {
        let storage = storage::client_from_config(&config)?;
        Ok(Self {
            workdir: std::env::current_dir()?,
            config,
            storage,
            cache: DeckCache::new(),
        })
    }

    /// Builds a context from explicit parts, used by tests to point a stage
    /// at a scratch directory and an isolated storage backend
    pub fn with_parts(
        config: ModelOpsConfig,
        storage: Box<dyn ObjectStorage>,
        workdir: PathBuf,
    ) -> Self {
        Self {
            workdir,
            config,
            storage,
            cache: DeckCache::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn config(&self) -> &ModelOpsConfig {
        &self.config
    }

    pub fn storage(&self) -> &dyn ObjectStorage {
        self.storage.as_ref()
    }

    /// Per-execution deck cache; cleared naturally when the process exits
    pub fn cache(&self) -> &DeckCache {
        &self.cache
    }

    /// Path of `name` inside the working directory
    pub fn path(&self, name: &str) -> PathBuf {
        self.workdir.join(name)
    }

    /// Directory the fetched executables are staged into
    pub fn executable_dir(&self) -> PathBuf {
        self.workdir.join(&self.config.executable_dir)
    }

    /// Merges `entries` into the execution metadata descriptor
    pub fn update_metadata(&self, entries: Metadata) -> Result<Metadata> {
        metadata::update_metadata_in(&self.workdir, entries)
    }

    /// Scheduler client over the configured binaries
    pub fn scheduler(&self) -> Result<SlurmClient> {
        SlurmClient::new(&self.config)
    }

    /// Shell runner bound to the working directory
    pub fn shell(&self, timeout: std::time::Duration) -> ShellRunner {
        ShellRunner::new(timeout).with_workdir(&self.workdir)
    }
}

/// The eight-stage workflow contract every model family implements
///
/// Stage methods take the context explicitly; adapters themselves carry no
/// state, which keeps one execution's cached deck data from leaking into
/// another.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Lower-case family name used in registries, queues and job scripts
    fn model_name(&self) -> &'static str;

    /// Downloads the versioned executables and stages them for execution
    async fn check_and_fetch_executables(&self, ctx: &StageContext, path: &str) -> Result<()>;

    /// Downloads the input deck and, when a parent execution is named,
    /// validates it and pulls its carry-forward artifacts
    async fn check_and_fetch_inputs(
        &self,
        ctx: &StageContext,
        path: &str,
        parent_path: Option<&str>,
        delete: bool,
    ) -> Result<()>;

    /// Unpacks the deck, normalizes file names and encodings, and records
    /// the study identity in the metadata descriptor
    async fn extract_sanitize_inputs(&self, ctx: &StageContext) -> Result<()>;

    /// Deterministic identity of this execution's inputs
    ///
    /// Hashes the model name, executable version, parent identity and the
    /// working directory content; identical inputs always map to the same
    /// id. The id is persisted to its marker file and the metadata record.
    fn generate_unique_input_id(
        &self,
        ctx: &StageContext,
        version: &str,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let unique_id = hashing::unique_execution_id(
            self.model_name(),
            version,
            parent_id.unwrap_or(""),
            ctx.workdir(),
            ctx.config().hash_size_limit_bytes,
        )?;
        metadata::write_unique_id(ctx.workdir(), &unique_id)?;
        let mut entries = Metadata::new();
        entries.insert(METADATA_UNIQUE_ID.to_string(), json!(unique_id));
        ctx.update_metadata(entries)?;
        PlatformBridge::set_metadata(METADATA_UNIQUE_ID, &unique_id);
        info!(unique_id, "Computed unique input id");
        Ok(unique_id)
    }

    /// Final deck edits before execution (title, cut references, core count)
    async fn preprocess(&self, ctx: &StageContext, execution_name: &str) -> Result<()>;

    /// Executes the model, through the scheduler or directly
    async fn run(&self, ctx: &StageContext, queue: &str, core_count: u32) -> Result<()>;

    /// Diagnoses the run outcome from the report files
    async fn generate_execution_status(
        &self,
        ctx: &StageContext,
        job_id: &str,
    ) -> Result<RunStatus>;

    /// Family-specific result derivation after the run
    async fn postprocess(&self, ctx: &StageContext) -> Result<()>;

    /// Archives the outputs and removes everything not worth keeping
    async fn output_compression_and_cleanup(
        &self,
        ctx: &StageContext,
        num_cpus: usize,
    ) -> Result<()>;

    /// Ships the input echo, outputs and synthesis to storage
    async fn result_upload(&self, ctx: &StageContext, path: &str) -> Result<()>;

    /// Cancels a scheduled job, when the family supports it
    async fn cancel_run(&self, ctx: &StageContext, job_id: &str) -> Result<()>;
}

impl std::fmt::Debug for dyn ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelAdapter({})", self.model_name())
    }
}

/// Maps a model name to its adapter
pub struct ModelFactory;

impl ModelFactory {
    pub const KNOWN_MODELS: [&'static str; 3] = [
        newave::MODEL_NAME,
        decomp::MODEL_NAME,
        dessem::MODEL_NAME,
    ];

    /// Builds the adapter registered under `name`, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the model when it is unknown.
    pub fn create(name: &str) -> Result<Box<dyn ModelAdapter>> {
        match name.to_lowercase().as_str() {
            newave::MODEL_NAME => Ok(Box::new(newave::Newave)),
            decomp::MODEL_NAME => Ok(Box::new(decomp::Decomp)),
            dessem::MODEL_NAME => Ok(Box::new(dessem::Dessem)),
            unknown => Err(Error::Validation(format!("Unknown model name: {unknown}"))),
        }
    }
}

/// Downloads the versioned executables into the staging directory
///
/// License files are moved next to the deck unmodified; everything else is
/// marked executable. The version (last segment of the storage key) is
/// recorded in the metadata descriptor.
pub(crate) async fn fetch_executables(
    ctx: &StageContext,
    model_name: &str,
    path: &str,
    licenses: &[&str],
) -> Result<()> {
    info!(path, "Fetching executables");
    let (bucket, key) = storage::split_bucket_key(path)?;
    let version = key.rsplit('/').next().unwrap_or(key.as_str()).to_string();

    let downloaded =
        storage::check_and_download(ctx.storage(), &bucket, &key, &ctx.executable_dir()).await?;
    for filepath in &downloaded {
        let name = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if licenses.contains(&name.as_str()) {
            fs::rename(filepath, ctx.path(&name))?;
            info!(file = name, "Moved license file to the working directory");
        } else {
            files::make_executable(filepath)?;
            debug!(file = name, "Marked file as executable");
        }
    }

    let mut entries = Metadata::new();
    entries.insert(METADATA_MODEL_NAME.to_string(), json!(model_name.to_uppercase()));
    entries.insert(METADATA_MODEL_VERSION.to_string(), json!(version));
    let merged = ctx.update_metadata(entries)?;
    for field in [METADATA_MODEL_NAME, METADATA_MODEL_VERSION] {
        if let Some(value) = metadata_str(&merged, field) {
            PlatformBridge::set_metadata(field, value);
        }
    }
    info!("Executables fetched and ready");
    Ok(())
}

/// Downloads the input deck archive and normalizes its name
///
/// With `delete` set the remote copy is removed after the download, so a
/// submission queue is consumed exactly once.
pub(crate) async fn fetch_deck(ctx: &StageContext, path: &str, delete: bool) -> Result<()> {
    info!(path, "Fetching input deck");
    let (bucket, key) = storage::split_bucket_key(path)?;
    let filename = key.rsplit('/').next().unwrap_or(key.as_str()).to_string();

    storage::check_and_download(ctx.storage(), &bucket, &key, ctx.workdir()).await?;
    if delete {
        info!(path, "Removing remote deck after download");
        storage::check_and_delete(ctx.storage(), &bucket, &key).await?;
    }

    debug!(from = filename, to = RAW_DECK_FILE, "Normalizing deck archive name");
    fs::rename(ctx.path(&filename), ctx.path(RAW_DECK_FILE))?;
    Ok(())
}

/// Validates a parent execution and downloads its carry-forward artifacts
///
/// The parent's metadata descriptor must exist, carry the model name, status
/// and study start date, name the expected model family and report SUCCESS.
/// Validation happens before any artifact is transferred. The parent
/// reference and its study start date are recorded in this execution's
/// metadata.
pub(crate) async fn fetch_parent_artifacts(
    ctx: &StageContext,
    parent_path: &str,
    expected_model: &str,
    artifacts: &[&str],
) -> Result<()> {
    use crate::metadata::METADATA_STUDY_STARTING_DATE;

    info!(parent = parent_path, "Fetching parent execution data");
    let (bucket, key) = storage::split_bucket_key(parent_path)?;

    let descriptor_key = format!("{key}/{OUTPUTS_PREFIX}/{METADATA_FILE}");
    let raw = storage::check_and_fetch(ctx.storage(), &bucket, &descriptor_key).await?;
    let parent: Metadata = serde_json::from_str(&raw)?;

    for required in [
        METADATA_MODEL_NAME,
        METADATA_STATUS,
        METADATA_STUDY_STARTING_DATE,
    ] {
        if !parent.contains_key(required) {
            return Err(Error::Validation(format!(
                "Parent metadata is missing '{required}'"
            )));
        }
    }
    let model = metadata_str(&parent, METADATA_MODEL_NAME).unwrap_or_default();
    if model != expected_model {
        return Err(Error::Validation(format!(
            "Parent model is {model}, expected {expected_model}"
        )));
    }
    let status = metadata_str(&parent, METADATA_STATUS).unwrap_or_default();
    if status != RunStatus::Success.as_str() {
        return Err(Error::Validation(format!(
            "Parent execution status was {status}, not {}",
            RunStatus::Success.as_str()
        )));
    }

    for artifact in artifacts {
        let artifact_key = format!("{key}/{OUTPUTS_PREFIX}/{artifact}");
        storage::check_and_download(ctx.storage(), &bucket, &artifact_key, ctx.workdir()).await?;
    }

    let mut entries = Metadata::new();
    entries.insert(METADATA_PARENT_ID.to_string(), json!(parent_path));
    if let Some(starting_date) = parent.get(METADATA_STUDY_STARTING_DATE) {
        entries.insert(
            METADATA_PARENT_STARTING_DATE.to_string(),
            starting_date.clone(),
        );
    }
    ctx.update_metadata(entries)?;
    Ok(())
}

/// Runs a file-name conversion utility over the extracted deck
///
/// The converter not being able to fix every name is survivable; its output
/// is logged and the pipeline moves on.
pub(crate) async fn run_name_converter(ctx: &StageContext, program: &str) -> Result<()> {
    let converter = ctx.executable_dir().join(program);
    let output = ctx
        .shell(ctx.config().command_timeout())
        .run(&format!("{} 2>&1", converter.display()))
        .await?;
    if !output.success() {
        warn!(program, exit_code = ?output.exit_code, "Name conversion utility failed");
        for line in &output.lines {
            warn!("{}", line);
        }
    }
    Ok(())
}

/// Uploads files that must exist, failing on the first missing one
pub(crate) async fn upload_required(
    ctx: &StageContext,
    path: &str,
    prefix: &str,
    names: &[String],
) -> Result<()> {
    let (bucket, key) = storage::split_bucket_key(path)?;
    for name in names {
        let local = ctx.path(name);
        if !local.is_file() {
            return Err(Error::NotFound(format!(
                "Upload source {} not found",
                local.display()
            )));
        }
        info!(file = name.as_str(), "Uploading");
        ctx.storage()
            .upload(&local, &bucket, &format!("{key}/{prefix}/{name}"))
            .await?;
    }
    Ok(())
}

/// Uploads whichever of the named files exist, skipping the rest
pub(crate) async fn upload_present(
    ctx: &StageContext,
    path: &str,
    prefix: &str,
    names: &[String],
) -> Result<()> {
    let (bucket, key) = storage::split_bucket_key(path)?;
    for name in names {
        let local = ctx.path(name);
        if !local.is_file() {
            continue;
        }
        info!(file = name.as_str(), "Uploading");
        ctx.storage()
            .upload(&local, &bucket, &format!("{key}/{prefix}/{name}"))
            .await?;
    }
    Ok(())
}

/// Uploads the synthesis directory when the postprocessor produced one
pub(crate) async fn upload_synthesis(ctx: &StageContext, path: &str) -> Result<()> {
    let synthesis = ctx.path(SYNTHESIS_DIR);
    if !synthesis.is_dir() {
        warn!("No synthesis directory found");
        return Ok(());
    }
    let (bucket, key) = storage::split_bucket_key(path)?;
    let mut names: Vec<String> = fs::read_dir(&synthesis)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    for name in names {
        info!(file = name.as_str(), "Uploading synthesis file");
        ctx.storage()
            .upload(
                &synthesis.join(&name),
                &bucket,
                &format!("{key}/{SYNTHESIS_DIR}/{name}"),
            )
            .await?;
    }
    Ok(())
}

/// Pipeline marker files present in the working directory
pub(crate) fn marker_files(ctx: &StageContext) -> Result<Vec<String>> {
    files::list_files_by_patterns(ctx.workdir(), &[], &[MARKER_FILES_PATTERN])
}

/// Relays the diagnosed status to the execution platform
///
/// Reads the status recorded by the diagnosis stage and emits the matching
/// platform directive; everything that is not a success or a data problem is
/// reported as a model error.
pub(crate) fn emit_platform_status(ctx: &StageContext) -> Result<()> {
    let descriptor = metadata::read_metadata_in(ctx.workdir())?;
    let status = metadata_str(&descriptor, METADATA_STATUS)
        .ok_or_else(|| {
            Error::NotFound("No status recorded in the metadata descriptor".to_string())
        })?
        .parse::<RunStatus>()
        .unwrap_or(RunStatus::Unknown);

    match status {
        RunStatus::Success => PlatformBridge::set_success(),
        RunStatus::DataError => PlatformBridge::set_data_error(),
        _ => PlatformBridge::set_model_error(),
    }
    Ok(())
}

/// Records the job id and diagnosed status, in the descriptor, the status
/// marker file and the platform
pub(crate) fn record_status(ctx: &StageContext, job_id: &str, status: RunStatus) -> Result<()> {
    metadata::write_status_marker(ctx.workdir(), status)?;
    let mut entries = Metadata::new();
    entries.insert(metadata::METADATA_JOB_ID.to_string(), json!(job_id));
    entries.insert(METADATA_STATUS.to_string(), json!(status.as_str()));
    ctx.update_metadata(entries)?;
    PlatformBridge::set_metadata(metadata::METADATA_JOB_ID, job_id);
    PlatformBridge::set_metadata(METADATA_STATUS, status.as_str());
    info!(status = status.as_str(), "Diagnosed execution status");
    Ok(())
}
