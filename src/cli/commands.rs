use clap::{Parser, Subcommand};

/// Stage runner for energy-planning model executions on HPC clusters
#[derive(Parser, Debug)]
#[command(
    name = "modelops",
    about = "Runs job script stages for energy-planning models in HPC clusters",
    version,
    author,
    long_about = "modelops drives NEWAVE, DECOMP and DESSEM executions stage by stage: \
                  it fetches versioned executables and input decks from object storage, \
                  prepares and fingerprints the deck, submits the run to the scheduler, \
                  diagnoses the outcome and ships the output archives back. Each stage \
                  is a subcommand so the cluster job scripts can drive them one by one."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Increase verbosity")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Download the versioned model executables",
        long_about = "Checks and downloads the model executables from object storage, \
                      stages them for execution and records the model version.\n\n\
                      Examples:\n  \
                      modelops fetch-executables newave versions/newave/28.16\n  \
                      modelops fetch-executables decomp versions/decomp/31.14"
    )]
    FetchExecutables(FetchExecutablesArgs),

    #[command(
        about = "Download the input deck and parent artifacts",
        long_about = "Checks and downloads the compressed input deck. When a parent \
                      execution is given, validates that it succeeded and pulls its \
                      carry-forward artifacts.\n\n\
                      Examples:\n  \
                      modelops fetch-inputs newave decks/pmo-2025-05.zip\n  \
                      modelops fetch-inputs dessem decks/daily.zip --parent-path runs/cc43/decomp --delete"
    )]
    FetchInputs(FetchInputsArgs),

    #[command(
        about = "Extract the deck and normalize names and encodings",
        long_about = "Extracts the downloaded archives into the working directory, runs \
                      the family's file-name conversion utility, forces text files to \
                      utf-8 and records the study identity."
    )]
    ExtractSanitizeInputs(ModelArgs),

    #[command(
        about = "Compute the deterministic execution id",
        long_about = "Hashes the model name, executable version, parent identity and the \
                      working directory content into the execution's unique id, persists \
                      it and prints it to stdout.\n\n\
                      Examples:\n  \
                      modelops unique-id newave 28.16\n  \
                      modelops unique-id decomp 31.14 --parent-id cbde45fdaedd3271434e64e1b0e15145"
    )]
    UniqueId(UniqueIdArgs),

    #[command(
        about = "Run model-specific deck edits before execution",
        long_about = "Applies the family's pre-execution deck edits: study title, cut \
                      file references and process manager location."
    )]
    Preprocess(PreprocessArgs),

    #[command(
        about = "Execute the model",
        long_about = "Runs the model through the job scheduler (or directly, for \
                      families that execute on the submission host) and follows it to \
                      completion.\n\n\
                      Examples:\n  \
                      modelops run newave batch 64\n  \
                      modelops run dessem batch 16"
    )]
    Run(RunArgs),

    #[command(
        about = "Diagnose the execution outcome",
        long_about = "Reads the family's report files and derives the run status \
                      (success, infeasible, data error, runtime error), recording it in \
                      the execution metadata."
    )]
    ExecutionStatus(JobArgs),

    #[command(
        about = "Run model-specific post-processing",
        long_about = "Derives additional results after the run, such as driving the \
                      NWLISTCF and NWLISTOP listing utilities over NEWAVE outputs."
    )]
    Postprocess(ModelArgs),

    #[command(
        about = "Archive the outputs and clean the working directory",
        long_about = "Compresses the deck and the output files into their archive \
                      groups, then deletes everything already archived that is not \
                      worth keeping loose.\n\n\
                      Examples:\n  \
                      modelops compress-cleanup newave 8"
    )]
    CompressCleanup(CompressCleanupArgs),

    #[command(
        about = "Upload the execution results",
        long_about = "Uploads the input echo, the output archives and the synthesis \
                      files to the execution's storage prefix."
    )]
    ResultUpload(ResultUploadArgs),

    #[command(
        about = "Cancel a scheduled execution",
        long_about = "Cancels the scheduler job of a running execution and waits for it \
                      to leave the queue. Families that run outside the scheduler \
                      reject cancellation."
    )]
    Cancel(JobArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct FetchExecutablesArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(value_name = "PATH", help = "Storage prefix holding the versioned executables")]
    pub path: String,
}

#[derive(Parser, Debug, Clone)]
pub struct FetchInputsArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(value_name = "PATH", help = "Storage path of the compressed input deck")]
    pub path: String,

    #[arg(
        long,
        value_name = "PATH",
        help = "Storage prefix of the parent execution to couple to"
    )]
    pub parent_path: Option<String>,

    #[arg(long, help = "Delete the deck from storage after downloading")]
    pub delete: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ModelArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,
}

#[derive(Parser, Debug, Clone)]
pub struct UniqueIdArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(value_name = "VERSION", help = "Executable version used for the run")]
    pub version: String,

    #[arg(long, value_name = "ID", help = "Unique id of the parent execution")]
    pub parent_id: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct PreprocessArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(
        long,
        value_name = "NAME",
        default_value = "",
        help = "Execution name stamped into the deck title"
    )]
    pub execution_name: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(value_name = "QUEUE", help = "Scheduler partition to submit to")]
    pub queue: String,

    #[arg(value_name = "CORE_COUNT", help = "Core count requested for the run")]
    pub core_count: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct JobArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(long, value_name = "ID", default_value = "", help = "Scheduler job id")]
    pub job_id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CompressCleanupArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(value_name = "NUM_CPUS", help = "Worker count for parallel compression")]
    pub num_cpus: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct ResultUploadArgs {
    #[arg(value_name = "MODEL_NAME", help = "Model family (newave, decomp, dessem)")]
    pub model_name: String,

    #[arg(value_name = "PATH", help = "Storage prefix receiving the results")]
    pub path: String,
}
