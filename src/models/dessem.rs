//! DESSEM: day-ahead unit commitment, chained after a DECOMP run
//!
//! DESSEM couples to its parent through the cut and cut-map files a DECOMP
//! execution wrote (`cortdeco.*` / `mapcut.*`), pulled from the parent's cut
//! archive and wired into the MAPFCF/CORTFCF registers at preprocessing.
//! Unlike the monthly models it runs on the submission host through its job
//! script instead of going through the scheduler, and its parallelism is a
//! deck setting: the UCTPAR option in DESSOPC (or OPERUT when no DESSOPC is
//! registered), not a core-count argument.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::{
    decomp, emit_platform_status, fetch_deck, fetch_executables, fetch_parent_artifacts,
    marker_files, record_status, upload_present, upload_required, upload_synthesis, ModelAdapter,
    StageContext, INPUTS_ECHO_PREFIX, OUTPUTS_PREFIX, PROCESSED_DECK_FILE, RAW_DECK_FILE,
};
use crate::archive;
use crate::bridge::PlatformBridge;
use crate::deck::dessem::{ExecutionLog, OptionsFile, RegisterIndex};
use crate::deck::read_libs_index;
use crate::error::{Error, Result};
use crate::files::{self, ExtractFilter};
use crate::metadata::{metadata_str, Metadata, METADATA_STUDY_NAME, METADATA_STUDY_STARTING_DATE};
use crate::status::RunStatus;

pub const MODEL_NAME: &str = "dessem";

const ENTRY_FILE: &str = "dessem.arq";
const LICENSE_FILES: [&str; 2] = ["dessem.lic", "ddsDESSEM.cep"];

/// Cut archive received from the parent DECOMP execution
const CUT_FILE: &str = "cortes.zip";
const CUT_PATTERNS: [&str; 2] = [r"^cortdeco.*$", r"^mapcut.*$"];

const DATA_ERROR_PATTERN: &str = "ERRO(S) NA ENTRADA DE DADOS";
const EXECUTION_LOG_PREFIX: &str = "DES_LOG_RELATO";

const REPORT_PATTERNS: [&str; 6] = [
    r"AVL_.*$",
    r"DES_.*$",
    r"LOG_.*$",
    r"PDO_AVAL.*$",
    r"PDO_ECO.*$",
    r"PTOPER.*\.PWF$",
];

const OPERATION_PATTERNS: [&str; 20] = [
    r"^PDO_OPER.*$",
    r"^PDO_AVAL_.*$",
    r"^PDO_CMO.*$",
    r"^PDO_CONTR.*$",
    r"^PDO_DESV.*$",
    r"^PDO_ELEV.*$",
    r"^PDO_EOLICA.*$",
    r"^PDO_FLUXLIN.*$",
    r"^PDO_GERBARR.*$",
    r"^PDO_HIDR.*$",
    r"^PDO_INTER.*$",
    r"^PDO_RESERVA.*$",
    r"^PDO_REST.*$",
    r"^PDO_SIST.*$",
    r"^PDO_SOMFLUX.*$",
    r"^PDO_STATREDE_ITER.*$",
    r"^PDO_SUMAOPER.*$",
    r"^PDO_TERM.*$",
    r"^PDO_VAGUA.*$",
    r"^PDO_VERT.*$",
];

const CLEANUP_PATTERNS: [&str; 5] = [
    r"^fort.*$",
    r"^fpha_.*$",
    r"^SAVERADIAL.*$",
    r"^SIM_ECO.*$",
    r"^SVC_.*$",
];

pub struct Dessem;

impl Dessem {
    fn index(ctx: &StageContext) -> Result<Arc<RegisterIndex>> {
        ctx.cache()
            .get_or_load("dessem_arq", || RegisterIndex::read(&ctx.path(ENTRY_FILE)))
    }

    fn execution_log(ctx: &StageContext) -> Result<Arc<ExecutionLog>> {
        let index = Self::index(ctx)?;
        let name = format!("{EXECUTION_LOG_PREFIX}.{}", index.extension());
        ctx.cache().get_or_load("des_log_relato", || {
            let path = files::find_file_case_insensitive(ctx.workdir(), &name)?;
            ExecutionLog::read(&path)
        })
    }

    /// Resolves the options file carrying the UCTPAR setting: the DESSOPC
    /// file when the deck registers one, the OPERUT file otherwise
    fn options_file(ctx: &StageContext) -> Result<(&'static str, PathBuf)> {
        let index = Self::index(ctx)?;
        let register = if index.has_register("DESSOPC") {
            "DESSOPC"
        } else {
            "OPERUT"
        };
        let base = index.value_of(register).unwrap_or(register).to_string();
        let name = format!("{base}.{}", index.extension());
        let path = files::find_file_case_insensitive(ctx.workdir(), &name)?;
        Ok((register, path))
    }

    /// Writes the core count into the deck's UCTPAR option, when it has one
    fn edit_core_count(ctx: &StageContext, core_count: u32) -> Result<()> {
        let (register, path) = Self::options_file(ctx)?;
        let mut options = OptionsFile::read(&path)?;
        if options.uctpar().is_some() {
            options.set_uctpar(core_count);
            options.write(&path)?;
            info!(register, cores = core_count, "Set UCTPAR parallelism");
        } else {
            info!(register, "No UCTPAR found in the options file");
        }
        Ok(())
    }

    /// Files extracted from the parent cut archive matching `fragment`,
    /// lexicographically first when several revisions are present
    fn first_cut_file(ctx: &StageContext, fragment: &str) -> Result<String> {
        let mut names: Vec<String> = fs::read_dir(ctx.workdir())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(fragment))
            .collect();
        names.sort();
        names.into_iter().next().ok_or_else(|| {
            Error::NotFound(format!("No {fragment} file found after cut extraction"))
        })
    }

    fn input_file_names(ctx: &StageContext) -> Result<Vec<String>> {
        let index = Self::index(ctx)?;
        let mut names = vec![ENTRY_FILE.to_string()];
        names.extend(index.input_files().iter().map(|name| name.to_string()));
        if let Some(libs_index) = index.value_of("ILIBS") {
            names.push(libs_index.to_string());
            names.extend(read_libs_index(&ctx.path(libs_index))?);
        }

        // Electrical network cases sit next to the deck without being
        // registered in it
        let mut patamar_networks = Vec::new();
        let mut powerflow_cases = Vec::new();
        for entry in fs::read_dir(ctx.workdir())? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.contains("pat") && name.contains(".afp") {
                patamar_networks.push(name);
            } else if name.contains(".pwf") {
                powerflow_cases.push(name);
            }
        }
        patamar_networks.sort();
        powerflow_cases.sort();
        names.extend(patamar_networks);
        names.extend(powerflow_cases);

        info!(count = names.len(), "Files considered as input");
        Ok(names)
    }

    fn report_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let names = files::list_files_by_patterns(ctx.workdir(), input_files, &REPORT_PATTERNS)?;
        info!(count = names.len(), "Files considered as report");
        Ok(names)
    }

    fn operation_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let names =
            files::list_files_by_patterns(ctx.workdir(), input_files, &OPERATION_PATTERNS)?;
        info!(count = names.len(), "Files considered as operation");
        Ok(names)
    }

    fn cleanup(
        ctx: &StageContext,
        input_files: &[String],
        report_files: &[String],
        operation_files: &[String],
    ) -> Result<()> {
        let extension = Self::index(ctx)?.extension().to_string();
        let mut keeping: Vec<String> = input_files.to_vec();
        keeping.extend([
            format!("DES_LOG_RELATO.{extension}"),
            format!("PDO_CMOBAR.{extension}"),
            format!("PDO_CMOSIST.{extension}"),
            format!("PDO_CONTR.{extension}"),
            format!("PDO_EOLICA.{extension}"),
            format!("PDO_HIDR.{extension}"),
            format!("PDO_OPER_CONTR.{extension}"),
            format!("PDO_OPER_TERM.{extension}"),
            format!("PDO_OPER_TITULACAO_CONTRATOS.{extension}"),
            format!("PDO_OPER_TITULACAO_USINAS.{extension}"),
            format!("PDO_OPERACAO.{extension}"),
            format!("PDO_SIST.{extension}"),
            format!("PDO_SOMFLUX.{extension}"),
            format!("PDO_SUMAOPER.{extension}"),
            format!("PDO_TERM.{extension}"),
            format!("LOG_MATRIZ.{extension}"),
            format!("AVL_ESTATFPHA.{extension}"),
            format!("LOG_INVIAB.{extension}"),
        ]);

        let mut cleaning: Vec<String> = input_files
            .iter()
            .chain(report_files)
            .chain(operation_files)
            .filter(|name| !keeping.contains(name))
            .cloned()
            .collect();
        cleaning.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &CLEANUP_PATTERNS,
        )?);
        info!(count = cleaning.len(), "Cleaning files");
        files::clean_files(ctx.workdir(), &cleaning)
    }
}

#[async_trait]
impl ModelAdapter for Dessem {
    fn model_name(&self) -> &'static str {
        MODEL_NAME
    }

    async fn check_and_fetch_executables(&self, ctx: &StageContext, path: &str) -> Result<()> {
        fetch_executables(ctx, MODEL_NAME, path, &LICENSE_FILES).await
    }

    async fn check_and_fetch_inputs(
        &self,
        ctx: &StageContext,
        path: &str,
        parent_path: Option<&str>,
        delete: bool,
    ) -> Result<()> {
        fetch_deck(ctx, path, delete).await?;
        match parent_path {
            Some(parent) => {
                let expected = decomp::MODEL_NAME.to_uppercase();
                fetch_parent_artifacts(ctx, parent, &expected, &[CUT_FILE]).await?;
            }
            None => info!("No parent execution was given"),
        }
        info!("Inputs fetched");
        Ok(())
    }

    async fn extract_sanitize_inputs(&self, ctx: &StageContext) -> Result<()> {
        let raw = ctx.path(RAW_DECK_FILE);
        if raw.is_file() {
            let extracted = files::extract_zip(&raw, ctx.workdir(), ExtractFilter::All)?;
            info!(count = extracted.len(), "Extracted input files");
        }
        info!("Forcing encoding to utf-8");
        files::sanitize_directory(ctx.workdir())?;

        let cut_archive = ctx.path(CUT_FILE);
        if cut_archive.is_file() {
            let extracted = files::extract_zip(
                &cut_archive,
                ctx.workdir(),
                ExtractFilter::Patterns(&CUT_PATTERNS),
            )?;
            info!(count = extracted.len(), "Extracted parent cut files");
        }

        let index = Self::index(ctx)?;
        let study_name = index.title().ok_or_else(|| {
            Error::Validation("TITULO register not found in dessem.arq".to_string())
        })?;

        // The deck carries no study date register; record when the inputs
        // were prepared instead
        let mut entries = Metadata::new();
        entries.insert(
            METADATA_STUDY_STARTING_DATE.to_string(),
            json!(Utc::now().to_rfc3339()),
        );
        entries.insert(METADATA_STUDY_NAME.to_string(), json!(study_name));
        let merged = ctx.update_metadata(entries)?;
        for field in [METADATA_STUDY_STARTING_DATE, METADATA_STUDY_NAME] {
            if let Some(value) = metadata_str(&merged, field) {
                PlatformBridge::set_metadata(field, value);
            }
        }
        Ok(())
    }

    async fn preprocess(&self, ctx: &StageContext, execution_name: &str) -> Result<()> {
        // Read directly instead of through the cache: this stage rewrites
        // the file and a stale cached copy must not survive it
        let mut index = RegisterIndex::read(&ctx.path(ENTRY_FILE))?;

        info!(execution_name, "Overwriting study name");
        if !index.set_title(execution_name) {
            return Err(Error::Validation(
                "TITULO register not found in dessem.arq".to_string(),
            ));
        }

        if index.has_register("MAPFCF") {
            let mapcut = Self::first_cut_file(ctx, "mapcut")?;
            info!(file = mapcut.as_str(), "Overwriting MAPFCF register");
            index.set_value("MAPFCF", &mapcut);
        }
        if index.has_register("CORTFCF") {
            let cortdeco = Self::first_cut_file(ctx, "cortdeco")?;
            info!(file = cortdeco.as_str(), "Overwriting CORTFCF register");
            index.set_value("CORTFCF", &cortdeco);
        }
        index.write(&ctx.path(ENTRY_FILE))
    }

    async fn run(&self, ctx: &StageContext, _queue: &str, core_count: u32) -> Result<()> {
        Self::edit_core_count(ctx, core_count)?;

        let script = ctx.config().job_script(MODEL_NAME);
        info!(script = %script.display(), "Script file");
        let output = ctx
            .shell(ctx.config().job_timeout())
            .run(&format!("{} 2>&1", script.display()))
            .await?;
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "Execution script reported failure");
        }
        Ok(())
    }

    async fn generate_execution_status(
        &self,
        ctx: &StageContext,
        job_id: &str,
    ) -> Result<RunStatus> {
        info!("Reading the execution log for the status diagnosis");
        let log = Self::execution_log(ctx)?;

        let status = if log.contains(DATA_ERROR_PATTERN) {
            RunStatus::DataError
        } else if !log.has_processing_time() {
            RunStatus::DataError
        } else {
            RunStatus::Success
        };

        record_status(ctx, job_id, status)?;
        Ok(status)
    }

    async fn postprocess(&self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }

    async fn output_compression_and_cleanup(
        &self,
        ctx: &StageContext,
        num_cpus: usize,
    ) -> Result<()> {
        let input_files = Self::input_file_names(ctx)?;
        archive::compress_files(ctx.workdir(), &input_files, "deck")?;

        files::move_dir_contents_to_root(ctx.workdir(), "out")?;

        let operation_files = Self::operation_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &operation_files, "operacao", num_cpus)?;
        let report_files = Self::report_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &report_files, "relatorios", num_cpus)?;

        Self::cleanup(ctx, &input_files, &report_files, &operation_files)
    }

    async fn result_upload(&self, ctx: &StageContext, path: &str) -> Result<()> {
        PlatformBridge::set_execution_artifacts_path(path);
        emit_platform_status(ctx)?;
        info!(model = MODEL_NAME, "Uploading results");

        let echo = vec![RAW_DECK_FILE.to_string(), PROCESSED_DECK_FILE.to_string()];
        upload_required(ctx, path, INPUTS_ECHO_PREFIX, &echo).await?;

        let mut outputs = vec!["operacao.zip".to_string(), "relatorios.zip".to_string()];
        outputs.extend(marker_files(ctx)?);
        upload_present(ctx, path, OUTPUTS_PREFIX, &outputs).await?;

        upload_synthesis(ctx, path).await
    }

    async fn cancel_run(&self, _ctx: &StageContext, _job_id: &str) -> Result<()> {
        Err(Error::Validation(
            "DESSEM executions cannot be cancelled".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOpsConfig;
    use crate::metadata::{self, METADATA_JOB_ID, METADATA_STATUS};
    use crate::storage::local::LocalStore;
    use std::path::Path;
    use tempfile::TempDir;

    const INDEX: &str = "\
CASO        DAT
TITULO      DESSEM CASE
VAZOES      dadvaz.dat
DADGER      entdados.dat
OPERUT      operut
ILIBS       indices.csv
";

    const INDEX_WITH_CUTS: &str = "\
CASO        DAT
TITULO      DESSEM CASE
VAZOES      dadvaz.dat
DADGER      entdados.dat
MAPFCF      mapcut.dat
CORTFCF     cortdeco.dat
OPERUT      operut
";

    fn context(work: &Path) -> (TempDir, StageContext) {
        let store = TempDir::new().unwrap();
        let ctx = StageContext::with_parts(
            ModelOpsConfig::default(),
            Box::new(LocalStore::new(store.path().to_path_buf())),
            work.to_path_buf(),
        );
        (store, ctx)
    }

    #[tokio::test]
    async fn test_preprocess_rewires_cut_registers() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX_WITH_CUTS).unwrap();
        fs::write(work.path().join("mapcut.rv2"), "map").unwrap();
        fs::write(work.path().join("cortdeco.rv2"), "cuts").unwrap();

        let (_store, ctx) = context(work.path());
        Dessem.preprocess(&ctx, "chain-step-30").await.unwrap();

        let rewritten = RegisterIndex::read(&work.path().join("dessem.arq")).unwrap();
        assert_eq!(rewritten.title(), Some("chain-step-30"));
        assert_eq!(rewritten.value_of("MAPFCF"), Some("mapcut.rv2"));
        assert_eq!(rewritten.value_of("CORTFCF"), Some("cortdeco.rv2"));
    }

    #[tokio::test]
    async fn test_preprocess_requires_extracted_cut_files() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX_WITH_CUTS).unwrap();

        let (_store, ctx) = context(work.path());
        let result = Dessem.preprocess(&ctx, "chain-step-30").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_preprocess_without_coupling_registers() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX).unwrap();

        let (_store, ctx) = context(work.path());
        Dessem.preprocess(&ctx, "standalone").await.unwrap();

        let rewritten = RegisterIndex::read(&work.path().join("dessem.arq")).unwrap();
        assert_eq!(rewritten.title(), Some("standalone"));
        assert_eq!(rewritten.value_of("VAZOES"), Some("dadvaz.dat"));
    }

    #[test]
    fn test_edit_core_count_prefers_dessopc() {
        let work = TempDir::new().unwrap();
        fs::write(
            work.path().join("dessem.arq"),
            format!("{INDEX}DESSOPC     dessopc\n"),
        )
        .unwrap();
        fs::write(work.path().join("dessopc.DAT"), "UCTPAR  4\n").unwrap();

        let (_store, ctx) = context(work.path());
        Dessem::edit_core_count(&ctx, 16).unwrap();

        let options = OptionsFile::read(&work.path().join("dessopc.DAT")).unwrap();
        assert_eq!(options.uctpar(), Some(16));
    }

    #[test]
    fn test_edit_core_count_falls_back_to_operut() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX).unwrap();
        // Stored with a different case than the register value
        fs::write(work.path().join("OPERUT.DAT"), "UCTPAR  8\n").unwrap();

        let (_store, ctx) = context(work.path());
        Dessem::edit_core_count(&ctx, 24).unwrap();

        let options = OptionsFile::read(&work.path().join("OPERUT.DAT")).unwrap();
        assert_eq!(options.uctpar(), Some(24));
    }

    #[test]
    fn test_edit_core_count_without_uctpar_is_a_no_op() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX).unwrap();
        fs::write(work.path().join("operut.DAT"), "& no options here\n").unwrap();

        let (_store, ctx) = context(work.path());
        Dessem::edit_core_count(&ctx, 24).unwrap();

        let content = fs::read_to_string(work.path().join("operut.DAT")).unwrap();
        assert_eq!(content, "& no options here\n");
    }

    async fn diagnose(work: &Path, log: &str) -> RunStatus {
        fs::write(work.join("dessem.arq"), INDEX).unwrap();
        fs::write(work.join("des_log_relato.dat"), log).unwrap();
        let (_store, ctx) = context(work);
        Dessem
            .generate_execution_status(&ctx, "3030")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_success_needs_processing_time() {
        let work = TempDir::new().unwrap();
        let log = "RELATORIO\nTEMPO TOTAL DE PROCESSAMENTO: 00:42:10\n";
        assert_eq!(diagnose(work.path(), log).await, RunStatus::Success);

        let descriptor = metadata::read_metadata_in(work.path()).unwrap();
        assert_eq!(metadata_str(&descriptor, METADATA_STATUS), Some("SUCCESS"));
        assert_eq!(metadata_str(&descriptor, METADATA_JOB_ID), Some("3030"));
    }

    #[tokio::test]
    async fn test_status_data_error_pattern() {
        let work = TempDir::new().unwrap();
        let log = "ERRO(S) NA ENTRADA DE DADOS\nTEMPO TOTAL DE PROCESSAMENTO: 00:00:01\n";
        assert_eq!(diagnose(work.path(), log).await, RunStatus::DataError);
    }

    #[tokio::test]
    async fn test_status_truncated_log_is_data_error() {
        let work = TempDir::new().unwrap();
        let log = "RELATORIO SEM FECHAMENTO\n";
        assert_eq!(diagnose(work.path(), log).await, RunStatus::DataError);
    }

    #[test]
    fn test_input_file_names_cover_registers_libs_and_network() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX).unwrap();
        fs::write(work.path().join("indices.csv"), "a;b;polinjus.dat\n").unwrap();
        fs::write(work.path().join("leve_pat1.afp"), "net").unwrap();
        fs::write(work.path().join("caso1.pwf"), "flow").unwrap();
        fs::write(work.path().join("unrelated.txt"), "skip").unwrap();

        let (_store, ctx) = context(work.path());
        let names = Dessem::input_file_names(&ctx).unwrap();
        assert_eq!(
            names,
            [
                "dessem.arq",
                "dadvaz.dat",
                "entdados.dat",
                "operut",
                "indices.csv",
                "polinjus.dat",
                "leve_pat1.afp",
                "caso1.pwf",
            ]
        );
    }

    #[tokio::test]
    async fn test_compression_archives_and_cleans_outputs() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("dessem.arq"), INDEX).unwrap();
        fs::write(work.path().join("indices.csv"), "a;b;polinjus.dat\n").unwrap();
        fs::write(work.path().join("dadvaz.dat"), "flows").unwrap();
        fs::write(work.path().join("entdados.dat"), "general data").unwrap();
        fs::write(work.path().join("DES_LOG_RELATO.DAT"), "log").unwrap();
        fs::write(work.path().join("PDO_OPERACAO.DAT"), "kept").unwrap();
        fs::write(work.path().join("PDO_VERT.DAT"), "archived").unwrap();
        fs::write(work.path().join("AVL_ESTATFPHA.DAT"), "kept").unwrap();
        fs::write(work.path().join("fort.8"), "scratch").unwrap();
        fs::write(work.path().join("SIM_ECO3.TMP"), "scratch").unwrap();

        let (_store, ctx) = context(work.path());
        Dessem.output_compression_and_cleanup(&ctx, 2).await.unwrap();

        for archive in ["deck.zip", "operacao.zip", "relatorios.zip"] {
            assert!(work.path().join(archive).is_file(), "missing {archive}");
        }
        assert!(work.path().join("dessem.arq").is_file());
        assert!(work.path().join("dadvaz.dat").is_file());
        assert!(work.path().join("DES_LOG_RELATO.DAT").is_file());
        assert!(work.path().join("PDO_OPERACAO.DAT").is_file());
        assert!(work.path().join("AVL_ESTATFPHA.DAT").is_file());
        assert!(!work.path().join("PDO_VERT.DAT").exists());
        assert!(!work.path().join("fort.8").exists());
        assert!(!work.path().join("SIM_ECO3.TMP").exists());
    }

    #[tokio::test]
    async fn test_cancel_is_rejected() {
        let work = TempDir::new().unwrap();
        let (_store, ctx) = context(work.path());
        let result = Dessem.cancel_run(&ctx, "1234").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
