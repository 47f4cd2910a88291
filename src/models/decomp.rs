//! DECOMP: weekly hydrothermal scheduling, chained after a NEWAVE run
//!
//! DECOMP consumes the Benders cuts a parent NEWAVE execution produced, so
//! fetching inputs validates the parent and pulls its cut archive, and the
//! preprocessing stage rewires the deck's FC registers to the extracted cut
//! files. Which monthly cut file applies is a calendar computation: NEWAVE
//! names its per-stage cuts `cortes-NNN.dat` where NNN counts calendar
//! months from its own study start.

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime};
use serde_json::json;
use tracing::{info, warn};

use super::{
    emit_platform_status, fetch_deck, fetch_executables, fetch_parent_artifacts, marker_files,
    newave, record_status, run_name_converter, upload_present, upload_required, upload_synthesis,
    ModelAdapter, StageContext, INPUTS_ECHO_PREFIX, OUTPUTS_PREFIX, PROCESSED_DECK_FILE,
    RAW_DECK_FILE,
};
use crate::archive;
use crate::bridge::PlatformBridge;
use crate::deck::decomp::{CaseFile, Dadger, IndexFile, InviabReport, Relato};
use crate::deck::read_libs_index;
use crate::error::{Error, Result};
use crate::files::{self, ExtractFilter};
use crate::metadata::{
    self, metadata_str, Metadata, METADATA_PARENT_STARTING_DATE, METADATA_STUDY_NAME,
    METADATA_STUDY_STARTING_DATE,
};
use crate::status::RunStatus;

pub const MODEL_NAME: &str = "decomp";

const ENTRY_FILE: &str = "caso.dat";
const NAMECAST_PROGRAM: &str = "convertenomesdecomp";
const LICENSE_FILES: [&str; 2] = ["decomp.lic", "ddsDECOMP.cep"];

/// Cut archive received from the parent and produced for children
const CUT_FILE: &str = "cortes.zip";
const CUT_HEADER_FILE: &str = "cortesh.dat";
const CUT_FULL_FILE: &str = "cortes.dat";

const DATA_ERROR_PATTERN: &str = "ERRO(S) DE ENTRADA DE DADOS";
const NEGATIVE_GAP_PATTERN: &str = "ATENCAO: GAP NEGATIVO";
const MAX_ITERATIONS_PATTERN: &str = "CONVERGENCIA NAO ALCANCADA EM";

const REPORT_PATTERNS: [&str; 5] = [
    r"^osl_.*$",
    r"^eco_.*\.csv$",
    r"^dec_fcf_cortes.*$",
    r"^avl_desvfpha_v_q_.*$",
    r"^avl_desvfpha_s_.*$",
];

const OPERATION_PATTERNS: [&str; 21] = [
    r"^bengnl.*\.csv$",
    r"^dec_oper.*\.csv$",
    r"^energia_acopla.*\.csv$",
    r"^balsub.*\.csv$",
    r"^cei.*\.csv$",
    r"^cmar.*\.csv$",
    r"^contratos.*\.csv$",
    r"^ener.*\.csv$",
    r"^ever.*\.csv$",
    r"^evnt.*\.csv$",
    r"^flx.*\.csv$",
    r"^hidrpat.*\.csv$",
    r"^pdef.*\.csv$",
    r"^qnat.*\.csv$",
    r"^qtur.*\.csv$",
    r"^term.*\.csv$",
    r"^usina.*\.csv$",
    r"^ute.*\.csv$",
    r"^vert.*\.csv$",
    r"^vutil.*\.csv$",
    r"^oper_.*\.csv$",
];

const CLEANUP_PATTERNS: [&str; 8] = [
    r"^dimpl_.*$",
    r"^cad.*$",
    r"^debug.*$",
    r"^inviab_0.*$",
    r"^svc.*$",
    r"^deco_.*\.msg$",
    r"^SAIDA_MENSAGENS.*$",
    r"^vazmsg.*$",
];

pub struct Decomp;

impl Decomp {
    fn case(ctx: &StageContext) -> Result<Arc<CaseFile>> {
        ctx.cache()
            .get_or_load("caso", || CaseFile::read(&ctx.path(ENTRY_FILE)))
    }

    fn index(ctx: &StageContext) -> Result<Arc<IndexFile>> {
        let caso = Self::case(ctx)?;
        ctx.cache()
            .get_or_load("arquivos", || IndexFile::read(&ctx.path(caso.extension())))
    }

    fn dadger(ctx: &StageContext) -> Result<Arc<Dadger>> {
        let index = Self::index(ctx)?;
        let name = index.dadger()?.to_string();
        ctx.cache()
            .get_or_load("dadger", || Dadger::read(&ctx.path(&name)))
    }

    fn relato(ctx: &StageContext) -> Result<Arc<Relato>> {
        let caso = Self::case(ctx)?;
        let name = format!("relato.{}", caso.extension());
        ctx.cache()
            .get_or_load("relato", || Relato::read(&ctx.path(&name)))
    }

    /// Infeasibility report keyed by its prefix, `inviab_unic` or `inviab`
    fn infeasibilities(ctx: &StageContext, prefix: &str) -> Result<Arc<InviabReport>> {
        let caso = Self::case(ctx)?;
        let name = format!("{prefix}.{}", caso.extension());
        ctx.cache()
            .get_or_load(prefix, || InviabReport::read(&ctx.path(&name)))
    }

    /// Name of the monthly cut file matching this study's last stage
    ///
    /// NEWAVE numbers its per-stage cut files by a calendar month counter
    /// anchored at its own study start. Without a recorded parent start
    /// date there is nothing to anchor on and only the full cut file can
    /// be used.
    fn monthly_cut_name(ctx: &StageContext, ending: NaiveDateTime) -> Result<Option<String>> {
        let descriptor = metadata::read_metadata_in(ctx.workdir())?;
        let Some(parent_start) = metadata_str(&descriptor, METADATA_PARENT_STARTING_DATE) else {
            warn!("Parent starting date could not be obtained");
            return Ok(None);
        };
        let parent_start = DateTime::parse_from_rfc3339(parent_start).map_err(|_| {
            Error::Validation(format!("Invalid parent starting date: {parent_start}"))
        })?;

        let months_between = (ending.year() - parent_start.year()) * 12 + ending.month() as i32
            - parent_start.month() as i32;
        let ending_month = parent_start.month() as i32 + months_between - 1;
        let filename = format!("cortes-{ending_month:03}.dat");
        if ending_month <= 0 {
            warn!(filename, "Cut stage counter is not positive");
        }
        Ok(Some(filename))
    }

    /// Members to pull out of the parent cut archive
    fn cut_member_names(ctx: &StageContext) -> Result<Vec<String>> {
        let dadger = Self::dadger(ctx)?;
        let start = dadger.study_start()?.and_time(NaiveTime::MIN);
        let total_hours = dadger.total_stage_hours();
        let ending = start + Duration::seconds((total_hours * 3600.0).round() as i64);

        let mut names = vec![CUT_HEADER_FILE.to_string(), CUT_FULL_FILE.to_string()];
        if let Some(monthly) = Self::monthly_cut_name(ctx, ending)? {
            names.push(monthly);
        }
        Ok(names)
    }

    /// Whether an infeasibility report flags the run as infeasible
    ///
    /// Deficit-only rows are counted as a real infeasibility only when the
    /// deck constrains stored energy (HE registers); anything else in the
    /// final simulation section is one unconditionally.
    fn indicates_infeasible(report: &InviabReport, dadger: &Dadger) -> bool {
        match report.final_simulation_rows() {
            None => false,
            Some(rows) if rows.is_empty() => false,
            Some(rows) => {
                if rows.iter().all(|row| row.contains("DEFICIT")) {
                    dadger.has_he()
                } else {
                    true
                }
            }
        }
    }

    /// Everything fed to the program: the entry files, the deck index
    /// content and the files referenced from dadger registers
    fn input_file_names(ctx: &StageContext) -> Result<Vec<String>> {
        let caso = Self::case(ctx)?;
        let index = Self::index(ctx)?;
        let dadger = Self::dadger(ctx)?;

        let mut names = vec![ENTRY_FILE.to_string(), caso.extension().to_string()];
        names.extend(index.files().iter().cloned());
        for mnemonic in ["FA", "FJ", "VT"] {
            if let Some(file) = dadger.file_reference(mnemonic) {
                names.push(file.to_string());
            }
        }
        if let Some(libs_index) = dadger.file_reference("FA") {
            names.extend(read_libs_index(&ctx.path(libs_index))?);
        }
        info!(count = names.len(), "Files considered as input");
        Ok(names)
    }

    fn report_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let extension = Self::case(ctx)?.extension().to_string();
        let mut names: Vec<String> = vec![
            "decomp.tim".to_string(),
            format!("relato.{extension}"),
            format!("sumario.{extension}"),
            format!("relato2.{extension}"),
            format!("inviab_unic.{extension}"),
            format!("inviab.{extension}"),
            format!("relgnl.{extension}"),
            format!("custos.{extension}"),
            format!("avl_cortesfpha_dec.{extension}"),
            format!("dec_desvfpha.{extension}"),
            format!("dec_estatfpha.{extension}"),
            format!("energia.{extension}"),
            format!("log_desvfpha_dec.{extension}"),
            format!("outgnl.{extension}"),
            format!("memcal.{extension}"),
            "runstate.dat".to_string(),
            "runtrace.dat".to_string(),
            format!("eco_fpha_.{extension}"),
            "dec_eco_desvioagua.csv".to_string(),
            "dec_eco_discr.csv".to_string(),
            "dec_eco_evap.csv".to_string(),
            "dec_eco_qlat.csv".to_string(),
            "dec_eco_cotajus.csv".to_string(),
            "avl_turb_max.csv".to_string(),
            "dec_avl_evap.csv".to_string(),
            "dec_cortes_evap.csv".to_string(),
            "dec_estatevap.csv".to_string(),
            format!("fcfnwi.{extension}"),
            format!("fcfnwn.{extension}"),
            format!("cmdeco.{extension}"),
            "indice_saida.csv".to_string(),
            "mensagens.csv".to_string(),
            "mensagensErro.txt".to_string(),
        ];
        names.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &REPORT_PATTERNS,
        )?);
        info!(count = names.len(), "Files considered as report");
        Ok(names)
    }

    fn operation_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let names =
            files::list_files_by_patterns(ctx.workdir(), input_files, &OPERATION_PATTERNS)?;
        info!(count = names.len(), "Files considered as operation");
        Ok(names)
    }

    /// Cut files this run wrote, the coupling data a DESSEM child needs
    fn cut_file_names(ctx: &StageContext) -> Result<Vec<String>> {
        let extension = Self::case(ctx)?.extension().to_string();
        Ok(vec![
            format!("cortdeco.{extension}"),
            format!("mapcut.{extension}"),
        ])
    }

    fn cleanup(
        ctx: &StageContext,
        input_files: &[String],
        report_files: &[String],
        operation_files: &[String],
        cut_files: &[String],
    ) -> Result<()> {
        let extension = Self::case(ctx)?.extension().to_string();
        let mut keeping: Vec<String> = input_files.to_vec();
        keeping.extend([
            "decomp.tim".to_string(),
            format!("relato.{extension}"),
            format!("sumario.{extension}"),
            format!("relato2.{extension}"),
            format!("inviab_unic.{extension}"),
            format!("inviab.{extension}"),
            format!("relgnl.{extension}"),
            format!("custos.{extension}"),
            "dec_oper_usih.csv".to_string(),
            "dec_oper_usit.csv".to_string(),
            "dec_oper_ree.csv".to_string(),
            "dec_oper_sist.csv".to_string(),
        ]);

        let mut cleaning: Vec<String> = input_files
            .iter()
            .chain(report_files)
            .chain(operation_files)
            .chain(cut_files)
            .filter(|name| !keeping.contains(name))
            .cloned()
            .collect();
        cleaning.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &CLEANUP_PATTERNS,
        )?);
        cleaning.extend([
            "decomp.lic".to_string(),
            format!("cusfut.{extension}"),
            format!("deconf.{extension}"),
            "CONVERG.TMP".to_string(),
        ]);
        info!(count = cleaning.len(), "Cleaning files");
        files::clean_files(ctx.workdir(), &cleaning)
    }
}

#[async_trait]
impl ModelAdapter for Decomp {
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
                let expected = newave::MODEL_NAME.to_uppercase();
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
        run_name_converter(ctx, NAMECAST_PROGRAM).await?;
        info!("Forcing encoding to utf-8");
        files::sanitize_directory(ctx.workdir())?;

        let cut_archive = ctx.path(CUT_FILE);
        if cut_archive.is_file() {
            let members = Self::cut_member_names(ctx)?;
            let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
            let extracted = files::extract_zip(
                &cut_archive,
                ctx.workdir(),
                ExtractFilter::Members(&member_refs),
            )?;
            info!(count = extracted.len(), "Extracted parent cut files");
        }

        let dadger = Self::dadger(ctx)?;
        let study_name = dadger
            .title()
            .ok_or_else(|| Error::Validation("TE register not found in dadger".to_string()))?;
        let study_start = dadger.study_start()?.and_time(NaiveTime::MIN).and_utc();

        let mut entries = Metadata::new();
        entries.insert(
            METADATA_STUDY_STARTING_DATE.to_string(),
            json!(study_start.to_rfc3339()),
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
        let index = Self::index(ctx)?;
        let dadger_name = index.dadger()?.to_string();
        // Read directly instead of through the cache: this stage rewrites
        // the file and a stale cached copy must not survive it
        let mut dadger = Dadger::read(&ctx.path(&dadger_name))?;

        info!(execution_name, "Overwriting study name");
        dadger.set_title(execution_name)?;

        if ctx.path(CUT_HEADER_FILE).is_file() {
            dadger.set_cut_path("NEWV21", CUT_HEADER_FILE)?;
            info!(path = CUT_HEADER_FILE, "Overwriting cut header path");

            let mut monthly: Vec<String> = fs::read_dir(ctx.workdir())?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| name.contains("cortes-"))
                .collect();
            monthly.sort();
            let cut_file = monthly.first().map(String::as_str).unwrap_or(CUT_FULL_FILE);
            dadger.set_cut_path("NEWCUT", cut_file)?;
            info!(path = cut_file, "Overwriting cut path");
        }
        dadger.write(&ctx.path(&dadger_name))
    }

    async fn run(&self, ctx: &StageContext, queue: &str, core_count: u32) -> Result<()> {
        let script = ctx.config().job_script(MODEL_NAME);
        info!(script = %script.display(), "Job script file");
        let scheduler = ctx.scheduler()?;
        let job_id = scheduler
            .submit(queue, core_count, &script, ctx.workdir())
            .await?
            .ok_or_else(|| Error::ExternalTool {
                tool: "sbatch".to_string(),
                message: "submission did not produce a job id".to_string(),
            })?;
        scheduler
            .follow(&job_id, ctx.workdir(), ctx.config().job_timeout())
            .await
    }

    async fn generate_execution_status(
        &self,
        ctx: &StageContext,
        job_id: &str,
    ) -> Result<RunStatus> {
        info!("Reading report files for the status diagnosis");
        let dadger = Self::dadger(ctx)?;
        let relato = Self::relato(ctx)?;
        let inviab_unic = Self::infeasibilities(ctx, "inviab_unic")?;
        let inviab = Self::infeasibilities(ctx, "inviab")?;

        let status = if relato.contains(DATA_ERROR_PATTERN) {
            RunStatus::DataError
        } else if relato.contains(MAX_ITERATIONS_PATTERN) {
            RunStatus::RuntimeError
        } else if Self::indicates_infeasible(&inviab_unic, &dadger)
            || Self::indicates_infeasible(&inviab, &dadger)
        {
            RunStatus::Infeasible
        } else if relato.contains(NEGATIVE_GAP_PATTERN) {
            RunStatus::RuntimeError
        } else if !relato.has_average_marginal_costs() {
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
        let cut_files = Self::cut_file_names(ctx)?;
        archive::compress_files_parallel(ctx.workdir(), &cut_files, "cortes", num_cpus)?;

        Self::cleanup(
            ctx,
            &input_files,
            &report_files,
            &operation_files,
            &cut_files,
        )
    }

    async fn result_upload(&self, ctx: &StageContext, path: &str) -> Result<()> {
        PlatformBridge::set_execution_artifacts_path(path);
        emit_platform_status(ctx)?;
        info!(model = MODEL_NAME, "Uploading results");

        let index = Self::index(ctx)?;
        let echo = vec![
            index.dadger()?.to_string(),
            RAW_DECK_FILE.to_string(),
            PROCESSED_DECK_FILE.to_string(),
        ];
        upload_required(ctx, path, INPUTS_ECHO_PREFIX, &echo).await?;

        let extension = Self::case(ctx)?.extension().to_string();
        let mut outputs = vec![
            format!("inviab_unic.{extension}"),
            format!("inviab.{extension}"),
            format!("relato.{extension}"),
            format!("sumario.{extension}"),
            "decomp.tim".to_string(),
            CUT_FILE.to_string(),
            "relatorios.zip".to_string(),
            "operacao.zip".to_string(),
        ];
        outputs.extend(marker_files(ctx)?);
        upload_present(ctx, path, OUTPUTS_PREFIX, &outputs).await?;

        upload_synthesis(ctx, path).await
    }

    async fn cancel_run(&self, ctx: &StageContext, job_id: &str) -> Result<()> {
        if job_id.is_empty() {
            warn!("No job id to cancel");
            return Ok(());
        }
        let scheduler = ctx.scheduler()?;
        info!(job_id, "Cancelling job");
        scheduler.cancel(job_id).await?;
        scheduler
            .wait_cancelled(job_id, ctx.config().cancel_timeout())
            .await
    }
}
