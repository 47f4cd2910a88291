//! NEWAVE: monthly hydrothermal planning, the head of the execution chain
//!
//! NEWAVE produces the Benders cuts every downstream model couples to. A run
//! can warm-start from a previous NEWAVE execution by reusing its cut, energy
//! scenario and dispatch archives. After the solver finishes, the NWLISTCF
//! and NWLISTOP listing utilities are driven over the outputs so the cut and
//! operation tables ship in readable form; driving them means swapping the
//! deck index for a listing-specific one and restoring it afterwards.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use tracing::{info, warn};

use super::{
    emit_platform_status, fetch_deck, fetch_executables, fetch_parent_artifacts, marker_files,
    record_status, run_name_converter, upload_present, upload_required, upload_synthesis,
    ModelAdapter, StageContext, INPUTS_ECHO_PREFIX, OUTPUTS_PREFIX, PROCESSED_DECK_FILE,
    RAW_DECK_FILE,
};
use crate::archive;
use crate::bridge::PlatformBridge;
use crate::deck::newave::{CaseFile, GeneralData, IndexFile, Pmo};
use crate::deck::read_libs_index;
use crate::error::{Error, Result};
use crate::files::{self, ExtractFilter};
use crate::metadata::{metadata_str, Metadata, METADATA_STUDY_NAME, METADATA_STUDY_STARTING_DATE};
use crate::status::RunStatus;

pub const MODEL_NAME: &str = "newave";

const ENTRY_FILE: &str = "caso.dat";
const NAMECAST_PROGRAM: &str = "ConverteNomesArquivos";
const LICENSE_FILES: [&str; 1] = ["newave.lic"];
const LIBS_INDEX_FILE: &str = "indices.csv";

/// Warm-start archives produced by the parent NEWAVE execution
const CUT_FILE: &str = "cortes.zip";
const RESOURCE_FILE: &str = "recursos.zip";
const SIMULATION_FILE: &str = "simulacao.zip";

const RESOURCE_WARM_START_MEMBERS: [&str; 8] = [
    "engthd.dat",
    "engfiobac.dat",
    "engfio.dat",
    "engfiob.dat",
    "engnat.dat",
    "engcont.dat",
    "vazthd.dat",
    "vazinat.dat",
];
const SIMULATION_WARM_START_MEMBERS: [&str; 1] = ["newdesp.dat"];

const NWLISTCF_PROGRAM: &str = "nwlistcf";
const NWLISTOP_PROGRAM: &str = "nwlistop";
const LISTING_BACKUP_FILE: &str = "arquivos_bkp.dat";
const CUT_LISTING_INDEX_COPY: &str = "arquivos-nwlistcf.dat";
const CUT_LISTING_TIMEOUT: Duration = Duration::from_secs(600);
const OPERATION_TABLES_TIMEOUT: Duration = Duration::from_secs(1200);
const OPERATION_AVERAGES_TIMEOUT: Duration = Duration::from_secs(600);

/// Deck files referenced by fixed name instead of through the index
const INPUT_LITERALS: [&str; 6] = [
    "hidr.dat",
    "postos.dat",
    "vazoes.dat",
    "selcor.dat",
    "dbgcortes.dat",
    "volref_saz.dat",
];

const OPERATION_PATTERNS: [&str; 2] = [r"^.*\.CSV$", r"^.*\.out$"];

const REPORT_LITERALS: [&str; 22] = [
    "nwv_avl_evap.csv",
    "nwv_cortes_evap.csv",
    "nwv_eco_evap.csv",
    "evap_avl_desv.csv",
    "evap_eco.csv",
    "evap_cortes.csv",
    "boots.rel",
    "consultafcf.rel",
    "eco_fpha_.dat",
    "eco_fpha.csv",
    "fpha_eco.csv",
    "fpha_cortes.csv",
    "avl_cortesfpha_nwv.dat",
    "avl_cortesfpha_nwv.csv",
    "parpeol.dat",
    "parpvaz.dat",
    "runtrace.dat",
    "runstate.dat",
    "prociter.rel",
    "CONVERG.TMP",
    "ETAPA.TMP",
    "TAREFA.TMP",
];

const REPORT_PATTERNS: [&str; 6] = [
    r"^alertainv.*\.rel$",
    r"^cativo_.*\.rel$",
    r"^avl_desvfpha.*\.dat$",
    r"^avl_desvfpha.*\.csv$",
    r"^newave_.*\.log$",
    r"^nwv_.*\.rel$",
];

const RESOURCE_PATTERNS: [&str; 50] = [
    r"^energiaf.*\.dat$",
    r"^energiaaf.*\.dat$",
    r"^energiab.*\.dat$",
    r"^energiaxf.*\.dat$",
    r"^energias.*\.dat$",
    r"^energiaxs.*\.dat$",
    r"^energiap.*\.dat$",
    r"^energiaas.*\.csv$",
    r"^energiaasx.*\.csv$",
    r"^energiaf.*\.csv$",
    r"^energiaaf.*\.csv$",
    r"^energiax.*\.csv$",
    r"^energiaxf.*\.csv$",
    r"^energiaxs.*\.csv$",
    r"^energiap.*\.csv$",
    r"^eng.*\.dat$",
    r"^enavazf.*\.dat$",
    r"^enavazxf.*\.dat$",
    r"^enavazxs.*\.dat$",
    r"^enavazb.*\.dat$",
    r"^enavazs.*\.dat$",
    r"^enavazf.*\.csv$",
    r"^enavazxf.*\.csv$",
    r"^enavazaf.*\.csv$",
    r"^enavazb.*\.csv$",
    r"^enavazs.*\.csv$",
    r"^vazaof.*\.dat$",
    r"^vazaoaf.*\.dat$",
    r"^vazaob.*\.dat$",
    r"^vazaos.*\.dat$",
    r"^vazaoas.*\.dat$",
    r"^vazaoxs.*\.dat$",
    r"^vazaoxf.*\.dat$",
    r"^vazaop.*\.dat$",
    r"^vazaof.*\.csv$",
    r"^vazaoaf.*\.csv$",
    r"^vazaob.*\.csv$",
    r"^vazaos.*\.csv$",
    r"^vazthd.*\.dat$",
    r"^vazinat.*\.dat$",
    r"^ventos.*\.dat$",
    r"^vento.*\.csv$",
    r"^eolicaf.*\.dat$",
    r"^eolicab.*\.dat$",
    r"^eolicas.*\.dat$",
    r"^eolp.*\.dat$",
    r"^eolf.*\.csv$",
    r"^eolb.*\.csv$",
    r"^eolp.*\.csv$",
    r"^eols.*\.csv$",
];

const CUT_PATTERNS: [&str; 1] = [r"^cortes\-[0-9]*.*\.dat$"];
const STATE_PATTERNS: [&str; 1] = [r"^cortese\-[0-9]*.*\.dat$"];
const STATE_LITERALS: [&str; 2] = ["cortese.dat", "estados.rel"];
const SIMULATION_LITERALS: [&str; 4] = ["planej.dat", "daduhe.dat", "nwdant.dat", "saida.rel"];

const CLEANUP_PATTERNS: [&str; 2] = [r"^svc.*$", r"^fort\..*"];
const SCRATCH_FILES: [&str; 8] = [
    "nwlistcf.dat",
    "nwlistop.dat",
    "format.tmp",
    "mensag.tmp",
    "NewaveMsgPortug.txt",
    "ConvNomeArqsDados.log",
    "ETAPA.TMP",
    "LEITURA.TMP",
];

pub struct Newave;

impl Newave {
    fn case(ctx: &StageContext) -> Result<Arc<CaseFile>> {
        ctx.cache()
            .get_or_load("caso", || CaseFile::read(&ctx.path(ENTRY_FILE)))
    }

    fn index(ctx: &StageContext) -> Result<Arc<IndexFile>> {
        let case = Self::case(ctx)?;
        let name = case.index_name()?.to_string();
        ctx.cache()
            .get_or_load("arquivos", || IndexFile::read(&ctx.path(&name)))
    }

    fn general_data(ctx: &StageContext) -> Result<Arc<GeneralData>> {
        let index = Self::index(ctx)?;
        let name = index.general_data()?.to_string();
        ctx.cache()
            .get_or_load("dger", || GeneralData::read(&ctx.path(&name)))
    }

    fn pmo(ctx: &StageContext) -> Result<Arc<Pmo>> {
        let index = Self::index(ctx)?;
        let name = index.pmo()?.to_string();
        ctx.cache().get_or_load("pmo", || Pmo::read(&ctx.path(&name)))
    }

    /// Study month a listing stage refers to; negative stages count from the
    /// end of the horizon
    fn listing_month(general: &GeneralData, stage: i32) -> Result<u32> {
        let month = if stage < 0 {
            general.study_years()? as i32 * 12 - (stage + 1)
        } else {
            general.start_month()? as i32 + stage - 1
        };
        Ok(month as u32)
    }

    /// Index file handed to NWLISTCF, pointing the cut roles at the files of
    /// the month being listed
    fn cut_listing_index(cut_month: u32) -> String {
        let lines = [
            "ARQUIVO DE DADOS GERAIS     : nwlistcf.dat".to_string(),
            format!("ARQUIVO DE CORTES DE BENDERS: cortes-{cut_month:03}.dat"),
            "ARQUIVO DE CABECALHO CORTES : cortesh.dat".to_string(),
            "ARQUIVO P/DESPACHO HIDROTERM: newdesp.dat".to_string(),
            format!("ARQUIVO DE ESTADOS CORTES   : cortese-{cut_month:03}.dat"),
            "ARQUIVO DE ENERGIAS FORWARD : energiaf.dat".to_string(),
            "ARQUIVO DE RESTRICOES SAR   : rsar.dat".to_string(),
            "ARQUIVO DE CABECALHO SAR    : rsarh.dat".to_string(),
            "ARQUIVO DE INDICE SAR       : rsari.dat".to_string(),
            "ARQUIVO LISTAGEM CORTES     : nwlistcf.rel".to_string(),
            "ARQUIVO LISTAGEM ESTADOS FCF: estados.rel".to_string(),
            "ARQUIVO LISTAGEM SAR        : rsar.rel".to_string(),
            "ARQUIVO DE ENERGIAS X FORW  : energiaxf.dat".to_string(),
            "ARQUIVO DE VAZAO FORWARD    : vazaof.dat".to_string(),
            "ARQUIVO DE VAZAO X FORWARD  : vazaoxf.dat".to_string(),
        ];
        lines.join("\n") + "\n"
    }

    /// NWLISTCF request file: one month window, one print option per run
    fn cut_listing_request(month: u32, print_option: u32) -> String {
        let lines = [
            " INI FIM FC (FC = 1: IMPRIME TODOS CORTES, FC = 0: IMPRIME APENAS CORTES VALIDOS NA ULTIMA ITERACAO)".to_string(),
            " XXX XXX X".to_string(),
            format!("  {month:02}  {month:02} 1"),
            " OPCOES DE IMPRESSAO : 01 - CORTES FCF  02 - ESTADOS FCF  03 - RESTRICAO SAR".to_string(),
            " XX XX XX (SE 99 CONSIDERA TODAS)".to_string(),
            format!(" {print_option:02}"),
        ];
        lines.join("\n") + "\n"
    }

    /// NWLISTOP request file covering the whole simulated horizon
    fn operation_listing_request(general: &GeneralData, option: u32) -> Result<String> {
        let initial_stage = general.pre_study_years()? * 12 + 1;
        let final_stage = general.study_years()? * 12 + general.post_study_years()? * 12
            - (general.start_month()? - 1);
        info!(
            option,
            initial_stage, final_stage, "Generating the operation listing request"
        );
        let lines = [
            format!(" {option}"),
            "FORWARD  (ARQ. DE DADOS)    : forward.dat".to_string(),
            "FORWARDH (ARQ. CABECALHOS)  : forwarh.dat".to_string(),
            "NEWDESP  (REL. CONFIGS)     : newdesp.dat".to_string(),
            "-----------------------------------------".to_string(),
            " XXX XXX    PERIODOS INICIAL E FINAL".to_string(),
            format!(" {initial_stage:03} {final_stage:03}"),
            " 1-CMO           2-DEFICITS         3-ENA CONTROL.   4-EARM FINAL       5-ENA FIO BRUTA 6-EVAPORACAO    7-VERTIMENTO".to_string(),
            " 8-VAZAO MIN.    9-GER.HIDR.CONT   10-GER. TERMICA  11-INTERCAMBIOS    12-MERC.LIQ.    13-VALOR AGUA   14-VOLUME MORTO".to_string(),
            "15-EXCESSO      16-GHMAX           17-OUTROS USOS   18-BENEF.INT/AGR   19-F.CORR.EC    20-GHTOTAL      21-ENA BRUTA".to_string(),
            "22-ACOPLAMENTO  23-INVASAO CG      24-PENAL.INV.CG. 25-ACIONAMENTO MAR 26-COPER        27-CTERM        28-CDEFICIT".to_string(),
            "29-GER.FIO LIQ. 30-PERDA FIO       31-ENA FIO LIQ.  32- BENEF. GNL     33-VIOL.GHMIN   34-PERDAS       37-GEE             38-SOMA AFL.PAS.".to_string(),
            " XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX (SE 99 CONSIDERA TODAS)".to_string(),
            " 99".to_string(),
            "-----------------------------------------------------------------------------------------------------------------------".to_string(),
            " 1-VOL.ARMAZ       2-GER.HID         3-VOL.TURB.     4-VOL. VERT.      5-VIOL.GHMIN    6-ENCH.MORTO   7-FOLGA DEPMIN.".to_string(),
            " 8-DESV. AGUA      9-DESV. POS.      10-DESVIO NEG.  11-FOLGA FPGHA   12-VAZAO AFL.  13-VAZAO INCREM. 14-VARM PCT.".to_string(),
            " XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX XX (SE 99 CONSIDERA TODAS)".to_string(),
            " 99".to_string(),
            " XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX XXX  (SE 999 CONSIDERA TODAS AS USINAS)".to_string(),
            " 999".to_string(),
        ];
        Ok(lines.join("\n") + "\n")
    }

    /// Runs a listing utility, logging failures without aborting the stage
    async fn run_listing_tool(ctx: &StageContext, program: &str, timeout: Duration) {
        let executable = ctx.executable_dir().join(program);
        info!(program, "Running listing utility");
        match ctx
            .shell(timeout)
            .run(&format!("{} 2>&1", executable.display()))
            .await
        {
            Ok(output) if !output.success() => {
                warn!(program, exit_code = ?output.exit_code, "Listing utility failed");
            }
            Err(error) => warn!(program, %error, "Listing utility could not be run"),
            _ => {}
        }
    }

    /// Lists the second-month cuts and cut states with NWLISTCF
    ///
    /// NWLISTCF reads the deck index under its usual name, so the real index
    /// is parked aside and restored once both print options have run.
    async fn run_cut_listings(ctx: &StageContext) -> Result<()> {
        let case = Self::case(ctx)?;
        let index_name = case.index_name()?.to_string();
        let general = Self::general_data(ctx)?;
        let cut_month = general.start_month()? + 1;
        let listing_month = Self::listing_month(&general, 2)?;

        let index_path = ctx.path(&index_name);
        let backup_path = ctx.path(LISTING_BACKUP_FILE);
        fs::rename(&index_path, &backup_path)?;
        fs::write(&index_path, Self::cut_listing_index(cut_month))?;

        for print_option in [1, 2] {
            fs::write(
                ctx.path("nwlistcf.dat"),
                Self::cut_listing_request(listing_month, print_option),
            )?;
            Self::run_listing_tool(ctx, NWLISTCF_PROGRAM, CUT_LISTING_TIMEOUT).await;
        }

        fs::rename(&index_path, ctx.path(CUT_LISTING_INDEX_COPY))?;
        fs::rename(&backup_path, &index_path)?;
        Ok(())
    }

    /// Tabulates the simulated operation with NWLISTOP
    async fn run_operation_listing(
        ctx: &StageContext,
        option: u32,
        timeout: Duration,
    ) -> Result<()> {
        let general = Self::general_data(ctx)?;
        fs::write(
            ctx.path("nwlistop.dat"),
            Self::operation_listing_request(&general, option)?,
        )?;
        Self::run_listing_tool(ctx, NWLISTOP_PROGRAM, timeout).await;
        Ok(())
    }

    fn input_file_names(ctx: &StageContext) -> Result<Vec<String>> {
        let case = Self::case(ctx)?;
        let index = Self::index(ctx)?;
        let mut names = vec![ENTRY_FILE.to_string(), case.index_name()?.to_string()];
        names.extend(index.input_files().iter().map(|name| name.to_string()));
        names.extend(INPUT_LITERALS.iter().map(|name| name.to_string()));
        if ctx.path(LIBS_INDEX_FILE).is_file() {
            names.push(LIBS_INDEX_FILE.to_string());
            names.extend(read_libs_index(&ctx.path(LIBS_INDEX_FILE))?);
        }
        info!(count = names.len(), "Files considered as input");
        Ok(names)
    }

    fn operation_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let mut names = vec!["nwlistop.dat".to_string()];
        names.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &OPERATION_PATTERNS,
        )?);
        info!(count = names.len(), "Files considered as operation");
        Ok(names)
    }

    fn report_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let index = Self::index(ctx)?;
        let mut names = vec![index.pmo()?.to_string()];
        names.extend(index.parp().map(|name| name.to_string()));
        names.extend(index.final_simulation().map(|name| name.to_string()));
        names.push("newave.tim".to_string());
        names.extend(REPORT_LITERALS.iter().map(|name| name.to_string()));
        names.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &REPORT_PATTERNS,
        )?);
        info!(count = names.len(), "Files considered as report");
        Ok(names)
    }

    fn resource_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let names = files::list_files_by_patterns(ctx.workdir(), input_files, &RESOURCE_PATTERNS)?;
        info!(count = names.len(), "Files considered as resource");
        Ok(names)
    }

    fn cut_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let index = Self::index(ctx)?;
        let mut names = Vec::new();
        names.extend(index.cuts_header().map(|name| name.to_string()));
        names.extend(index.cuts().map(|name| name.to_string()));
        names.push(CUT_LISTING_INDEX_COPY.to_string());
        names.push("nwlistcf.rel".to_string());
        names.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &CUT_PATTERNS,
        )?);
        info!(count = names.len(), "Files considered as cut");
        Ok(names)
    }

    fn state_file_names(ctx: &StageContext, input_files: &[String]) -> Result<Vec<String>> {
        let mut names: Vec<String> = STATE_LITERALS.iter().map(|name| name.to_string()).collect();
        names.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &STATE_PATTERNS,
        )?);
        info!(count = names.len(), "Files considered as cut state");
        Ok(names)
    }

    fn simulation_file_names(ctx: &StageContext) -> Result<Vec<String>> {
        let index = Self::index(ctx)?;
        let mut names = Vec::new();
        names.extend(index.forward().map(|name| name.to_string()));
        names.extend(index.forward_header().map(|name| name.to_string()));
        names.extend(index.dispatch().map(|name| name.to_string()));
        names.extend(SIMULATION_LITERALS.iter().map(|name| name.to_string()));
        info!(count = names.len(), "Files considered as simulation");
        Ok(names)
    }

    /// Deletes everything archived except the run summary reports
    fn cleanup(
        ctx: &StageContext,
        input_files: &[String],
        compressed: &[&[String]],
    ) -> Result<()> {
        let index = Self::index(ctx)?;
        let mut keeping = vec!["newave.tim".to_string(), index.pmo()?.to_string()];
        keeping.extend(index.final_simulation().map(|name| name.to_string()));

        let mut cleaning: Vec<String> = compressed
            .iter()
            .flat_map(|group| group.iter())
            .filter(|name| !keeping.contains(name))
            .cloned()
            .collect();
        cleaning.extend(files::list_files_by_patterns(
            ctx.workdir(),
            input_files,
            &CLEANUP_PATTERNS,
        )?);
        cleaning.extend(SCRATCH_FILES.iter().map(|name| name.to_string()));
        info!(count = cleaning.len(), "Cleaning files");
        files::clean_files(ctx.workdir(), &cleaning)
    }
}

#[async_trait]
impl ModelAdapter for Newave {
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
                let expected = MODEL_NAME.to_uppercase();
                fetch_parent_artifacts(
                    ctx,
                    parent,
                    &expected,
                    &[CUT_FILE, RESOURCE_FILE, SIMULATION_FILE],
                )
                .await?;
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

        let warm_start_archives: [(&str, ExtractFilter); 3] = [
            (CUT_FILE, ExtractFilter::All),
            (
                RESOURCE_FILE,
                ExtractFilter::Members(&RESOURCE_WARM_START_MEMBERS),
            ),
            (
                SIMULATION_FILE,
                ExtractFilter::Members(&SIMULATION_WARM_START_MEMBERS),
            ),
        ];
        for (name, filter) in warm_start_archives {
            let archive_path = ctx.path(name);
            if archive_path.is_file() {
                let extracted = files::extract_zip(&archive_path, ctx.workdir(), filter)?;
                info!(archive = name, count = extracted.len(), "Extracted warm-start files");
            }
        }

        let general = Self::general_data(ctx)?;
        let study_name = general
            .case_name()
            .ok_or_else(|| Error::Validation("NOME DO CASO not found in dger".to_string()))?;
        let start = NaiveDate::from_ymd_opt(general.start_year()?, general.start_month()?, 1)
            .ok_or_else(|| Error::Validation("dger study start date is invalid".to_string()))?;
        let starting_date = start.and_time(NaiveTime::MIN).and_utc().to_rfc3339();

        let mut entries = Metadata::new();
        entries.insert(METADATA_STUDY_STARTING_DATE.to_string(), json!(starting_date));
        entries.insert(METADATA_STUDY_NAME.to_string(), json!(study_name));
        let merged = ctx.update_metadata(entries)?;
        for field in [METADATA_STUDY_STARTING_DATE, METADATA_STUDY_NAME] {
            if let Some(value) = metadata_str(&merged, field) {
                PlatformBridge::set_metadata(field, value);
            }
        }
        Ok(())
    }

    async fn preprocess(&self, ctx: &StageContext, _execution_name: &str) -> Result<()> {
        // Read directly instead of through the cache: this stage rewrites
        // the file and a stale cached copy must not survive it
        let mut case = CaseFile::read(&ctx.path(ENTRY_FILE))?;
        let manager_dir = format!("{}/", ctx.executable_dir().display());
        info!(directory = manager_dir.as_str(), "Pointing the LP process manager");
        case.set_process_manager(&manager_dir);
        case.write(&ctx.path(ENTRY_FILE))
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
        info!("Reading the pmo report for the status diagnosis");
        let pmo = Self::pmo(ctx)?;
        let status = if pmo.has_simulated_operation_costs() {
            RunStatus::Success
        } else {
            RunStatus::DataError
        };
        record_status(ctx, job_id, status)?;
        Ok(status)
    }

    async fn postprocess(&self, ctx: &StageContext) -> Result<()> {
        Self::run_cut_listings(ctx).await?;
        Self::run_operation_listing(ctx, 2, OPERATION_TABLES_TIMEOUT).await?;
        Self::run_operation_listing(ctx, 4, OPERATION_AVERAGES_TIMEOUT).await?;
        Ok(())
    }

    async fn output_compression_and_cleanup(
        &self,
        ctx: &StageContext,
        num_cpus: usize,
    ) -> Result<()> {
        let input_files = Self::input_file_names(ctx)?;
        archive::compress_files(ctx.workdir(), &input_files, "deck")?;

        for subdir in ["out", "evaporacao", "fpha", "log"] {
            files::move_dir_contents_to_root(ctx.workdir(), subdir)?;
        }

        let operation_files = Self::operation_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &operation_files, "operacao", num_cpus)?;
        let report_files = Self::report_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &report_files, "relatorios", num_cpus)?;
        let resource_files = Self::resource_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &resource_files, "recursos", num_cpus)?;
        let cut_files = Self::cut_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &cut_files, "cortes", num_cpus)?;
        let state_files = Self::state_file_names(ctx, &input_files)?;
        archive::compress_files_parallel(ctx.workdir(), &state_files, "estados", num_cpus)?;
        let simulation_files = Self::simulation_file_names(ctx)?;
        archive::compress_files_parallel(ctx.workdir(), &simulation_files, "simulacao", num_cpus)?;

        Self::cleanup(
            ctx,
            &input_files,
            &[
                &input_files,
                &operation_files,
                &report_files,
                &resource_files,
                &cut_files,
                &state_files,
                &simulation_files,
            ],
        )
    }

    async fn result_upload(&self, ctx: &StageContext, path: &str) -> Result<()> {
        PlatformBridge::set_execution_artifacts_path(path);
        emit_platform_status(ctx)?;
        info!(model = MODEL_NAME, "Uploading results");

        let echo = vec![RAW_DECK_FILE.to_string(), PROCESSED_DECK_FILE.to_string()];
        upload_required(ctx, path, INPUTS_ECHO_PREFIX, &echo).await?;

        // The deck index is gone by now; the summary reports kept by the
        // cleanup carry their conventional names
        let mut outputs = vec![
            "newave.tim".to_string(),
            "pmo.dat".to_string(),
            "newave.dat".to_string(),
            "operacao.zip".to_string(),
            "relatorios.zip".to_string(),
            "recursos.zip".to_string(),
            CUT_FILE.to_string(),
            "estados.zip".to_string(),
            SIMULATION_FILE.to_string(),
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
