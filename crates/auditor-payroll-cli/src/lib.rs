//! Command surface for the auditor payroll pipeline.
//!
//! Hosts embed report generation through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_report`] for a parsed `report` invocation.
//! - [`execute_report`] when the caller wants the computed report and
//!   artifacts back instead of console output.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use auditor_payroll_core::{
    build_report, FlatTable, JoinKeyNormalization, MalformedRecordPolicy, PayrollError,
    PayrollReport, PayrollRuleset, ReportHeader, ReportOptions, Stage, StageError,
    DEFAULT_TITLE_PREFIX,
};
use auditor_payroll_export::{
    read_audit_file, read_payee_file, render_report, write_artifacts, RenderedReport,
    ReportArtifacts,
};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "payroll")]
#[command(about = "Auditor payroll report generator")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Report(ReportArgs),
    Ruleset {
        #[command(subcommand)]
        command: RulesetCommand,
    },
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    audit: PathBuf,
    #[arg(long)]
    payees: PathBuf,
    #[arg(long, allow_negative_numbers = true)]
    unit_price: Option<f64>,
    #[arg(long)]
    ruleset: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = JoinKeyArg::Exact)]
    join_key: JoinKeyArg,
    #[arg(long, value_enum, default_value_t = MalformedArg::Abort)]
    on_malformed: MalformedArg,
    #[arg(long, default_value = DEFAULT_TITLE_PREFIX)]
    title_prefix: String,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(long)]
    print: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RulesetCommand {
    Show(RulesetShowArgs),
}

#[derive(Debug, Args)]
pub struct RulesetShowArgs {
    #[arg(long)]
    ruleset: Option<PathBuf>,
    #[arg(long, allow_negative_numbers = true)]
    unit_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JoinKeyArg {
    Exact,
    Trimmed,
    CaseInsensitive,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MalformedArg {
    Abort,
    Exclude,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when configuration loading, any pipeline stage, or
/// artifact output fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Report(args) => run_report(&args),
        Command::Ruleset { command } => run_ruleset(command),
    }
}

/// Runs the pipeline, writes both artifacts and prints a summary.
///
/// # Errors
/// Returns an error when configuration loading, any pipeline stage, or
/// artifact output fails.
pub fn run_report(args: &ReportArgs) -> Result<()> {
    let outcome = execute_report(args)?;

    if args.json {
        let payload = build_report_summary_json_payload(&outcome.report, &outcome.artifacts);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if args.print {
        print_report_table(&outcome.report.header, &outcome.rendered.flat);
    }
    print_report_summary(&outcome.report, &outcome.artifacts);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub report: PayrollReport,
    pub rendered: RenderedReport,
    pub artifacts: ReportArtifacts,
}

/// Loads both inputs, computes the report, and writes the artifacts. Nothing
/// is written unless every stage succeeds.
///
/// # Errors
/// Returns an error tagged with the failing stage.
pub fn execute_report(args: &ReportArgs) -> Result<ReportOutcome> {
    let ruleset = load_ruleset(args.ruleset.as_deref(), args.unit_price)?;
    let options = ReportOptions {
        join_key: map_join_key(args.join_key),
        malformed_policy: map_malformed(args.on_malformed),
        title_prefix: args.title_prefix.clone(),
    };
    tracing::info!(
        audit = %args.audit.display(),
        payees = %args.payees.display(),
        unit_price = ruleset.unit_price,
        join_key = ?options.join_key,
        malformed_policy = ?options.malformed_policy,
        "generating payroll report"
    );

    let audit = read_audit_file(&args.audit)?;
    let payees = read_payee_file(&args.payees)?;
    let report = build_report(&audit, &payees, &ruleset, &options)?;
    let rendered = render_report(&report)?;
    let artifacts = write_artifacts(&args.out_dir, &rendered)?;

    Ok(ReportOutcome {
        report,
        rendered,
        artifacts,
    })
}

fn run_ruleset(command: RulesetCommand) -> Result<()> {
    match command {
        RulesetCommand::Show(args) => {
            let ruleset = load_ruleset(args.ruleset.as_deref(), args.unit_price)?;
            println!("{}", serde_json::to_string_pretty(&ruleset)?);
            Ok(())
        }
    }
}

/// Resolves the effective ruleset: the JSON file when given, else
/// [`PayrollRuleset::v1`], with `unit_price` overriding either. Failures are
/// configure-stage errors.
fn load_ruleset(path: Option<&Path>, unit_price: Option<f64>) -> Result<PayrollRuleset> {
    let ruleset = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|err| {
                configure_error(PayrollError::Input(format!(
                    "failed to read ruleset {}: {err}",
                    path.display()
                )))
            })?;
            parse_ruleset_json(&raw)?
        }
        None => PayrollRuleset::v1(),
    };

    match unit_price {
        Some(value) => ruleset.with_unit_price(value).map_err(|err| match err {
            PayrollError::Configuration(message) => configure_error(PayrollError::Configuration(
                format!("invalid --unit-price value {value}: {message}"),
            )),
            other => configure_error(other),
        }),
        None => Ok(ruleset),
    }
}

fn parse_ruleset_json(raw: &str) -> Result<PayrollRuleset> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|err| {
        configure_error(PayrollError::Configuration(format!(
            "ruleset must be valid JSON: {err}"
        )))
    })?;
    PayrollRuleset::from_json(&value).map_err(configure_error)
}

fn configure_error(source: PayrollError) -> anyhow::Error {
    StageError::new(Stage::Configure, source).into()
}

fn map_join_key(value: JoinKeyArg) -> JoinKeyNormalization {
    match value {
        JoinKeyArg::Exact => JoinKeyNormalization::Exact,
        JoinKeyArg::Trimmed => JoinKeyNormalization::Trimmed,
        JoinKeyArg::CaseInsensitive => JoinKeyNormalization::CaseInsensitive,
    }
}

fn map_malformed(value: MalformedArg) -> MalformedRecordPolicy {
    match value {
        MalformedArg::Abort => MalformedRecordPolicy::Abort,
        MalformedArg::Exclude => MalformedRecordPolicy::Exclude,
    }
}

fn print_report_table(header: &ReportHeader, table: &FlatTable) {
    let widths = (0..table.headers.len())
        .map(|index| {
            table
                .rows
                .iter()
                .filter_map(|row| row.get(index))
                .chain(std::iter::once(&table.headers[index]))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();
    let line_width = widths.iter().sum::<usize>() + widths.len().saturating_sub(1) * 2;

    println!("{}", header.title);
    println!("[{}]", header.date_range);
    println!("{}", format_table_line(&table.headers, &widths));
    println!("{}", "-".repeat(line_width));
    for row in &table.rows {
        println!("{}", format_table_line(row, &widths));
    }
}

fn format_table_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

fn print_report_summary(report: &PayrollReport, artifacts: &ReportArtifacts) {
    println!(
        "title=\"{}\" auditors={} unit_price={} actual_payable={}",
        report.header.title,
        report.rows.len(),
        report.ruleset.unit_price,
        auditor_payroll_core::format_money(report.total.actual_payable)
    );
    if !report.excluded.is_empty() {
        let formatted = report
            .excluded
            .iter()
            .map(|item| format!("row {}: {}", item.row, item.reason))
            .collect::<Vec<_>>()
            .join(" | ");
        println!("excluded={formatted}");
    }
    if !report.duplicate_payees.is_empty() {
        println!("duplicate_payees={}", report.duplicate_payees.join(","));
    }
    println!("csv={}", artifacts.csv_path.display());
    println!("xlsx={}", artifacts.xlsx_path.display());
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ReportSummaryJsonPayload {
    contract_version: String,
    title: String,
    date_range: String,
    ruleset: PayrollRuleset,
    auditors: usize,
    totals: ReportTotalsJson,
    excluded_rows: Vec<usize>,
    duplicate_payees: Vec<String>,
    csv_path: String,
    xlsx_path: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ReportTotalsJson {
    audited_visits: u64,
    re_audited_visits: u64,
    mismatch_percent: String,
    max_payable: f64,
    actual_payable: f64,
}

fn build_report_summary_json_payload(
    report: &PayrollReport,
    artifacts: &ReportArtifacts,
) -> ReportSummaryJsonPayload {
    ReportSummaryJsonPayload {
        contract_version: "payroll_report.v1".to_string(),
        title: report.header.title.clone(),
        date_range: report.header.date_range.clone(),
        ruleset: report.ruleset.clone(),
        auditors: report.rows.len(),
        totals: ReportTotalsJson {
            audited_visits: report.total.audited_visits,
            re_audited_visits: report.total.re_audited_visits,
            mismatch_percent: auditor_payroll_core::format_percent(report.total.mismatch_rate),
            max_payable: report.total.max_payable,
            actual_payable: report.total.actual_payable,
        },
        excluded_rows: report.excluded.iter().map(|item| item.row).collect(),
        duplicate_payees: report.duplicate_payees.clone(),
        csv_path: artifacts.csv_path.display().to_string(),
        xlsx_path: artifacts.xlsx_path.display().to_string(),
    }
}
