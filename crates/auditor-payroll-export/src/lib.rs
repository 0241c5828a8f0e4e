//! File-facing adapters around `auditor-payroll-core`: CSV and xlsx ingestion
//! into [`RawTable`]s and the two report artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use auditor_payroll_core::{
    flat_table, sheet_layout, FlatTable, PayrollError, PayrollReport, RawTable, Stage,
    StageError, PAYEE_HEADER_ROW_INDEX,
};

mod spreadsheet;
mod workbook;

pub use spreadsheet::read_audit_xlsx;
pub use workbook::render_workbook;

pub const FLAT_TABLE_FILE_NAME: &str = "combined_auditor_performance.csv";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn ingest_error(message: String) -> anyhow::Error {
    StageError::new(Stage::Ingest, PayrollError::Input(message)).into()
}

/// Reads CSV bytes into a [`RawTable`], skipping `skip_rows` records before
/// the header. Records whose every cell is blank are dropped.
///
/// # Errors
/// Returns an ingest-stage error when the CSV is malformed or holds no header.
pub fn read_csv_table(bytes: &[u8], skip_rows: usize) -> Result<RawTable> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records().skip(skip_rows);
    let headers = match records.next() {
        Some(record) => record
            .map_err(|err| ingest_error(format!("unreadable CSV header: {err}")))?
            .iter()
            .map(|cell| cell.trim().to_string())
            .collect::<Vec<_>>(),
        None => {
            return Err(ingest_error(format!(
                "CSV has no header row after skipping {skip_rows} row(s)"
            )))
        }
    };

    let mut rows = Vec::new();
    for (offset, record) in records.enumerate() {
        let record = record.map_err(|err| {
            ingest_error(format!("unreadable CSV data row {}: {err}", offset + 1))
        })?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(ToString::to_string).collect());
    }

    tracing::debug!(columns = headers.len(), rows = rows.len(), "read CSV table");
    Ok(RawTable::new(headers, rows))
}

/// Reads an audit export; the header is the first record.
///
/// # Errors
/// Returns an ingest-stage error when the CSV cannot be read.
pub fn read_audit_csv(bytes: &[u8]) -> Result<RawTable> {
    read_csv_table(bytes, 0)
}

/// Reads a payee directory export, whose real header sits below two banner
/// rows.
///
/// # Errors
/// Returns an ingest-stage error when the CSV cannot be read.
pub fn read_payee_csv(bytes: &[u8]) -> Result<RawTable> {
    read_csv_table(bytes, PAYEE_HEADER_ROW_INDEX)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| ingest_error(format!("failed to read {}: {err}", path.display())))
}

/// Reads an audit export from disk. `.xlsx` and `.xlsm` files go through
/// [`read_audit_xlsx`]; anything else is read as CSV.
///
/// # Errors
/// Returns an ingest-stage error when the file cannot be read or parsed.
pub fn read_audit_file(path: &Path) -> Result<RawTable> {
    let bytes = read_file(path)?;
    if is_workbook(path) {
        read_audit_xlsx(&bytes)
    } else {
        read_audit_csv(&bytes)
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xlsm"))
}

/// # Errors
/// Returns an ingest-stage error when the file cannot be read or parsed.
pub fn read_payee_file(path: &Path) -> Result<RawTable> {
    read_payee_csv(&read_file(path)?)
}

/// Serializes the flat table as comma-delimited UTF-8.
///
/// # Errors
/// Returns an error when the CSV writer fails.
pub fn flat_table_csv(table: &FlatTable) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.headers)
        .context("failed to write CSV header")?;
    for row in &table.rows {
        writer.write_record(row).context("failed to write CSV row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush CSV buffer: {err}"))
}

/// Both artifacts, fully materialized in memory.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub flat: FlatTable,
    pub csv: Vec<u8>,
    pub xlsx: Vec<u8>,
    pub xlsx_file_name: String,
}

/// Renders the flat table and the workbook from one computed report.
///
/// # Errors
/// Returns a materialize-stage error when either artifact cannot be built.
pub fn render_report(report: &PayrollReport) -> Result<RenderedReport> {
    let flat = flat_table(report);
    let csv = flat_table_csv(&flat).map_err(|err| materialize_error(&err))?;
    let xlsx = render_workbook(&sheet_layout(report)).map_err(|err| materialize_error(&err))?;

    Ok(RenderedReport {
        flat,
        csv,
        xlsx,
        xlsx_file_name: format!("{}.xlsx", report.header.file_stem()),
    })
}

fn materialize_error(err: &anyhow::Error) -> anyhow::Error {
    StageError::new(Stage::Materialize, PayrollError::Render(format!("{err:#}"))).into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub csv_path: PathBuf,
    pub xlsx_path: PathBuf,
}

/// Writes both rendered artifacts into `out_dir`, creating it when needed.
///
/// # Errors
/// Returns an error when the directory or either file cannot be written.
pub fn write_artifacts(out_dir: &Path, rendered: &RenderedReport) -> Result<ReportArtifacts> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    let csv_path = out_dir.join(FLAT_TABLE_FILE_NAME);
    fs::write(&csv_path, &rendered.csv)
        .with_context(|| format!("failed to write {}", csv_path.display()))?;

    let xlsx_path = out_dir.join(&rendered.xlsx_file_name);
    fs::write(&xlsx_path, &rendered.xlsx)
        .with_context(|| format!("failed to write {}", xlsx_path.display()))?;

    tracing::info!(
        csv = %csv_path.display(),
        xlsx = %xlsx_path.display(),
        "wrote report artifacts"
    );

    Ok(ReportArtifacts {
        csv_path,
        xlsx_path,
    })
}
