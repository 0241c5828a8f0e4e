//! Payroll computation for field auditors.
//!
//! The pipeline runs as a fixed sequence of stages, each returning a new value:
//! [`normalize_audit`] → [`aggregate_visits`] → [`calculate_payroll_rows`] →
//! [`merge_payees`] → [`grand_total`]. [`build_report`] drives the whole chain
//! and tags any failure with the [`Stage`] that produced it. Rendering lives in
//! [`flat_table`] and [`sheet_layout`], which both read the same
//! [`PayrollReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::Date;

mod display;
mod sheet;

pub use display::{
    flat_table, format_count, format_money, format_percent, format_plain, format_unit_price,
    round_half_away, Column, FlatTable, COLUMNS,
};
pub use sheet::{
    data_row_formulas, sheet_layout, total_row_formulas, CellRole, CellValue, MergedRange,
    RowFormulas, RowKind, SheetCell, SheetLayout, SheetRow, FIRST_DATA_ROW, GROUP_LABEL_ROW,
    MISMATCH_GROUP_LABEL,
};

pub const GRAND_TOTAL_LABEL: &str = "GRAND TOTAL";
pub const DEFAULT_TITLE_PREFIX: &str = "GP GLM Auditor's Salary";
pub const DATE_NOT_FOUND: &str = "Visit Date: [Date Not Found]";

pub const AUDITOR_COLUMN: &str = "assigned_to";
pub const VISIT_ID_COLUMN: &str = "visit_id";
pub const RE_AUDITED_COLUMN: &str = "re_audited";
pub const MISMATCH_COLUMN: &str = "mismatch_found_in_reaudit";

pub const PAYEE_AUDITOR_COLUMN: &str = "Auditor Name";
pub const PAYEE_FULL_NAME_COLUMN: &str = "Full Name";
pub const PAYEE_MFS_NUMBER_COLUMN: &str = "MFS Number";
pub const PAYEE_MFS_PROVIDER_COLUMN: &str = "MFS Provider";
/// Number of leading rows in a payee directory export before the real header.
pub const PAYEE_HEADER_ROW_INDEX: usize = 2;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PayrollError {
    #[error("input error: {0}")]
    Input(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("type coercion error: {0}")]
    Coercion(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("render error: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configure,
    Ingest,
    Normalize,
    Aggregate,
    Calculate,
    Merge,
    Materialize,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Ingest => "ingest",
            Self::Normalize => "normalize",
            Self::Aggregate => "aggregate",
            Self::Calculate => "calculate",
            Self::Merge => "merge",
            Self::Materialize => "materialize",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "configure" => Some(Self::Configure),
            "ingest" => Some(Self::Ingest),
            "normalize" => Some(Self::Normalize),
            "aggregate" => Some(Self::Aggregate),
            "calculate" => Some(Self::Calculate),
            "merge" => Some(Self::Merge),
            "materialize" => Some(Self::Materialize),
            _ => None,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline failure tagged with the stage that raised it.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PayrollError,
}

impl StageError {
    #[must_use]
    pub fn new(stage: Stage, source: PayrollError) -> Self {
        Self { stage, source }
    }
}

/// How auditor names are compared when joining payroll rows with the payee
/// directory.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JoinKeyNormalization {
    #[default]
    Exact,
    Trimmed,
    CaseInsensitive,
}

impl JoinKeyNormalization {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Trimmed => "trimmed",
            Self::CaseInsensitive => "case_insensitive",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "trimmed" => Some(Self::Trimmed),
            "case_insensitive" => Some(Self::CaseInsensitive),
            _ => None,
        }
    }

    #[must_use]
    pub fn key(self, name: &str) -> String {
        match self {
            Self::Exact => name.to_string(),
            Self::Trimmed => name.trim().to_string(),
            Self::CaseInsensitive => name.trim().to_lowercase(),
        }
    }
}

/// What to do with an audit record whose required fields cannot be coerced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRecordPolicy {
    #[default]
    Abort,
    Exclude,
}

impl MalformedRecordPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Exclude => "exclude",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "abort" => Some(Self::Abort),
            "exclude" => Some(Self::Exclude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportOptions {
    pub join_key: JoinKeyNormalization,
    pub malformed_policy: MalformedRecordPolicy,
    pub title_prefix: String,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            join_key: JoinKeyNormalization::Exact,
            malformed_policy: MalformedRecordPolicy::Abort,
            title_prefix: DEFAULT_TITLE_PREFIX.to_string(),
        }
    }
}

/// Versioned payroll constants. The fixed and variable shares are split
/// points of the maximum payable amount; only the variable share is scaled by
/// audit quality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayrollRuleset {
    pub ruleset_version: u32,
    pub unit_price: f64,
    pub fixed_share: f64,
    pub variable_share: f64,
}

impl PayrollRuleset {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            unit_price: 3.0,
            fixed_share: 0.75,
            variable_share: 0.25,
        }
    }

    /// Validates unit price and share bounds.
    ///
    /// # Errors
    /// Returns [`PayrollError::Configuration`] when the unit price is negative
    /// or non-finite, a share is outside `[0.0, 1.0]`, or the shares do not sum
    /// to one.
    pub fn validate(&self) -> Result<(), PayrollError> {
        if self.ruleset_version == 0 {
            return Err(PayrollError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(PayrollError::Configuration(
                "unit_price MUST be a finite number >= 0".to_string(),
            ));
        }

        for (name, value) in [
            ("fixed_share", self.fixed_share),
            ("variable_share", self.variable_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PayrollError::Configuration(format!(
                    "{name} MUST be in [0.0, 1.0]"
                )));
            }
        }

        if ((self.fixed_share + self.variable_share) - 1.0).abs() > 1e-9 {
            return Err(PayrollError::Configuration(
                "fixed_share + variable_share MUST equal 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns a copy with a different unit price, validated.
    ///
    /// # Errors
    /// Returns [`PayrollError::Configuration`] when the resulting ruleset is
    /// invalid.
    pub fn with_unit_price(&self, unit_price: f64) -> Result<Self, PayrollError> {
        let ruleset = Self {
            unit_price,
            ..self.clone()
        };
        ruleset.validate()?;
        Ok(ruleset)
    }

    /// Decodes and validates a ruleset from JSON.
    ///
    /// # Errors
    /// Returns [`PayrollError::Configuration`] when JSON decoding fails
    /// or decoded values violate ruleset constraints.
    pub fn from_json(value: &Value) -> Result<Self, PayrollError> {
        let ruleset: Self = serde_json::from_value(value.clone()).map_err(|err| {
            PayrollError::Configuration(format!("invalid ruleset JSON payload: {err}"))
        })?;
        ruleset.validate()?;
        Ok(ruleset)
    }
}

/// An in-memory table as handed over by an ingestion adapter: one header row
/// and string cells. Rows may be ragged; missing cells read as blank.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header.trim() == name)
    }

    /// Locates a required column.
    ///
    /// # Errors
    /// Returns [`PayrollError::Schema`] naming the table and column when the
    /// header is absent.
    pub fn require_column(&self, table: &str, name: &str) -> Result<usize, PayrollError> {
        self.column_index(name).ok_or_else(|| {
            PayrollError::Schema(format!("{table} table is missing required column `{name}`"))
        })
    }

    /// First column whose header contains `needle`, compared case-insensitively.
    #[must_use]
    pub fn find_column_containing(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        self.headers
            .iter()
            .position(|header| header.to_lowercase().contains(&needle))
    }

    #[must_use]
    pub fn cell(row: &[String], index: usize) -> &str {
        row.get(index).map_or("", String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitRecord {
    pub auditor: String,
    pub visit_id: String,
    pub re_audited: bool,
    pub mismatch_found_in_reaudit: bool,
    pub visit_date: Option<Date>,
}

/// An audit row dropped under [`MalformedRecordPolicy::Exclude`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludedRecord {
    /// 1-based data row number, not counting the header.
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportHeader {
    pub title: String,
    pub date_range: String,
    pub first_visit: Option<Date>,
    pub last_visit: Option<Date>,
}

impl ReportHeader {
    #[must_use]
    pub fn placeholder(title_prefix: &str) -> Self {
        Self {
            title: title_prefix.to_string(),
            date_range: DATE_NOT_FOUND.to_string(),
            first_visit: None,
            last_visit: None,
        }
    }

    /// Builds the title from the span of visit dates, falling back to the
    /// placeholder when there are none.
    #[must_use]
    pub fn from_dates<I>(title_prefix: &str, dates: I) -> Self
    where
        I: IntoIterator<Item = Date>,
    {
        let mut span: Option<(Date, Date)> = None;
        for date in dates {
            span = Some(match span {
                None => (date, date),
                Some((first, last)) => (first.min(date), last.max(date)),
            });
        }

        let Some((first, last)) = span else {
            return Self::placeholder(title_prefix);
        };

        Self {
            title: format!("{title_prefix}- {}'{}", last.month(), last.year()),
            date_range: format!(
                "Visit Date: {} to {}",
                format_long_date(first),
                format_long_date(last)
            ),
            first_visit: Some(first),
            last_visit: Some(last),
        }
    }

    /// File stem for exported artifacts: runs of anything other than ASCII
    /// letters and digits collapse to a single underscore.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.title.len());
        let mut pending_separator = false;
        for ch in self.title.chars() {
            if ch.is_ascii_alphanumeric() {
                if pending_separator && !stem.is_empty() {
                    stem.push('_');
                }
                pending_separator = false;
                stem.push(ch);
            } else {
                pending_separator = true;
            }
        }

        if stem.is_empty() {
            "payroll_report".to_string()
        } else {
            stem
        }
    }
}

fn format_long_date(date: Date) -> String {
    format!("{:02}-{}-{}", date.day(), date.month(), date.year())
}

/// Parses the date forms seen in audit exports: ISO dates, ISO date-times
/// with a `T` or space separator, and month-first `M/D/YYYY`.
#[must_use]
pub fn parse_visit_date(raw: &str) -> Option<Date> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(prefix) = value.get(..10) {
        let rest = &value[10..];
        if rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ') {
            if let Ok(date) = Date::parse(prefix, format_description!("[year]-[month]-[day]")) {
                return Some(date);
            }
        }
    }

    let first_token = value.split_whitespace().next().unwrap_or_default();
    Date::parse(
        first_token,
        format_description!("[month padding:none]/[day padding:none]/[year]"),
    )
    .ok()
}

/// Coerces a boolean-like cell. Blank cells read as `false`.
#[must_use]
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "no" | "n" | "f" | "0" | "0.0" => Some(false),
        "true" | "yes" | "y" | "t" | "1" | "1.0" => Some(true),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedAudit {
    pub records: Vec<VisitRecord>,
    pub excluded: Vec<ExcludedRecord>,
    pub date_column: Option<String>,
    pub header: ReportHeader,
}

/// Coerces raw audit rows into [`VisitRecord`]s and derives the report header.
///
/// # Errors
/// Returns [`PayrollError::Schema`] when a required column is absent and
/// [`PayrollError::Coercion`] for the first malformed record when the policy
/// is [`MalformedRecordPolicy::Abort`].
pub fn normalize_audit(
    table: &RawTable,
    options: &ReportOptions,
) -> Result<NormalizedAudit, PayrollError> {
    let auditor_idx = table.require_column("audit", AUDITOR_COLUMN)?;
    let visit_idx = table.require_column("audit", VISIT_ID_COLUMN)?;
    let re_audited_idx = table.require_column("audit", RE_AUDITED_COLUMN)?;
    let mismatch_idx = table.require_column("audit", MISMATCH_COLUMN)?;
    let date_idx = table.find_column_containing("date");

    let mut records = Vec::with_capacity(table.rows.len());
    let mut excluded = Vec::new();
    let mut raw_dates = Vec::with_capacity(table.rows.len());

    for (offset, row) in table.rows.iter().enumerate() {
        let row_number = offset + 1;
        match coerce_record(row, auditor_idx, visit_idx, re_audited_idx, mismatch_idx) {
            Ok(record) => {
                raw_dates.push(date_idx.map_or("", |idx| RawTable::cell(row, idx)));
                records.push(record);
            }
            Err(reason) => match options.malformed_policy {
                MalformedRecordPolicy::Abort => {
                    return Err(PayrollError::Coercion(format!("row {row_number}: {reason}")));
                }
                MalformedRecordPolicy::Exclude => {
                    tracing::warn!(row = row_number, %reason, "excluding malformed audit record");
                    excluded.push(ExcludedRecord {
                        row: row_number,
                        reason,
                    });
                }
            },
        }
    }

    let date_column = date_idx.map(|idx| table.headers[idx].clone());
    let dates = parse_date_column(&raw_dates);
    if let Some(dates) = dates {
        for (record, date) in records.iter_mut().zip(dates) {
            record.visit_date = date;
        }
    } else if let Some(column) = &date_column {
        tracing::warn!(
            column = %column,
            "visit dates could not be parsed; using placeholder header"
        );
    }

    let header = ReportHeader::from_dates(
        &options.title_prefix,
        records.iter().filter_map(|record| record.visit_date),
    );

    tracing::debug!(
        records = records.len(),
        excluded = excluded.len(),
        date_column = ?date_column,
        "normalized audit records"
    );

    Ok(NormalizedAudit {
        records,
        excluded,
        date_column,
        header,
    })
}

fn coerce_record(
    row: &[String],
    auditor_idx: usize,
    visit_idx: usize,
    re_audited_idx: usize,
    mismatch_idx: usize,
) -> Result<VisitRecord, String> {
    let auditor = RawTable::cell(row, auditor_idx);
    if auditor.trim().is_empty() {
        return Err(format!("`{AUDITOR_COLUMN}` is blank"));
    }

    let visit_id = RawTable::cell(row, visit_idx);
    if visit_id.trim().is_empty() {
        return Err(format!("`{VISIT_ID_COLUMN}` is blank"));
    }

    let re_audited = coerce_flag(row, re_audited_idx, RE_AUDITED_COLUMN)?;
    let mismatch_found_in_reaudit = coerce_flag(row, mismatch_idx, MISMATCH_COLUMN)?;

    Ok(VisitRecord {
        auditor: auditor.to_string(),
        visit_id: visit_id.trim().to_string(),
        re_audited,
        mismatch_found_in_reaudit,
        visit_date: None,
    })
}

fn coerce_flag(row: &[String], index: usize, column: &str) -> Result<bool, String> {
    let raw = RawTable::cell(row, index);
    parse_flag(raw).ok_or_else(|| format!("`{column}` value `{raw}` is not a boolean"))
}

/// All-or-nothing date parse: a single unreadable non-blank value discards
/// the whole column.
fn parse_date_column(raw_dates: &[&str]) -> Option<Vec<Option<Date>>> {
    raw_dates
        .iter()
        .map(|raw| {
            if raw.trim().is_empty() {
                Some(None)
            } else {
                parse_visit_date(raw).map(Some)
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditorAggregate {
    pub auditor: String,
    pub audited_visits: u64,
    pub re_audited_visits: u64,
    pub mismatch_no: u64,
    pub mismatch_yes: u64,
}

impl AuditorAggregate {
    #[must_use]
    pub fn mismatch_rate(&self) -> f64 {
        mismatch_rate(self.mismatch_yes, self.re_audited_visits)
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mismatch_rate(mismatch_yes: u64, re_audited_visits: u64) -> f64 {
    if re_audited_visits == 0 {
        return 0.0;
    }
    mismatch_yes as f64 / re_audited_visits as f64
}

#[derive(Default)]
struct VisitTally<'a> {
    visit_ids: BTreeSet<&'a str>,
    re_audited: u64,
    mismatch_no: u64,
    mismatch_yes: u64,
}

/// Groups visit records by auditor, one aggregate per auditor observed,
/// ordered by auditor name.
#[must_use]
pub fn aggregate_visits(records: &[VisitRecord]) -> Vec<AuditorAggregate> {
    let mut tallies: BTreeMap<&str, VisitTally<'_>> = BTreeMap::new();
    for record in records {
        let tally = tallies.entry(record.auditor.as_str()).or_default();
        tally.visit_ids.insert(record.visit_id.as_str());
        if record.re_audited {
            tally.re_audited += 1;
            if record.mismatch_found_in_reaudit {
                tally.mismatch_yes += 1;
            } else {
                tally.mismatch_no += 1;
            }
        }
    }

    tallies
        .into_iter()
        .map(|(auditor, tally)| AuditorAggregate {
            auditor: auditor.to_string(),
            audited_visits: tally.visit_ids.len() as u64,
            re_audited_visits: tally.re_audited,
            mismatch_no: tally.mismatch_no,
            mismatch_yes: tally.mismatch_yes,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayrollRow {
    #[serde(flatten)]
    pub aggregate: AuditorAggregate,
    pub mismatch_rate: f64,
    pub unit_price: f64,
    pub max_payable: f64,
    pub fixed_pay: f64,
    pub variable_pay: f64,
    pub actual_payable: f64,
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_payroll(aggregate: &AuditorAggregate, ruleset: &PayrollRuleset) -> PayrollRow {
    let mismatch_rate = aggregate.mismatch_rate();
    let max_payable = aggregate.audited_visits as f64 * ruleset.unit_price;
    let fixed_pay = max_payable * ruleset.fixed_share;
    let variable_pay = max_payable * ruleset.variable_share * (1.0 - mismatch_rate);

    PayrollRow {
        aggregate: aggregate.clone(),
        mismatch_rate,
        unit_price: ruleset.unit_price,
        max_payable,
        fixed_pay,
        variable_pay,
        actual_payable: fixed_pay + variable_pay,
    }
}

/// Applies one validated ruleset to every aggregate.
///
/// # Errors
/// Returns [`PayrollError::Configuration`] when the ruleset is invalid.
pub fn calculate_payroll_rows(
    aggregates: &[AuditorAggregate],
    ruleset: &PayrollRuleset,
) -> Result<Vec<PayrollRow>, PayrollError> {
    ruleset.validate()?;
    Ok(aggregates
        .iter()
        .map(|aggregate| calculate_payroll(aggregate, ruleset))
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayeeInfo {
    pub auditor: String,
    pub full_name: String,
    pub mfs_number: String,
    pub mfs_provider: String,
}

/// Canonical MFS number: numeric values gain a leading zero, values already
/// starting with `0` pass through, blanks become empty.
#[must_use]
pub fn normalize_mfs_number(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return String::new();
    }

    if value.starts_with('0') {
        return value.to_string();
    }

    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        return format!("0{value}");
    }

    match value.parse::<f64>() {
        Ok(number) if number.is_finite() && number >= 0.0 && number.fract() == 0.0 => {
            format!("0{number:.0}")
        }
        _ => value.to_string(),
    }
}

/// Reads payee directory rows. Blank auditor names are skipped since they can
/// never join.
///
/// # Errors
/// Returns [`PayrollError::Schema`] when a required column is absent.
pub fn normalize_payees(table: &RawTable) -> Result<Vec<PayeeInfo>, PayrollError> {
    let auditor_idx = table.require_column("payee", PAYEE_AUDITOR_COLUMN)?;
    let full_name_idx = table.require_column("payee", PAYEE_FULL_NAME_COLUMN)?;
    let number_idx = table.require_column("payee", PAYEE_MFS_NUMBER_COLUMN)?;
    let provider_idx = table.require_column("payee", PAYEE_MFS_PROVIDER_COLUMN)?;

    Ok(table
        .rows
        .iter()
        .filter(|row| !RawTable::cell(row, auditor_idx).trim().is_empty())
        .map(|row| PayeeInfo {
            auditor: RawTable::cell(row, auditor_idx).to_string(),
            full_name: RawTable::cell(row, full_name_idx).trim().to_string(),
            mfs_number: normalize_mfs_number(RawTable::cell(row, number_idx)),
            mfs_provider: RawTable::cell(row, provider_idx).trim().to_string(),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportRow {
    pub serial: usize,
    pub payroll: PayrollRow,
    pub payee: Option<PayeeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeOutcome {
    pub rows: Vec<ReportRow>,
    /// Directory entries ignored because an earlier entry had the same key.
    pub duplicate_payees: Vec<String>,
}

/// Left outer join of payroll rows with the payee directory. Serial numbers
/// are assigned `1..=N` in payroll row order.
#[must_use]
pub fn merge_payees(
    payroll: &[PayrollRow],
    payees: &[PayeeInfo],
    join_key: JoinKeyNormalization,
) -> MergeOutcome {
    let mut directory: BTreeMap<String, &PayeeInfo> = BTreeMap::new();
    let mut duplicate_payees = Vec::new();
    for payee in payees {
        let key = join_key.key(&payee.auditor);
        if directory.contains_key(&key) {
            tracing::warn!(auditor = %payee.auditor, "duplicate payee directory entry ignored");
            duplicate_payees.push(payee.auditor.clone());
        } else {
            directory.insert(key, payee);
        }
    }

    let rows = payroll
        .iter()
        .enumerate()
        .map(|(offset, row)| ReportRow {
            serial: offset + 1,
            payroll: row.clone(),
            payee: directory
                .get(&join_key.key(&row.aggregate.auditor))
                .map(|payee| (*payee).clone()),
        })
        .collect::<Vec<_>>();

    let unmatched = rows.iter().filter(|row| row.payee.is_none()).count();
    tracing::debug!(rows = rows.len(), unmatched, "merged payee directory");

    MergeOutcome {
        rows,
        duplicate_payees,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TotalRow {
    pub audited_visits: u64,
    pub re_audited_visits: u64,
    pub mismatch_no: u64,
    pub mismatch_yes: u64,
    pub mismatch_rate: f64,
    pub max_payable: f64,
    pub fixed_pay: f64,
    pub variable_pay: f64,
    pub actual_payable: f64,
}

/// Column sums over the report rows. The mismatch rate is re-derived from the
/// summed counts rather than averaged.
#[must_use]
pub fn grand_total(rows: &[ReportRow]) -> TotalRow {
    let mut total = rows.iter().fold(TotalRow::default(), |mut acc, row| {
        let payroll = &row.payroll;
        acc.audited_visits += payroll.aggregate.audited_visits;
        acc.re_audited_visits += payroll.aggregate.re_audited_visits;
        acc.mismatch_no += payroll.aggregate.mismatch_no;
        acc.mismatch_yes += payroll.aggregate.mismatch_yes;
        acc.max_payable += payroll.max_payable;
        acc.fixed_pay += payroll.fixed_pay;
        acc.variable_pay += payroll.variable_pay;
        acc.actual_payable += payroll.actual_payable;
        acc
    });
    total.mismatch_rate = mismatch_rate(total.mismatch_yes, total.re_audited_visits);
    total
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayrollReport {
    pub header: ReportHeader,
    pub ruleset: PayrollRuleset,
    pub rows: Vec<ReportRow>,
    pub total: TotalRow,
    pub excluded: Vec<ExcludedRecord>,
    pub duplicate_payees: Vec<String>,
}

/// Runs the full pipeline over one audit table and one payee directory.
///
/// # Errors
/// Returns a [`StageError`] naming the first stage that failed. No partial
/// report is produced.
pub fn build_report(
    audit: &RawTable,
    payees: &RawTable,
    ruleset: &PayrollRuleset,
    options: &ReportOptions,
) -> Result<PayrollReport, StageError> {
    let normalized =
        normalize_audit(audit, options).map_err(|err| StageError::new(Stage::Normalize, err))?;
    let directory =
        normalize_payees(payees).map_err(|err| StageError::new(Stage::Normalize, err))?;

    let aggregates = aggregate_visits(&normalized.records);
    for aggregate in &aggregates {
        if aggregate.re_audited_visits > aggregate.audited_visits {
            tracing::warn!(
                auditor = %aggregate.auditor,
                audited = aggregate.audited_visits,
                re_audited = aggregate.re_audited_visits,
                "re-audited records exceed distinct visits"
            );
        }
    }
    tracing::info!(
        records = normalized.records.len(),
        auditors = aggregates.len(),
        "aggregated visit records"
    );

    let payroll = calculate_payroll_rows(&aggregates, ruleset)
        .map_err(|err| StageError::new(Stage::Calculate, err))?;
    let merged = merge_payees(&payroll, &directory, options.join_key);
    let total = grand_total(&merged.rows);

    tracing::info!(
        rows = merged.rows.len(),
        actual_payable = total.actual_payable,
        "payroll report computed"
    );

    Ok(PayrollReport {
        header: normalized.header,
        ruleset: ruleset.clone(),
        rows: merged.rows,
        total,
        excluded: normalized.excluded,
        duplicate_payees: merged.duplicate_payees,
    })
}
