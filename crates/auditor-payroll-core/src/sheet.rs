//! Spreadsheet layout for a [`PayrollReport`].
//!
//! The layout is plain data so any writer can materialize it. Derived cells
//! are formulas over sibling cells in the same row, each carrying the value
//! the engine computed so viewers that do not recalculate still show it.

use serde::{Deserialize, Serialize};

use crate::display::{format_plain, Column, COLUMNS};
use crate::{PayrollReport, PayrollRuleset, GRAND_TOTAL_LABEL};

pub const TITLE_ROW: u32 = 0;
pub const DATE_RANGE_ROW: u32 = 1;
pub const HEADER_ROW: u32 = 2;
pub const GROUP_LABEL_ROW: u32 = 3;
/// Zero-based index of the first auditor row.
pub const FIRST_DATA_ROW: u32 = 4;

pub const MISMATCH_GROUP_LABEL: &str = "Mismatch found in Re-Audit";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellValue {
    Blank,
    Text { text: String },
    Number { value: f64 },
    Formula { expr: String, cached: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CellRole {
    Title,
    Subtitle,
    Header,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Data,
    Total,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetCell {
    pub column: Column,
    pub value: CellValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetRow {
    /// Zero-based sheet row.
    pub row: u32,
    pub kind: RowKind,
    pub cells: Vec<SheetCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergedRange {
    pub first_row: u32,
    pub first_column: Column,
    pub last_row: u32,
    pub last_column: Column,
    pub text: String,
    pub role: CellRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetLayout {
    pub sheet_name: String,
    pub merges: Vec<MergedRange>,
    /// Cells on [`GROUP_LABEL_ROW`] under the mismatch group header.
    pub group_labels: Vec<SheetCell>,
    pub rows: Vec<SheetRow>,
}

impl SheetLayout {
    #[must_use]
    pub fn total_row(&self) -> Option<&SheetRow> {
        self.rows.iter().find(|row| row.kind == RowKind::Total)
    }

    #[must_use]
    pub fn data_rows(&self) -> impl Iterator<Item = &SheetRow> {
        self.rows.iter().filter(|row| row.kind == RowKind::Data)
    }
}

impl SheetRow {
    #[must_use]
    pub fn cell(&self, column: Column) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|cell| cell.column == column)
            .map(|cell| &cell.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowFormulas {
    pub mismatch_percent: String,
    pub max_payable: String,
    pub fixed_pay: String,
    pub variable_pay: String,
    pub actual_payable: String,
}

fn cell_ref(column: Column, excel_row: u32) -> String {
    format!("{}{excel_row}", column.letter())
}

fn rate_formula(excel_row: u32) -> String {
    let denominator = cell_ref(Column::ReAuditedVisits, excel_row);
    let numerator = cell_ref(Column::MismatchYes, excel_row);
    format!("=IF({denominator}>0,{numerator}/{denominator},0)")
}

/// Formulas for one auditor row, `excel_row` being the 1-based sheet row.
#[must_use]
pub fn data_row_formulas(excel_row: u32, ruleset: &PayrollRuleset) -> RowFormulas {
    let max = cell_ref(Column::MaxPayable, excel_row);
    RowFormulas {
        mismatch_percent: rate_formula(excel_row),
        max_payable: format!(
            "={}*{}",
            cell_ref(Column::AuditedVisits, excel_row),
            cell_ref(Column::UnitPrice, excel_row)
        ),
        fixed_pay: format!("={max}*{}", format_plain(ruleset.fixed_share)),
        variable_pay: format!(
            "={max}*{}*(1-{})",
            format_plain(ruleset.variable_share),
            cell_ref(Column::MismatchPercent, excel_row)
        ),
        actual_payable: format!(
            "={}+{}",
            cell_ref(Column::FixedPay, excel_row),
            cell_ref(Column::VariablePay, excel_row)
        ),
    }
}

const SUMMED_COLUMNS: [Column; 8] = [
    Column::AuditedVisits,
    Column::ReAuditedVisits,
    Column::MismatchNo,
    Column::MismatchYes,
    Column::MaxPayable,
    Column::FixedPay,
    Column::VariablePay,
    Column::ActualPayable,
];

/// Formulas for the grand-total row: column sums over the data range, and a
/// mismatch rate re-derived from the row's own summed cells.
#[must_use]
pub fn total_row_formulas(
    first_excel_row: u32,
    last_excel_row: u32,
    total_excel_row: u32,
) -> Vec<(Column, String)> {
    let mut formulas = SUMMED_COLUMNS
        .iter()
        .map(|column| {
            (
                *column,
                format!(
                    "=SUM({}:{})",
                    cell_ref(*column, first_excel_row),
                    cell_ref(*column, last_excel_row)
                ),
            )
        })
        .collect::<Vec<_>>();
    formulas.push((Column::MismatchPercent, rate_formula(total_excel_row)));
    formulas
}

fn text(value: &str) -> CellValue {
    if value.is_empty() {
        CellValue::Blank
    } else {
        CellValue::Text {
            text: value.to_string(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(value: u64) -> CellValue {
    CellValue::Number {
        value: value as f64,
    }
}

fn formula(expr: String, cached: f64) -> CellValue {
    CellValue::Formula { expr, cached }
}

/// Worksheet names are capped at 31 characters and exclude `[]:*?/\`.
fn sheet_name(title: &str) -> String {
    let cleaned = title
        .chars()
        .filter(|ch| !matches!(ch, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect::<String>();
    let cleaned = cleaned.trim_matches('\'').trim().to_string();
    if cleaned.is_empty() {
        "Payroll".to_string()
    } else {
        cleaned
    }
}

#[must_use]
#[allow(clippy::too_many_lines)]
pub fn sheet_layout(report: &PayrollReport) -> SheetLayout {
    let first_column = Column::Serial;
    let last_column = Column::MfsProvider;

    let mut merges = vec![
        MergedRange {
            first_row: TITLE_ROW,
            first_column,
            last_row: TITLE_ROW,
            last_column,
            text: report.header.title.clone(),
            role: CellRole::Title,
        },
        MergedRange {
            first_row: DATE_RANGE_ROW,
            first_column,
            last_row: DATE_RANGE_ROW,
            last_column,
            text: format!("[{}]", report.header.date_range),
            role: CellRole::Subtitle,
        },
    ];

    let mut group_labels = Vec::new();
    for column in COLUMNS {
        match column.group_label() {
            Some(label) => group_labels.push(SheetCell {
                column,
                value: text(label),
            }),
            None => merges.push(MergedRange {
                first_row: HEADER_ROW,
                first_column: column,
                last_row: GROUP_LABEL_ROW,
                last_column: column,
                text: column.header(&report.ruleset),
                role: CellRole::Header,
            }),
        }
    }
    merges.push(MergedRange {
        first_row: HEADER_ROW,
        first_column: Column::MismatchNo,
        last_row: HEADER_ROW,
        last_column: Column::MismatchPercent,
        text: MISMATCH_GROUP_LABEL.to_string(),
        role: CellRole::Header,
    });

    let mut rows = Vec::with_capacity(report.rows.len() + 1);
    let mut sheet_row = FIRST_DATA_ROW;
    for row in &report.rows {
        let excel_row = sheet_row + 1;
        let formulas = data_row_formulas(excel_row, &report.ruleset);
        let payroll = &row.payroll;
        let aggregate = &payroll.aggregate;
        let payee = row.payee.as_ref();

        let cells = COLUMNS
            .iter()
            .map(|column| {
                let value = match column {
                    Column::Serial => count(row.serial as u64),
                    Column::AuditorName => text(&aggregate.auditor),
                    Column::AuditedVisits => count(aggregate.audited_visits),
                    Column::ReAuditedVisits => count(aggregate.re_audited_visits),
                    Column::MismatchNo => count(aggregate.mismatch_no),
                    Column::MismatchYes => count(aggregate.mismatch_yes),
                    Column::MismatchPercent => {
                        formula(formulas.mismatch_percent.clone(), payroll.mismatch_rate)
                    }
                    Column::UnitPrice => CellValue::Number {
                        value: payroll.unit_price,
                    },
                    Column::MaxPayable => {
                        formula(formulas.max_payable.clone(), payroll.max_payable)
                    }
                    Column::FixedPay => formula(formulas.fixed_pay.clone(), payroll.fixed_pay),
                    Column::VariablePay => {
                        formula(formulas.variable_pay.clone(), payroll.variable_pay)
                    }
                    Column::ActualPayable => {
                        formula(formulas.actual_payable.clone(), payroll.actual_payable)
                    }
                    Column::FullName => text(payee.map_or("", |p| p.full_name.as_str())),
                    Column::MfsNumber => text(payee.map_or("", |p| p.mfs_number.as_str())),
                    Column::MfsProvider => text(payee.map_or("", |p| p.mfs_provider.as_str())),
                };
                SheetCell {
                    column: *column,
                    value,
                }
            })
            .collect();

        rows.push(SheetRow {
            row: sheet_row,
            kind: RowKind::Data,
            cells,
        });
        sheet_row += 1;
    }

    let total = &report.total;
    let total_excel_row = sheet_row + 1;
    let total_formulas = if report.rows.is_empty() {
        Vec::new()
    } else {
        total_row_formulas(FIRST_DATA_ROW + 1, sheet_row, total_excel_row)
    };
    let summed = |column: Column, cached: f64| -> CellValue {
        total_formulas
            .iter()
            .find(|(candidate, _)| *candidate == column)
            .map_or(CellValue::Number { value: cached }, |(_, expr)| {
                formula(expr.clone(), cached)
            })
    };

    let total_cells = COLUMNS
        .iter()
        .map(|column| {
            #[allow(clippy::cast_precision_loss)]
            let value = match column {
                Column::AuditorName => text(GRAND_TOTAL_LABEL),
                Column::AuditedVisits => summed(*column, total.audited_visits as f64),
                Column::ReAuditedVisits => summed(*column, total.re_audited_visits as f64),
                Column::MismatchNo => summed(*column, total.mismatch_no as f64),
                Column::MismatchYes => summed(*column, total.mismatch_yes as f64),
                Column::MismatchPercent => {
                    formula(rate_formula(total_excel_row), total.mismatch_rate)
                }
                Column::MaxPayable => summed(*column, total.max_payable),
                Column::FixedPay => summed(*column, total.fixed_pay),
                Column::VariablePay => summed(*column, total.variable_pay),
                Column::ActualPayable => summed(*column, total.actual_payable),
                Column::Serial
                | Column::UnitPrice
                | Column::FullName
                | Column::MfsNumber
                | Column::MfsProvider => CellValue::Blank,
            };
            SheetCell {
                column: *column,
                value,
            }
        })
        .collect();

    rows.push(SheetRow {
        row: sheet_row,
        kind: RowKind::Total,
        cells: total_cells,
    });

    SheetLayout {
        sheet_name: sheet_name(&report.header.title),
        merges,
        group_labels,
        rows,
    }
}
