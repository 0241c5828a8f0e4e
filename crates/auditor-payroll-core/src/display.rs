//! Presentation rules shared by every rendering of a [`PayrollReport`].
//!
//! Counts and money blank out when zero, money rounds half away from zero to
//! whole units, and percentages always render as `N%`.

use serde::{Deserialize, Serialize};

use crate::{PayrollReport, PayrollRuleset, GRAND_TOTAL_LABEL};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Serial,
    AuditorName,
    AuditedVisits,
    ReAuditedVisits,
    MismatchNo,
    MismatchYes,
    MismatchPercent,
    UnitPrice,
    MaxPayable,
    FixedPay,
    VariablePay,
    ActualPayable,
    FullName,
    MfsNumber,
    MfsProvider,
}

pub const COLUMNS: [Column; 15] = [
    Column::Serial,
    Column::AuditorName,
    Column::AuditedVisits,
    Column::ReAuditedVisits,
    Column::MismatchNo,
    Column::MismatchYes,
    Column::MismatchPercent,
    Column::UnitPrice,
    Column::MaxPayable,
    Column::FixedPay,
    Column::VariablePay,
    Column::ActualPayable,
    Column::FullName,
    Column::MfsNumber,
    Column::MfsProvider,
];

impl Column {
    #[must_use]
    pub fn index(self) -> u16 {
        match self {
            Self::Serial => 0,
            Self::AuditorName => 1,
            Self::AuditedVisits => 2,
            Self::ReAuditedVisits => 3,
            Self::MismatchNo => 4,
            Self::MismatchYes => 5,
            Self::MismatchPercent => 6,
            Self::UnitPrice => 7,
            Self::MaxPayable => 8,
            Self::FixedPay => 9,
            Self::VariablePay => 10,
            Self::ActualPayable => 11,
            Self::FullName => 12,
            Self::MfsNumber => 13,
            Self::MfsProvider => 14,
        }
    }

    /// Spreadsheet column letter. All columns fit in `A..=O`.
    #[must_use]
    pub fn letter(self) -> char {
        char::from(b'A' + u8::try_from(self.index()).unwrap_or(0))
    }

    #[must_use]
    pub fn header(self, ruleset: &PayrollRuleset) -> String {
        match self {
            Self::Serial => "Sl".to_string(),
            Self::AuditorName => "Auditor Name".to_string(),
            Self::AuditedVisits => "Audited Visit".to_string(),
            Self::ReAuditedVisits => "Re-Audited Visit".to_string(),
            Self::MismatchNo => "Mismatch No".to_string(),
            Self::MismatchYes => "Mismatch Yes".to_string(),
            Self::MismatchPercent => "% Mismatch in Re-Audit".to_string(),
            Self::UnitPrice => "Unit Price".to_string(),
            Self::MaxPayable => "Max Payable".to_string(),
            Self::FixedPay => format!("Fixed ({}%)", share_percent(ruleset.fixed_share)),
            Self::VariablePay => format!("Variable ({}%)", share_percent(ruleset.variable_share)),
            Self::ActualPayable => "Actual Payable".to_string(),
            Self::FullName => "Full Name".to_string(),
            Self::MfsNumber => "MFS Number".to_string(),
            Self::MfsProvider => "MFS Provider".to_string(),
        }
    }

    /// Second header line for columns grouped under "Mismatch found".
    #[must_use]
    pub fn group_label(self) -> Option<&'static str> {
        match self {
            Self::MismatchNo => Some("No"),
            Self::MismatchYes => Some("Yes"),
            Self::MismatchPercent => Some("%"),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_money(self) -> bool {
        matches!(
            self,
            Self::MaxPayable | Self::FixedPay | Self::VariablePay | Self::ActualPayable
        )
    }

    #[must_use]
    pub fn is_count(self) -> bool {
        matches!(
            self,
            Self::Serial
                | Self::AuditedVisits
                | Self::ReAuditedVisits
                | Self::MismatchNo
                | Self::MismatchYes
        )
    }
}

fn share_percent(share: f64) -> String {
    format_plain((share * 100.0 * 1e6).round() / 1e6)
}

/// Rounds half away from zero after snapping away binary noise, so values
/// like `0.285 * 100` round the way a spreadsheet shows them.
#[must_use]
pub fn round_half_away(value: f64) -> f64 {
    ((value * 1e9).round() / 1e9).round()
}

/// Shortest decimal form: integral values print without a fraction.
#[must_use]
pub fn format_plain(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

#[must_use]
pub fn format_count(value: u64) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

#[must_use]
pub fn format_money(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let rounded = round_half_away(value);
    if rounded == 0.0 {
        String::new()
    } else {
        format!("{rounded:.0}")
    }
}

#[must_use]
pub fn format_percent(rate: f64) -> String {
    if !rate.is_finite() {
        return String::new();
    }
    format!("{:.0}%", round_half_away(rate * 100.0))
}

#[must_use]
pub fn format_unit_price(value: f64) -> String {
    if !value.is_finite() || value == 0.0 {
        String::new()
    } else {
        format_plain(value)
    }
}

/// Display-ready text cells: the header row, one row per auditor, then the
/// grand-total row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlatTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FlatTable {
    #[must_use]
    pub fn total_row(&self) -> Option<&[String]> {
        self.rows.last().map(Vec::as_slice)
    }

    #[must_use]
    pub fn cell(&self, row: usize, column: Column) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(usize::from(column.index())))
            .map(String::as_str)
    }
}

#[must_use]
pub fn flat_table(report: &PayrollReport) -> FlatTable {
    let headers = COLUMNS
        .iter()
        .map(|column| column.header(&report.ruleset))
        .collect();

    let mut rows = report
        .rows
        .iter()
        .map(|row| {
            let payroll = &row.payroll;
            let aggregate = &payroll.aggregate;
            let payee = row.payee.as_ref();
            COLUMNS
                .iter()
                .map(|column| match column {
                    Column::Serial => format_count(row.serial as u64),
                    Column::AuditorName => aggregate.auditor.clone(),
                    Column::AuditedVisits => format_count(aggregate.audited_visits),
                    Column::ReAuditedVisits => format_count(aggregate.re_audited_visits),
                    Column::MismatchNo => format_count(aggregate.mismatch_no),
                    Column::MismatchYes => format_count(aggregate.mismatch_yes),
                    Column::MismatchPercent => format_percent(payroll.mismatch_rate),
                    Column::UnitPrice => format_unit_price(payroll.unit_price),
                    Column::MaxPayable => format_money(payroll.max_payable),
                    Column::FixedPay => format_money(payroll.fixed_pay),
                    Column::VariablePay => format_money(payroll.variable_pay),
                    Column::ActualPayable => format_money(payroll.actual_payable),
                    Column::FullName => payee.map(|p| p.full_name.clone()).unwrap_or_default(),
                    Column::MfsNumber => payee.map(|p| p.mfs_number.clone()).unwrap_or_default(),
                    Column::MfsProvider => {
                        payee.map(|p| p.mfs_provider.clone()).unwrap_or_default()
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let total = &report.total;
    rows.push(
        COLUMNS
            .iter()
            .map(|column| match column {
                Column::AuditorName => GRAND_TOTAL_LABEL.to_string(),
                Column::AuditedVisits => format_count(total.audited_visits),
                Column::ReAuditedVisits => format_count(total.re_audited_visits),
                Column::MismatchNo => format_count(total.mismatch_no),
                Column::MismatchYes => format_count(total.mismatch_yes),
                Column::MismatchPercent => format_percent(total.mismatch_rate),
                Column::MaxPayable => format_money(total.max_payable),
                Column::FixedPay => format_money(total.fixed_pay),
                Column::VariablePay => format_money(total.variable_pay),
                Column::ActualPayable => format_money(total.actual_payable),
                Column::Serial
                | Column::UnitPrice
                | Column::FullName
                | Column::MfsNumber
                | Column::MfsProvider => String::new(),
            })
            .collect(),
    );

    FlatTable { headers, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build_report, PayrollRuleset, RawTable, ReportOptions, DEFAULT_TITLE_PREFIX,
    };

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn report(audit_rows: &[[&str; 4]], payee_rows: &[[&str; 4]]) -> PayrollReport {
        let audit = RawTable::new(
            strings(&[
                "assigned_to",
                "visit_id",
                "re_audited",
                "mismatch_found_in_reaudit",
            ]),
            audit_rows.iter().map(|row| strings(row)).collect(),
        );
        let payees = RawTable::new(
            strings(&["Auditor Name", "Full Name", "MFS Number", "MFS Provider"]),
            payee_rows.iter().map(|row| strings(row)).collect(),
        );
        must_ok(build_report(
            &audit,
            &payees,
            &PayrollRuleset::v1(),
            &ReportOptions::default(),
        ))
    }

    #[test]
    fn headers_follow_fixed_order() {
        let table = report(&[], &[]);
        assert_eq!(
            table_headers(&flat_table(&table)),
            vec![
                "Sl",
                "Auditor Name",
                "Audited Visit",
                "Re-Audited Visit",
                "Mismatch No",
                "Mismatch Yes",
                "% Mismatch in Re-Audit",
                "Unit Price",
                "Max Payable",
                "Fixed (75%)",
                "Variable (25%)",
                "Actual Payable",
                "Full Name",
                "MFS Number",
                "MFS Provider",
            ]
        );
        assert_eq!(table.header.title, DEFAULT_TITLE_PREFIX);
    }

    fn table_headers(table: &FlatTable) -> Vec<&str> {
        table.headers.iter().map(String::as_str).collect()
    }

    #[test]
    fn scenario_row_renders_rounded_values() {
        let table = flat_table(&report(
            &[
                ["A", "v1", "true", "true"],
                ["A", "v1", "true", "false"],
                ["A", "v2", "false", "false"],
            ],
            &[["A", "Auditor A", "1712345678", "bKash"]],
        ));

        assert_eq!(
            table.rows[0],
            strings(&[
                "1",
                "A",
                "2",
                "2",
                "1",
                "1",
                "50%",
                "3",
                "6",
                "5",
                "1",
                "5",
                "Auditor A",
                "01712345678",
                "bKash",
            ])
        );
    }

    #[test]
    fn zero_values_blank_and_percent_stays() {
        let table = flat_table(&report(
            &[["B", "v1", "false", "false"], ["B", "v2", "false", "false"]],
            &[],
        ));

        let row = &table.rows[0];
        assert_eq!(row[usize::from(Column::ReAuditedVisits.index())], "");
        assert_eq!(row[usize::from(Column::MismatchNo.index())], "");
        assert_eq!(row[usize::from(Column::MismatchYes.index())], "");
        assert_eq!(row[usize::from(Column::MismatchPercent.index())], "0%");
        assert_eq!(row[usize::from(Column::FullName.index())], "");
        assert_eq!(row[usize::from(Column::MfsNumber.index())], "");

        let total = must_some(table.total_row());
        assert_eq!(total[usize::from(Column::AuditorName.index())], GRAND_TOTAL_LABEL);
        assert_eq!(total[usize::from(Column::Serial.index())], "");
        assert_eq!(total[usize::from(Column::UnitPrice.index())], "");
        assert_eq!(total[usize::from(Column::AuditedVisits.index())], "2");
        // summed zeros blank out on the total row as well
        assert_eq!(total[usize::from(Column::ReAuditedVisits.index())], "");
        assert_eq!(total[usize::from(Column::MismatchYes.index())], "");
        assert_eq!(total[usize::from(Column::MismatchPercent.index())], "0%");
    }

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    #[test]
    fn zero_unit_price_blanks_money_totals() {
        let base = report(&[["A", "v1", "true", "false"]], &[]);
        let ruleset = must_ok(PayrollRuleset::v1().with_unit_price(0.0));
        let audit = RawTable::new(
            strings(&[
                "assigned_to",
                "visit_id",
                "re_audited",
                "mismatch_found_in_reaudit",
            ]),
            vec![strings(&["A", "v1", "true", "false"])],
        );
        let free = must_ok(build_report(
            &audit,
            &RawTable::new(
                strings(&["Auditor Name", "Full Name", "MFS Number", "MFS Provider"]),
                Vec::new(),
            ),
            &ruleset,
            &ReportOptions::default(),
        ));

        let table = flat_table(&free);
        let total = must_some(table.total_row());
        for column in [
            Column::MaxPayable,
            Column::FixedPay,
            Column::VariablePay,
            Column::ActualPayable,
        ] {
            assert_eq!(total[usize::from(column.index())], "", "{column:?}");
            assert_eq!(table.rows[0][usize::from(column.index())], "");
        }
        assert_eq!(table.rows[0][usize::from(Column::UnitPrice.index())], "");
        assert_eq!(
            flat_table(&base).rows[0][usize::from(Column::ActualPayable.index())],
            "3"
        );
    }

    #[test]
    fn text_zero_is_not_blanked() {
        let table = flat_table(&report(
            &[["0", "v1", "false", "false"]],
            &[["0", "0", "0", "0"]],
        ));
        let row = &table.rows[0];
        assert_eq!(row[usize::from(Column::AuditorName.index())], "0");
        assert_eq!(row[usize::from(Column::FullName.index())], "0");
        assert_eq!(row[usize::from(Column::MfsNumber.index())], "0");
        assert_eq!(row[usize::from(Column::MfsProvider.index())], "0");
    }

    #[test]
    fn empty_audit_renders_only_total_row() {
        let table = flat_table(&report(&[], &[["A", "Auditor A", "1", "bKash"]]));
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.cell(0, Column::AuditorName), Some(GRAND_TOTAL_LABEL));
        assert_eq!(table.cell(0, Column::MismatchPercent), Some("0%"));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(format_money(4.5), "5");
        assert_eq!(format_money(0.49), "");
        assert_eq!(format_money(f64::NAN), "");
        assert_eq!(format_percent(0.285), "29%");
        assert_eq!(format_percent(0.125), "13%");
        assert_eq!(format_percent(0.0), "0%");
        assert_eq!(format_unit_price(2.5), "2.5");
        assert_eq!(format_count(0), "");
    }

    #[test]
    fn shares_drive_pay_headers() {
        let ruleset = PayrollRuleset {
            fixed_share: 0.7,
            variable_share: 0.3,
            ..PayrollRuleset::v1()
        };
        assert_eq!(Column::FixedPay.header(&ruleset), "Fixed (70%)");
        assert_eq!(Column::VariablePay.header(&ruleset), "Variable (30%)");
        assert_eq!(Column::MfsProvider.letter(), 'O');
    }
}
