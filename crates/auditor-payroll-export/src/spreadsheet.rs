use std::io::Cursor;

use anyhow::Result;
use auditor_payroll_core::RawTable;
use calamine::{Data, Reader, Xlsx};
use time::macros::date;
use time::{Date, Duration};

use crate::ingest_error;

/// Day zero of the 1900 date system, after the leap-year quirk is folded in.
const SERIAL_EPOCH: Date = date!(1899 - 12 - 30);

/// Reads the first worksheet of an `.xlsx` audit export into a [`RawTable`].
/// The first used row is the header. Cells are rendered as the CSV export of
/// the same sheet would show them: whole numbers without a fraction, booleans
/// as `TRUE`/`FALSE`, dates as `YYYY-MM-DD`.
///
/// # Errors
/// Returns an ingest-stage error when the bytes are not a readable workbook,
/// the workbook has no sheet, or the sheet is empty.
pub fn read_audit_xlsx(bytes: &[u8]) -> Result<RawTable> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| ingest_error(format!("unreadable xlsx workbook: {err}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ingest_error("xlsx workbook has no worksheet".to_string()))?
        .map_err(|err| ingest_error(format!("unreadable xlsx worksheet: {err}")))?;

    let mut records = range.rows();
    let headers = match records.next() {
        Some(row) => row
            .iter()
            .map(|cell| cell_text(cell).trim().to_string())
            .collect::<Vec<_>>(),
        None => return Err(ingest_error("xlsx worksheet has no header row".to_string())),
    };

    let rows = records
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .collect::<Vec<_>>();

    tracing::debug!(columns = headers.len(), rows = rows.len(), "read xlsx table");
    Ok(RawTable::new(headers, rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => value.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) => number_text(*value),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::DateTime(value) => {
            let serial = value.as_f64();
            match serial_date(serial) {
                Some(day) if value.is_datetime() => day.to_string(),
                _ => number_text(serial),
            }
        }
        Data::Error(err) => err.to_string(),
    }
}

fn number_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn serial_date(serial: f64) -> Option<Date> {
    if !serial.is_finite() {
        return None;
    }
    SERIAL_EPOCH.checked_add(Duration::days(serial.floor() as i64))
}
