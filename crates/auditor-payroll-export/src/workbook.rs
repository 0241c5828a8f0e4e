use anyhow::{Context, Result};
use auditor_payroll_core::{
    format_plain, CellRole, CellValue, Column, RowKind, SheetCell, SheetLayout, COLUMNS,
    FIRST_DATA_ROW, GROUP_LABEL_ROW,
};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Formula, Workbook, Worksheet};

/// Shows whole units and leaves zero cells empty, matching the flat table.
const WHOLE_NUMBER_FORMAT: &str = "0;-0;;@";
const UNIT_PRICE_FORMAT: &str = "General;-General;;@";
const PERCENT_FORMAT: &str = "0%";

const HEADER_FILL: u32 = 0x00D9_E1F2;
const HIGHLIGHT_FILL: u32 = 0x00FF_F2CC;
const TOTAL_FILL: u32 = 0x00F2_F2F2;

struct Styles {
    title: Format,
    subtitle: Format,
    header: Format,
    data: CellStyles,
    total: CellStyles,
}

struct CellStyles {
    text: Format,
    count: Format,
    unit_price: Format,
    percent: Format,
    money: Format,
    highlight: Format,
}

impl CellStyles {
    fn new(total: bool) -> Self {
        let base = || {
            let format = Format::new().set_border(FormatBorder::Thin);
            if total {
                format
                    .set_bold()
                    .set_background_color(Color::RGB(TOTAL_FILL))
            } else {
                format
            }
        };

        Self {
            text: base(),
            count: base()
                .set_num_format(WHOLE_NUMBER_FORMAT)
                .set_align(FormatAlign::Center),
            unit_price: base()
                .set_num_format(UNIT_PRICE_FORMAT)
                .set_align(FormatAlign::Center),
            percent: base()
                .set_num_format(PERCENT_FORMAT)
                .set_align(FormatAlign::Center),
            money: base().set_num_format(WHOLE_NUMBER_FORMAT),
            highlight: base()
                .set_num_format(WHOLE_NUMBER_FORMAT)
                .set_bold()
                .set_background_color(Color::RGB(HIGHLIGHT_FILL)),
        }
    }

    fn for_column(&self, column: Column) -> &Format {
        match column {
            Column::ActualPayable => &self.highlight,
            Column::MismatchPercent => &self.percent,
            Column::UnitPrice => &self.unit_price,
            column if column.is_money() => &self.money,
            column if column.is_count() => &self.count,
            _ => &self.text,
        }
    }
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Format::new()
                .set_bold()
                .set_font_size(16)
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            subtitle: Format::new()
                .set_font_size(12)
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            header: Format::new()
                .set_bold()
                .set_text_wrap()
                .set_border(FormatBorder::Thin)
                .set_background_color(Color::RGB(HEADER_FILL))
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            data: CellStyles::new(false),
            total: CellStyles::new(true),
        }
    }

    fn for_role(&self, role: CellRole) -> &Format {
        match role {
            CellRole::Title => &self.title,
            CellRole::Subtitle => &self.subtitle,
            CellRole::Header => &self.header,
        }
    }

    fn for_row(&self, kind: RowKind) -> &CellStyles {
        match kind {
            RowKind::Data => &self.data,
            RowKind::Total => &self.total,
        }
    }
}

fn column_width(column: Column) -> f64 {
    match column {
        Column::Serial => 5.0,
        Column::AuditorName => 24.0,
        Column::FullName => 28.0,
        Column::MfsNumber => 16.0,
        Column::MfsProvider => 14.0,
        Column::UnitPrice => 8.0,
        Column::MismatchPercent => 9.0,
        column if column.is_money() => 12.0,
        _ => 10.0,
    }
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    cell: &SheetCell,
    format: &Format,
) -> Result<()> {
    let col = cell.column.index();
    match &cell.value {
        CellValue::Blank => {
            worksheet.write_blank(row, col, format)?;
        }
        CellValue::Text { text } => {
            worksheet.write_string_with_format(row, col, text, format)?;
        }
        CellValue::Number { value } => {
            worksheet.write_number_with_format(row, col, *value, format)?;
        }
        CellValue::Formula { expr, cached } => {
            let formula = Formula::new(expr).set_result(format_plain(*cached));
            worksheet.write_formula_with_format(row, col, formula, format)?;
        }
    }
    Ok(())
}

/// Materializes a [`SheetLayout`] as an `.xlsx` workbook held in memory.
///
/// # Errors
/// Returns an error when a cell, merge, or the workbook itself cannot be
/// written.
pub fn render_workbook(layout: &SheetLayout) -> Result<Vec<u8>> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(&layout.sheet_name)
        .with_context(|| format!("invalid worksheet name `{}`", layout.sheet_name))?;

    for merge in &layout.merges {
        worksheet
            .merge_range(
                merge.first_row,
                merge.first_column.index(),
                merge.last_row,
                merge.last_column.index(),
                &merge.text,
                styles.for_role(merge.role),
            )
            .with_context(|| format!("failed to merge header `{}`", merge.text))?;
    }

    for cell in &layout.group_labels {
        write_cell(worksheet, GROUP_LABEL_ROW, cell, &styles.header)?;
    }

    for row in &layout.rows {
        let row_styles = styles.for_row(row.kind);
        for cell in &row.cells {
            write_cell(worksheet, row.row, cell, row_styles.for_column(cell.column))
                .with_context(|| {
                    format!("failed to write {:?} on row {}", cell.column, row.row + 1)
                })?;
        }
    }

    for column in COLUMNS {
        worksheet.set_column_width(column.index(), column_width(column))?;
    }
    worksheet.set_row_height(0, 24)?;
    worksheet.set_freeze_panes(FIRST_DATA_ROW, Column::AuditedVisits.index())?;

    let buffer = workbook
        .save_to_buffer()
        .context("failed to serialize workbook")?;
    tracing::debug!(bytes = buffer.len(), rows = layout.rows.len(), "rendered workbook");
    Ok(buffer)
}
