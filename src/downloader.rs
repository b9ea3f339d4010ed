use crate::loader::Table;
use std::error::Error;

/// Convert a table to CSV format
///
/// The header row is written first, then one line per data row. Values
/// containing commas, quotes or line breaks are quoted, with inner quotes
/// doubled. Short rows are padded with empty fields.
///
/// # Examples
/// ```
/// use skills_feedback::downloader::to_csv;
/// use skills_feedback::loader::Table;
///
/// let mut table = Table::new(vec!["Skill".to_string(), "Agree".to_string()]);
/// table.rows.push(vec!["Audit, internal".to_string(), "Yes".to_string()]);
/// assert_eq!(to_csv(&table), "Skill,Agree\n\"Audit, internal\",Yes\n");
/// ```
pub fn to_csv(table: &Table) -> String {
    let mut csv_content = String::new();
    push_csv_line(&mut csv_content, table.columns.iter().map(String::as_str));
    for row in &table.rows {
        push_csv_line(&mut csv_content, row_cells(row, table.columns.len()));
    }
    csv_content
}

/// Encode bare rows (no header) as CSV lines
pub fn rows_to_csv(rows: &[Vec<String>]) -> String {
    let mut csv_content = String::new();
    for row in rows {
        push_csv_line(&mut csv_content, row.iter().map(String::as_str));
    }
    csv_content
}

fn row_cells(row: &[String], width: usize) -> impl Iterator<Item = &str> {
    let width = width.max(row.len());
    (0..width).map(move |i| row.get(i).map(String::as_str).unwrap_or(""))
}

fn push_csv_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (i, value) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r')
        {
            let escaped = value.replace('"', "\"\"");
            out.push_str(&format!("\"{}\"", escaped));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

/// Convert a table to XLSX format
///
/// Every cell is written as a string, the header in bold on the first row.
pub fn to_xlsx(table: &Table, sheet_name: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Format, Workbook};

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    for (c, column) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, column, &bold)?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            worksheet.write_string((r + 1) as u32, c as u16, value)?;
        }
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}
