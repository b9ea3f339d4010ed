use crate::error::ConfigurationError;
use crate::review::SourceRow;
use std::fs;
use std::path::Path;

/// Column holding the skill name in the source dataset
pub const SKILL_COLUMN: &str = "Skill";
/// Column describing how AI supports the skill
pub const AI_SUPPORT_COLUMN: &str = "How AI/GenAI Supports";
/// Column holding the proposed human capability statement
pub const CAPABILITY_COLUMN: &str = "The New Human Capability Statement";

/// A string-typed table: a header row and data rows
///
/// Rows may be shorter than the header; missing cells read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table whose first row is the header
    pub fn from_records(mut records: Vec<Vec<String>>) -> Self {
        if records.is_empty() {
            return Table::default();
        }
        let columns = records.remove(0);
        Table {
            columns,
            rows: records,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.trim() == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell value by row and column name, empty when either is absent
    pub fn get(&self, row: usize, column: &str) -> &str {
        self.column_index(column)
            .and_then(|c| self.rows.get(row).and_then(|r| r.get(c)))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load the review items from a CSV or Excel file
///
/// Fails fast when the file is absent, unreadable, or lacks one of the three
/// required columns. Fully blank rows are skipped.
///
/// # Examples
/// ```no_run
/// use skills_feedback::loader::load_source;
///
/// match load_source("skills_blueprint.xlsx") {
///     Ok(rows) => println!("Loaded {} items", rows.len()),
///     Err(e) => eprintln!("Error loading source: {}", e),
/// }
/// ```
pub fn load_source(filepath: impl AsRef<Path>) -> Result<Vec<SourceRow>, ConfigurationError> {
    let path = filepath.as_ref();
    if !path.exists() {
        return Err(ConfigurationError::SourceMissing(path.to_path_buf()));
    }

    let table = read_any(path)?;
    for required in [SKILL_COLUMN, AI_SUPPORT_COLUMN, CAPABILITY_COLUMN] {
        if !table.has_column(required) {
            return Err(ConfigurationError::MissingColumn(required.to_string()));
        }
    }

    let rows = (0..table.len())
        .filter(|&r| table.rows[r].iter().any(|cell| !cell.trim().is_empty()))
        .map(|r| SourceRow {
            skill: table.get(r, SKILL_COLUMN).to_string(),
            ai_support: table.get(r, AI_SUPPORT_COLUMN).to_string(),
            human_capability: table.get(r, CAPABILITY_COLUMN).to_string(),
        })
        .collect();

    Ok(rows)
}

/// Detect file type by extension and read it into a [`Table`]
fn read_any(path: &Path) -> Result<Table, ConfigurationError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => read_csv(path).map_err(|e| ConfigurationError::SourceUnreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Some("xlsx") | Some("xls") | Some("xlsm") | Some("ods") => from_excel(path),
        Some(ext) => Err(ConfigurationError::UnsupportedFormat(ext.to_string())),
        None => Err(ConfigurationError::UnsupportedFormat(
            "file has no extension".to_string(),
        )),
    }
}

/// Read a CSV file into a [`Table`]
pub fn read_csv(filepath: impl AsRef<Path>) -> std::io::Result<Table> {
    let content = fs::read_to_string(filepath)?;
    Ok(Table::from_records(parse_csv(&content)))
}

/// Read the first worksheet of an Excel workbook
fn from_excel(path: &Path) -> Result<Table, ConfigurationError> {
    use calamine::{Reader, open_workbook_auto};

    let unreadable = |message: String| ConfigurationError::SourceUnreadable {
        path: path.to_path_buf(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| unreadable(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| unreadable("no sheets found in workbook".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| unreadable(e.to_string()))?;

    let records = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    Ok(Table::from_records(records))
}

fn cell_to_string(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        calamine::Data::String(s) => s.clone(),
        calamine::Data::Int(i) => i.to_string(),
        // Whole numbers come back as floats from most writers
        calamine::Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", *f as i64)
        }
        calamine::Data::Float(f) => f.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Parse CSV text into records
///
/// Handles quoted fields containing commas, doubled quotes and line breaks.
/// Both `\n` and `\r\n` line endings are accepted. A trailing newline does
/// not produce an empty record.
pub fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        // Double quote inside quoted field
                        field.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                field_started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    // Last record without a trailing newline
    if field_started || !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}
