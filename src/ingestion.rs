use std::io::Read;
use std::path::Path;

use log::{debug, info};

use crate::config::ParserConfig;
use crate::error::{InsightError, Result};

/// A spreadsheet read fully into memory as raw string cells.
///
/// Rows may have different lengths; nothing here interprets the content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

fn check_limits(rows: usize, columns: usize, config: &ParserConfig) -> Result<()> {
    if rows > config.max_rows {
        return Err(InsightError::InputTooLarge {
            kind: "row".to_string(),
            limit: config.max_rows,
            actual: rows,
        });
    }
    if columns > config.max_columns {
        return Err(InsightError::InputTooLarge {
            kind: "column".to_string(),
            limit: config.max_columns,
            actual: columns,
        });
    }
    Ok(())
}

impl RawTable {
    pub fn from_rows(rows: Vec<Vec<String>>, config: &ParserConfig) -> Result<Self> {
        let widest = rows.iter().map(Vec::len).max().unwrap_or(0);
        check_limits(rows.len(), widest, config)?;
        Ok(Self { rows })
    }

    /// Reads CSV records without treating any row as a header.
    ///
    /// Stops as soon as a limit is exceeded rather than buffering the rest.
    pub fn from_csv_reader<R: Read>(reader: R, config: &ParserConfig) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            check_limits(rows.len() + 1, record.len(), config)?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            if rows.is_empty() {
                if let Some(first) = row.first_mut() {
                    if let Some(stripped) = first.strip_prefix('\u{feff}') {
                        *first = stripped.to_string();
                    }
                }
            }
            rows.push(row);
        }

        debug!("Read {} CSV rows", rows.len());
        Ok(Self { rows })
    }

    pub fn from_csv_str(text: &str, config: &ParserConfig) -> Result<Self> {
        Self::from_csv_reader(text.as_bytes(), config)
    }

    pub fn is_empty(&self) -> bool {
        self.rows
            .iter()
            .all(|row| row.iter().all(|cell| cell.trim().is_empty()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Cell content, trimmed; missing cells read as empty.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|c| c.trim())
            .unwrap_or("")
    }
}

/// Reads a CSV or Excel export by extension. The file is closed on return.
pub fn read_table(path: &Path, config: &ParserConfig) -> Result<RawTable> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let table = match extension.as_str() {
        "csv" | "txt" => {
            let file = std::fs::File::open(path)?;
            RawTable::from_csv_reader(std::io::BufReader::new(file), config)?
        }
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path, config)?,
        other => {
            return Err(InsightError::UnsupportedFormat(format!(
                "'{}' ({})",
                path.display(),
                if other.is_empty() { "no extension" } else { other }
            )))
        }
    };

    info!(
        "Loaded {} rows from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}

#[cfg(feature = "excel")]
fn read_workbook(path: &Path, config: &ParserConfig) -> Result<RawTable> {
    use calamine::{Data, Reader};

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| InsightError::Excel(format!("Failed to open workbook: {e}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| InsightError::EmptyInput(format!("{} has no worksheets", path.display())))?
        .map_err(|e| InsightError::Excel(e.to_string()))?;

    let (height, width) = range.get_size();
    check_limits(height, width, config)?;

    let rows = range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Empty => String::new(),
                    Data::String(s) => s.clone(),
                    Data::Float(f) => f.to_string(),
                    Data::Int(i) => i.to_string(),
                    Data::Bool(b) => b.to_string(),
                    Data::DateTime(dt) => crate::utils::excel_serial_to_date(dt.as_f64())
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| dt.as_f64().to_string()),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect();

    Ok(RawTable { rows })
}

#[cfg(not(feature = "excel"))]
fn read_workbook(path: &Path, _config: &ParserConfig) -> Result<RawTable> {
    Err(InsightError::UnsupportedFormat(format!(
        "'{}' is a workbook but Excel support is not enabled",
        path.display()
    )))
}
