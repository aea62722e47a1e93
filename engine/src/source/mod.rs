//! Source reading: delimited files and spreadsheet sheets into a [`RawTable`].
//!
//! No dataset-specific logic lives here. Headers are kept exactly as they
//! appear in the source (line breaks included); resolving them to canonical
//! fields is the job of [`crate::mapping`].

pub mod delimited;
pub mod sheet;

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{SourceError, SourceResult};

pub use delimited::{decode_content, detect_delimiter, detect_encoding, parse_delimited};
pub use sheet::read_sheet;

/// A raw cell value as read from the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
}

impl Cell {
    /// Build a cell from source text; blank text becomes [`Cell::Empty`].
    pub fn from_text(text: &str) -> Self {
        if text.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(text.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Render the cell as text. Whole floats lose their fractional part
    /// so that spreadsheet codes like `1234.0` read back as `1234`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Empty => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text().unwrap_or_default())
    }
}

/// One data row, positionally aligned with [`RawTable::headers`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line (CSV) or row (sheet) number in the source.
    pub line: usize,
    pub cells: Vec<Cell>,
}

impl RawRow {
    pub fn cell(&self, column: usize) -> &Cell {
        self.cells.get(column).unwrap_or(&Cell::Empty)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

/// An in-memory table of rows keyed by raw column labels.
///
/// Produced once by [`read_source`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RawTable {
    source_id: String,
    headers: Vec<String>,
    rows: Vec<RawRow>,
}

impl RawTable {
    pub fn new(source_id: impl Into<String>, headers: Vec<String>, rows: Vec<RawRow>) -> Self {
        Self {
            source_id: source_id.into(),
            headers,
            rows,
        }
    }

    /// Identifier used in logs and reports (`path` or `path#sheet`).
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a raw label, first occurrence wins.
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == label)
    }

    /// Look up a cell by raw label.
    pub fn value<'a>(&self, row: &'a RawRow, label: &str) -> Option<&'a Cell> {
        self.column_index(label).map(|i| row.cell(i))
    }
}

/// Where to read a table from: a file plus an optional sheet selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    pub path: PathBuf,
    pub sheet: Option<String>,
    /// 0-based index of the header row.
    pub header_row: usize,
}

impl SourceLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sheet: None,
            header_row: 0,
        }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn with_header_row(mut self, header_row: usize) -> Self {
        self.header_row = header_row;
        self
    }

    /// `path` or `path#sheet`.
    pub fn source_id(&self) -> String {
        match &self.sheet {
            Some(sheet) => format!("{}#{}", self.path.display(), sheet),
            None => self.path.display().to_string(),
        }
    }

    fn format(&self) -> SourceResult<SourceFormat> {
        SourceFormat::from_path(&self.path)
    }
}

/// Parses `path` or `path#Sheet name`.
impl FromStr for SourceLocator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty source locator".to_string());
        }
        match s.rsplit_once('#') {
            Some((path, sheet)) if !path.is_empty() && !sheet.trim().is_empty() => {
                Ok(SourceLocator::new(path).with_sheet(sheet.trim()))
            }
            _ => Ok(SourceLocator::new(s)),
        }
    }
}

/// Supported physical formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> SourceResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" | "txt" | "tsv" => Ok(SourceFormat::Delimited),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(SourceError::UnsupportedFormat(ext)),
        }
    }
}

/// Read a tabular source into a [`RawTable`].
///
/// Fails with [`SourceError::NotFound`] when the file is missing,
/// [`SourceError::Empty`] when no data row survives, and
/// [`SourceError::Unreadable`] when the file cannot be decoded.
pub fn read_source(locator: &SourceLocator) -> SourceResult<RawTable> {
    if !locator.path.exists() {
        return Err(SourceError::NotFound(locator.path.clone()));
    }

    let table = match locator.format()? {
        SourceFormat::Delimited => {
            if let Some(ref sheet) = locator.sheet {
                tracing::warn!(sheet = %sheet, "sheet selector ignored for delimited file");
            }
            let bytes = std::fs::read(&locator.path)
                .map_err(|e| SourceError::unreadable(locator.source_id(), e.to_string()))?;
            parse_delimited(&bytes, &locator.path.display().to_string(), locator.header_row)?
        }
        SourceFormat::Spreadsheet => read_sheet(locator)?,
    };

    if table.row_count() == 0 {
        return Err(SourceError::Empty(table.source_id().to_string()));
    }

    tracing::info!(
        source = %table.source_id(),
        rows = table.row_count(),
        columns = table.headers().len(),
        "source loaded"
    );

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_locator_with_sheet() {
        let loc: SourceLocator = "docs/mao_de_obra.xlsx#SEM Desoneração".parse().unwrap();
        assert_eq!(loc.path, PathBuf::from("docs/mao_de_obra.xlsx"));
        assert_eq!(loc.sheet.as_deref(), Some("SEM Desoneração"));
        assert_eq!(loc.source_id(), "docs/mao_de_obra.xlsx#SEM Desoneração");
    }

    #[test]
    fn test_locator_without_sheet() {
        let loc: SourceLocator = "insumos.csv".parse().unwrap();
        assert_eq!(loc.sheet, None);
        assert!("".parse::<SourceLocator>().is_err());
    }

    #[test]
    fn test_cell_as_text() {
        assert_eq!(Cell::Number(1234.0).as_text().as_deref(), Some("1234"));
        assert_eq!(Cell::Number(12.5).as_text().as_deref(), Some("12.5"));
        assert_eq!(Cell::from_text("   "), Cell::Empty);
        assert_eq!(Cell::Empty.as_text(), None);
    }

    #[test]
    fn test_read_missing_file() {
        let loc = SourceLocator::new("does/not/exist.csv");
        assert!(matches!(read_source(&loc), Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_read_header_only_is_empty() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Código;Descrição").unwrap();
        let loc = SourceLocator::new(file.path());
        assert!(matches!(read_source(&loc), Err(SourceError::Empty(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::new().unwrap();
        let loc = SourceLocator::new(file.path());
        assert!(matches!(read_source(&loc), Err(SourceError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_read_csv_source() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Código;Descrição;Preço").unwrap();
        writeln!(file, "100;Areia média;R$ 12,50").unwrap();
        writeln!(file, "200;Brita 1;").unwrap();

        let table = read_source(&SourceLocator::new(file.path())).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.headers(), &["Código", "Descrição", "Preço"]);
        let row = &table.rows()[1];
        assert_eq!(table.value(row, "Preço"), Some(&Cell::Empty));
        assert_eq!(row.line, 3);
    }
}
