//! Spreadsheet reader (xlsx / xls / ods) backed by calamine.

use calamine::{open_workbook_auto, Data, Reader};

use super::{Cell, RawRow, RawTable, SourceLocator};
use crate::error::{SourceError, SourceResult};
use crate::schema::normalize_label;

/// Read one sheet of a workbook into a [`RawTable`].
///
/// The sheet is chosen by exact name, then by normalized name (so that
/// `"manutencoes"` finds `"Manutenções"`); without a selector the first
/// sheet is used.
pub fn read_sheet(locator: &SourceLocator) -> SourceResult<RawTable> {
    let path_id = locator.path.display().to_string();
    let mut workbook = open_workbook_auto(&locator.path)
        .map_err(|e| SourceError::unreadable(&path_id, e.to_string()))?;

    let sheet_names = workbook.sheet_names();
    let sheet_name = resolve_sheet(&sheet_names, locator.sheet.as_deref()).ok_or_else(|| {
        match &locator.sheet {
            Some(sheet) => SourceError::SheetNotFound {
                source_id: path_id.clone(),
                sheet: sheet.clone(),
                available: sheet_names.clone(),
            },
            None => SourceError::unreadable(&path_id, "workbook has no sheets"),
        }
    })?;

    let source_id = format!("{}#{}", path_id, sheet_name);
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| SourceError::unreadable(&source_id, e.to_string()))?;

    let (first_row, _) = range.start().unwrap_or((0, 0));
    let mut rows_iter = range.rows().enumerate().skip(locator.header_row);

    let headers: Vec<String> = match rows_iter.next() {
        Some((_, header)) => header
            .iter()
            .map(|cell| convert_cell(cell).as_text().unwrap_or_default().trim().to_string())
            .collect(),
        None => return Err(SourceError::Empty(source_id)),
    };

    if headers.iter().all(|h| h.is_empty()) {
        return Err(SourceError::unreadable(&source_id, "header row is blank"));
    }

    let mut rows = Vec::new();
    for (offset, data_row) in rows_iter {
        let row = RawRow {
            line: first_row as usize + offset + 1,
            cells: data_row.iter().map(convert_cell).collect(),
        };
        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(RawTable::new(source_id, headers, rows))
}

fn resolve_sheet(available: &[String], wanted: Option<&str>) -> Option<String> {
    match wanted {
        None => available.first().cloned(),
        Some(wanted) => available
            .iter()
            .find(|name| name.as_str() == wanted)
            .or_else(|| {
                let key = normalize_label(wanted);
                available.iter().find(|name| normalize_label(name) == key)
            })
            .cloned(),
    }
}

/// Map a calamine cell onto the engine's untyped cell.
///
/// Date cells become ISO `YYYY-MM-DD` text; error cells (`#N/A`, `#REF!`)
/// become empty.
fn convert_cell(cell: &Data) -> Cell {
    match cell {
        Data::String(s) => Cell::from_text(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(d) => Cell::Text(d.date().format("%Y-%m-%d").to_string()),
            None => Cell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => Cell::from_text(s.get(..10).unwrap_or(s)),
        Data::DurationIso(s) => Cell::from_text(s),
        Data::Error(_) | Data::Empty => Cell::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["SEM Desoneração".to_string(), "COM Desoneração".to_string()]
    }

    #[test]
    fn test_resolve_sheet_default_is_first() {
        assert_eq!(resolve_sheet(&names(), None).as_deref(), Some("SEM Desoneração"));
    }

    #[test]
    fn test_resolve_sheet_normalized() {
        assert_eq!(
            resolve_sheet(&names(), Some("com desoneracao")).as_deref(),
            Some("COM Desoneração")
        );
        assert_eq!(resolve_sheet(&names(), Some("Analítico")), None);
    }

    #[test]
    fn test_convert_cells() {
        assert_eq!(convert_cell(&Data::Int(87)), Cell::Number(87.0));
        assert_eq!(convert_cell(&Data::String("  ".into())), Cell::Empty);
        assert_eq!(
            convert_cell(&Data::DateTimeIso("2025-04-01T00:00:00".into())),
            Cell::Text("2025-04-01".into())
        );
        assert_eq!(convert_cell(&Data::Empty), Cell::Empty);
    }

    #[test]
    fn test_corrupt_workbook_is_unreadable() {
        use std::io::Write;
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"not a zip archive").unwrap();
        let loc = SourceLocator::new(file.path());
        assert!(matches!(read_sheet(&loc), Err(SourceError::Unreadable { .. })));
    }
}
