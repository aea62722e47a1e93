//! Delimited text reader with encoding and delimiter auto-detection.
//!
//! Government exports arrive in UTF-8, Latin-1 or Windows-1252 and use
//! either `;` or `,` as separator, so both are sniffed before parsing.
//! Quoted headers may span several physical lines.

use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use super::{Cell, RawRow, RawTable};
use crate::error::{SourceError, SourceResult};

/// Separators tried, in order of preference on ties.
const DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Pick the text encoding of an export.
///
/// Valid UTF-8 wins outright; short Portuguese samples are often
/// misdetected by chardet. Anything chardet cannot name as a non-UTF-8
/// charset is read as Windows-1252, a superset of Latin-1.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let (charset, _confidence, _language) = chardet::detect(bytes);
    match Encoding::for_label(chardet::charset2encoding(&charset).as_bytes()) {
        Some(encoding) if encoding != UTF_8 => encoding,
        _ => WINDOWS_1252,
    }
}

/// Decode with `encoding`; a byte-order mark overrides it and is dropped.
pub fn decode_content(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _used, _had_errors) = encoding.decode(bytes);
    text.into_owned()
}

/// Pick the separator that splits the header record into the most fields.
///
/// The header is the logical record at `header_row`, so title rows above it
/// and quoted labels spanning several lines are handled by the csv parser
/// itself. Falls back to `;` when no candidate yields more than one field.
pub fn detect_delimiter(content: &str, header_row: usize) -> u8 {
    let mut best = (b';', 1);
    for delimiter in DELIMITERS {
        let width = header_width(content, delimiter, header_row);
        if width > best.1 {
            best = (delimiter, width);
        }
    }
    best.0
}

fn header_width(content: &str, delimiter: u8, header_row: usize) -> usize {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes())
        .records()
        .nth(header_row)
        .and_then(Result::ok)
        .map(|record| record.iter().filter(|field| !field.trim().is_empty()).count())
        .unwrap_or(0)
}

/// Parse delimited bytes into a [`RawTable`].
///
/// Rows before `header_row` are discarded, blank rows are skipped and
/// rows may be shorter or longer than the header.
pub fn parse_delimited(bytes: &[u8], source_id: &str, header_row: usize) -> SourceResult<RawTable> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, encoding);
    let delimiter = detect_delimiter(&content, header_row);

    tracing::debug!(
        source = source_id,
        encoding = encoding.name(),
        delimiter = %(delimiter as char).escape_default(),
        "sniffed delimited file"
    );

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| SourceError::unreadable(source_id, e.to_string()))?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 1);

        if idx < header_row {
            continue;
        }

        if headers.is_none() {
            headers = Some(record.iter().map(|h| h.trim().to_string()).collect());
            continue;
        }

        let row = RawRow {
            line,
            cells: record.iter().map(Cell::from_text).collect(),
        };
        if !row.is_blank() {
            rows.push(row);
        }
    }

    let headers = match headers {
        Some(h) if h.iter().any(|label| !label.is_empty()) => h,
        Some(_) => return Err(SourceError::unreadable(source_id, "header row is blank")),
        None => return Err(SourceError::Empty(source_id.to_string())),
    };

    Ok(RawTable::new(source_id, headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3", 0), b';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3", 0), b',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3", 0), b'\t');
        assert_eq!(detect_delimiter("single\n1", 0), b';');
    }

    #[test]
    fn test_delimiter_inside_quoted_label_ignored() {
        // Three commas inside quotes, two real semicolons
        let csv = "\"Preço, R$, AC, SP\";Código;Descrição\n1;2;3\n";
        assert_eq!(detect_delimiter(csv, 0), b';');
    }

    #[test]
    fn test_latin1_decoding() {
        // "Descrição" in ISO-8859-1
        let bytes: &[u8] = &[0x44, 0x65, 0x73, 0x63, 0x72, 0x69, 0xE7, 0xE3, 0x6F];
        let encoding = detect_encoding(bytes);
        assert_ne!(encoding, UTF_8);
        assert_eq!(decode_content(bytes, WINDOWS_1252), "Descrição");
    }

    #[test]
    fn test_utf8_bom_stripped() {
        let bytes = b"\xEF\xBB\xBFa;b";
        assert_eq!(detect_encoding(bytes), UTF_8);
        assert_eq!(decode_content(bytes, UTF_8), "a;b");
    }

    #[test]
    fn test_multiline_quoted_header() {
        let csv = "\"Código da\nFamília\";\"Descrição do\nInsumo\"\n1;Cimento\n";
        let table = parse_delimited(csv.as_bytes(), "t.csv", 0).unwrap();
        assert_eq!(table.headers()[0], "Código da\nFamília");
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows()[0].line, 3);
    }

    #[test]
    fn test_comma_multiline_quoted_header() {
        let csv = "\"Código da\nFamília\",\"Código do\nInsumo\",\"Descrição do\nInsumo\",Unidade\n\
                   1,100,\"Cimento, saco 50kg\",KG\n";
        let table = parse_delimited(csv.as_bytes(), "t.csv", 0).unwrap();
        assert_eq!(
            table.headers(),
            &["Código da\nFamília", "Código do\nInsumo", "Descrição do\nInsumo", "Unidade"]
        );
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows()[0].cell(2), &Cell::Text("Cimento, saco 50kg".into()));
    }

    #[test]
    fn test_comma_header_below_title_row() {
        let csv = "SINAPI - Relatorio\nCodigo,Descricao\n10,Areia\n";
        let table = parse_delimited(csv.as_bytes(), "t.csv", 1).unwrap();
        assert_eq!(table.headers(), &["Codigo", "Descricao"]);
        assert_eq!(table.rows()[0].cell(1), &Cell::Text("Areia".into()));
    }

    #[test]
    fn test_blank_rows_skipped_and_flexible_width() {
        let csv = "a;b\n1;2\n;\n3\n4;5;6\n";
        let table = parse_delimited(csv.as_bytes(), "t.csv", 0).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows()[1].cell(1), &Cell::Empty);
    }

    #[test]
    fn test_header_row_offset() {
        let csv = "SINAPI - Relatório\n\nCódigo;Descrição\n10;Areia\n";
        let table = parse_delimited(csv.as_bytes(), "t.csv", 1).unwrap();
        assert_eq!(table.headers(), &["Código", "Descrição"]);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_empty_content() {
        assert!(matches!(
            parse_delimited(b"", "t.csv", 0),
            Err(SourceError::Empty(_))
        ));
    }
}
