//! Streaming reader for the legacy CSV export
//!
//! Three ways in: materialize every row ([`RecordParser::read_all`]), count
//! rows ([`RecordParser::count_rows`]), or walk rows lazily with a callback
//! that can stop early ([`RecordParser::for_each`]). The lazy forms never hold
//! more than one row in memory.
//!
//! A malformed file (bad UTF-8, a row whose field count differs from the
//! header) is a terminal [`MigrateError::Parse`]; rows read before the bad one
//! are not handed out as a partial result by `read_all`.

use csv::{ReaderBuilder, StringRecordsIntoIter, Trim};
use std::fs::File;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::RawRecord;

const UTF8_BOM: char = '\u{feff}';

/// A raw row together with its 1-based position in the file (header excluded)
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub row_number: usize,
    pub record: RawRecord,
}

/// Reader for one export file with an optional row limit
#[derive(Debug, Clone)]
pub struct RecordParser {
    path: PathBuf,
    limit: Option<usize>,
}

impl RecordParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: None,
        }
    }

    /// Stop after `limit` rows (None = read everything)
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a lazy row iterator
    pub fn rows(&self) -> Result<RowIter> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(Trim::Headers)
            .from_path(&self.path)?;

        let headers = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches(UTF8_BOM).trim().to_string()
                } else {
                    h.to_string()
                }
            })
            .collect::<Vec<_>>();

        debug!(path = %self.path.display(), columns = headers.len(), "Opened export");

        Ok(RowIter {
            headers,
            records: reader.into_records(),
            next_row: 1,
            limit: self.limit,
        })
    }

    /// Read every row (up to the limit) into memory
    pub fn read_all(&self) -> Result<Vec<ParsedRow>> {
        let rows = self.rows()?.collect::<Result<Vec<_>>>()?;
        info!(path = %self.path.display(), rows = rows.len(), "Parsed export");
        Ok(rows)
    }

    /// Count data rows in the file, ignoring the limit
    pub fn count_rows(&self) -> Result<usize> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(&self.path)?;

        let mut count = 0;
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            count += 1;
        }
        Ok(count)
    }

    /// Walk rows one at a time; the callback returns `ControlFlow::Break` to
    /// stop. Returns the number of rows handed to the callback.
    pub fn for_each<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut(ParsedRow) -> ControlFlow<()>,
    {
        let mut seen = 0;
        for row in self.rows()? {
            seen += 1;
            if f(row?).is_break() {
                break;
            }
        }
        Ok(seen)
    }
}

/// Lazy iterator over the rows of an export
pub struct RowIter {
    headers: Vec<String>,
    records: StringRecordsIntoIter<File>,
    next_row: usize,
    limit: Option<usize>,
}

impl RowIter {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for RowIter {
    type Item = Result<ParsedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(limit) = self.limit {
            if self.next_row > limit {
                return None;
            }
        }

        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };

        let raw = RawRecord::from_pairs(
            self.headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.clone(), v.to_string())),
        );

        let row = ParsedRow {
            row_number: self.next_row,
            record: raw,
        };
        self.next_row += 1;
        Some(Ok(row))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const SAMPLE: &str = "ID,Title,City\n\
        a-1,First,St. Louis\n\
        a-2,Second,Chesterfield\n\
        a-3,Third,Clayton\n";

    #[test]
    fn test_read_all_numbers_rows_from_one() {
        let file = write_csv(SAMPLE);
        let rows = RecordParser::new(file.path()).read_all().unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].row_number, 1);
        assert_eq!(rows[2].row_number, 3);
        assert_eq!(rows[1].record.get("City"), Some("Chesterfield"));
    }

    #[test]
    fn test_read_all_respects_limit() {
        let file = write_csv(SAMPLE);
        let rows = RecordParser::new(file.path())
            .with_limit(Some(2))
            .read_all()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].record.get("ID"), Some("a-2"));
    }

    #[test]
    fn test_count_rows_ignores_limit() {
        let file = write_csv(SAMPLE);
        let count = RecordParser::new(file.path())
            .with_limit(Some(1))
            .count_rows()
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_for_each_can_stop_early() {
        let file = write_csv(SAMPLE);
        let mut ids = Vec::new();

        let seen = RecordParser::new(file.path())
            .for_each(|row| {
                ids.push(row.record.get("ID").unwrap().to_string());
                if row.row_number == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(ids, vec!["a-1", "a-2"]);
    }

    #[test]
    fn test_bom_is_stripped_from_first_header() {
        let file = write_csv("\u{feff}ID,Title\nx-9,Loft\n");
        let rows = RecordParser::new(file.path()).read_all().unwrap();
        assert_eq!(rows[0].record.get("ID"), Some("x-9"));
    }

    #[test]
    fn test_quoted_json_cells_survive() {
        let file = write_csv(
            "ID,Address\n\
             a-1,\"{\"\"city\"\":\"\"Clayton\"\",\"\"postalCode\"\":\"\"63105\"\"}\"\n",
        );
        let rows = RecordParser::new(file.path()).read_all().unwrap();
        assert_eq!(
            rows[0].record.get("Address"),
            Some(r#"{"city":"Clayton","postalCode":"63105"}"#)
        );
    }

    #[test]
    fn test_malformed_row_is_a_terminal_error() {
        let file = write_csv("ID,Title\na-1,Ok\na-2,Too,Many,Fields\na-3,Never\n");
        let result = RecordParser::new(file.path()).read_all();
        assert!(matches!(result, Err(MigrateError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = RecordParser::new("/definitely/not/here.csv").read_all();
        assert!(result.is_err());
    }
}
