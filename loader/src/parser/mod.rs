//! Delimited text input.
//!
//! Reads the header line and then yields data rows one at a time, so the
//! loader never holds more than the current row in memory. Cells are trimmed;
//! rows may be shorter than the header (missing trailing cells read as absent).

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;

use crate::error::{HeaderError, LoadError};

/// Column separator of the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delimiter {
    /// Fixed separator.
    Char(char),
    /// Detect from the header line.
    Auto,
}

impl Default for Delimiter {
    fn default() -> Self {
        Delimiter::Char(',')
    }
}

/// Detect the delimiter by counting occurrences in the header line
pub fn detect_delimiter(header_line: &str) -> char {
    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = header_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// A data row together with its 1-based row number (header excluded).
#[derive(Debug, Clone)]
pub struct RawRow {
    pub number: usize,
    pub cells: csv::StringRecord,
}

/// An open input: header cells plus a pull-based row stream.
pub struct CsvInput {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    delimiter: char,
    next_row: usize,
}

impl std::fmt::Debug for CsvInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvInput")
            .field("headers", &self.headers)
            .field("delimiter", &self.delimiter)
            .field("next_row", &self.next_row)
            .finish()
    }
}

impl CsvInput {
    /// Open a file.
    pub fn open<P: AsRef<Path>>(path: P, delimiter: Delimiter) -> Result<Self, LoadError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file, delimiter)
    }

    /// Wrap any reader.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, delimiter: Delimiter) -> Result<Self, LoadError> {
        let (source, delimiter): (Box<dyn Read + Send>, char) = match delimiter {
            Delimiter::Char(c) => (Box::new(reader), c),
            Delimiter::Auto => {
                let mut buffered = BufReader::new(reader);
                let mut first_line = String::new();
                buffered.read_line(&mut first_line)?;
                let detected = detect_delimiter(&first_line);
                (Box::new(Cursor::new(first_line.into_bytes()).chain(buffered)), detected)
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte(delimiter)?)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let mut header = csv::StringRecord::new();
        if !reader.read_record(&mut header)? {
            return Err(HeaderError::Empty.into());
        }

        Ok(Self {
            reader,
            headers: header.iter().map(str::to_string).collect(),
            delimiter,
            next_row: 1,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Pull the next data row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<RawRow>, LoadError> {
        let mut cells = csv::StringRecord::new();
        if !self.reader.read_record(&mut cells)? {
            return Ok(None);
        }
        let number = self.next_row;
        self.next_row += 1;
        Ok(Some(RawRow { number, cells }))
    }
}

fn delimiter_byte(delimiter: char) -> Result<u8, LoadError> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(LoadError::Csv {
            line: 1,
            message: format!("delimiter '{}' is not a single-byte character", delimiter),
        })
    }
}
