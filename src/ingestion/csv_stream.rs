//! Delimited text stream - wraps the csv reader over a local file

use crate::error::Result;
use crate::ingestion::cell::{CellValue, Row};
use crate::ingestion::row_stream::RowStream;
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const UTF8_BOM: &str = "\u{feff}";

/// Streams records one at a time; cells come out as raw text.
pub struct DelimitedRowStream {
    reader: Reader<BufReader<File>>,
    record: ByteRecord,
    first: bool,
    done: bool,
}

impl DelimitedRowStream {
    pub fn open(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::open(path)?;
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(BufReader::new(file));

        Ok(Self {
            reader,
            record: ByteRecord::new(),
            first: true,
            done: false,
        })
    }

    fn decode(&mut self) -> Row {
        let mut row: Row = self
            .record
            .iter()
            .map(|field| CellValue::Text(String::from_utf8_lossy(field).into_owned()))
            .collect();

        if self.first {
            self.first = false;
            if let Some(CellValue::Text(cell)) = row.first_mut() {
                if let Some(stripped) = cell.strip_prefix(UTF8_BOM) {
                    *cell = stripped.to_string();
                }
            }
        }
        row
    }
}

impl Iterator for DelimitedRowStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => Some(Ok(self.decode())),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

impl RowStream for DelimitedRowStream {
    fn source_type(&self) -> &str {
        "csv"
    }
}
