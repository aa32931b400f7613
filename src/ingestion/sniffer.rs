//! Format Sniffer - classifies a source file from a small byte prefix

use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Local file header signature of a zip container (xlsx is a zip).
const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Candidate delimiters in tie-break order.
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    SpreadsheetContainer,
    DelimitedText { delimiter: u8 },
}

/// Read up to `prefix_len` bytes from `path` and classify them.
pub fn sniff_file(path: &Path, prefix_len: usize) -> Result<FileFormat> {
    let file = File::open(path)?;
    let mut prefix = Vec::with_capacity(prefix_len);
    file.take(prefix_len as u64).read_to_end(&mut prefix)?;
    Ok(sniff_bytes(&prefix))
}

pub fn sniff_bytes(prefix: &[u8]) -> FileFormat {
    if prefix.starts_with(&ZIP_SIGNATURE) {
        return FileFormat::SpreadsheetContainer;
    }
    FileFormat::DelimitedText {
        delimiter: detect_delimiter(prefix),
    }
}

/// Most frequent candidate on the first line; comma on ties or when none occur.
fn detect_delimiter(prefix: &[u8]) -> u8 {
    let first_line = prefix
        .split(|&b| b == b'\n')
        .next()
        .unwrap_or_default();

    let mut best = DELIMITERS[0];
    let mut best_count = 0usize;
    for candidate in DELIMITERS {
        let count = first_line.iter().filter(|&&b| b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}
