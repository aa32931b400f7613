//! Spreadsheet stream - first worksheet of an xlsx container, read incrementally
//!
//! The workbook parts that are small by nature (shared strings, styles,
//! workbook and its relationships) are loaded once. The worksheet itself is
//! decompressed and parsed row by row on a dedicated reader thread that
//! hands rows over a bounded channel, so memory stays proportional to one
//! row plus the shared string table.

use crate::error::{IngestError, Result};
use crate::ingestion::cell::{CellValue, Row};
use crate::ingestion::row_stream::RowStream;
use chrono::{Days, NaiveDate};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::JoinHandle;
use tracing::{debug, warn};
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const STYLES_PART: &str = "xl/styles.xml";
const DEFAULT_SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// Excel's column limit (XFD).
const MAX_COLUMNS: usize = 16_384;

/// Rows buffered between the reader thread and the consumer.
const ROW_BUFFER: usize = 256;

/// Workbook-level lookups needed to turn raw `<c>` elements into values.
#[derive(Clone, Debug, Default)]
pub struct SheetContext {
    pub shared_strings: Vec<String>,
    /// Indexed by the cell's `s` attribute: does that style format a date?
    pub date_styles: Vec<bool>,
    pub date1904: bool,
}

pub struct SpreadsheetRowStream {
    rx: Receiver<Result<Row>>,
    reader: Option<JoinHandle<()>>,
}

impl SpreadsheetRowStream {
    pub fn open(path: &Path) -> Result<Self> {
        let mut archive = ZipArchive::new(File::open(path)?)?;

        let (sheet_part, date1904) = locate_first_sheet(&mut archive)?;
        let context = SheetContext {
            shared_strings: load_shared_strings(&mut archive)?,
            date_styles: load_date_styles(&mut archive)?,
            date1904,
        };
        if archive.index_for_name(&sheet_part).is_none() {
            return Err(IngestError::Parse(format!(
                "worksheet part '{}' missing from container",
                sheet_part
            )));
        }
        debug!(
            sheet = %sheet_part,
            shared_strings = context.shared_strings.len(),
            "opening first worksheet"
        );

        let (tx, rx) = sync_channel(ROW_BUFFER);
        let reader = std::thread::Builder::new()
            .name("xlsx-reader".to_string())
            .spawn(move || {
                let entry = match archive.by_name(&sheet_part) {
                    Ok(entry) => entry,
                    Err(e) => {
                        let _ = tx.send(Err(e.into()));
                        return;
                    }
                };
                let mut parser = SheetParser::new(BufReader::new(entry), context);
                loop {
                    match parser.next_row() {
                        Ok(Some(row)) => {
                            if tx.send(Ok(row)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => return,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            rx,
            reader: Some(reader),
        })
    }
}

impl Iterator for SpreadsheetRowStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                // Sender gone: the reader finished, or died without reporting.
                let handle = self.reader.take()?;
                match handle.join() {
                    Ok(()) => None,
                    Err(_) => Some(Err(IngestError::Parse(
                        "spreadsheet reader thread panicked".to_string(),
                    ))),
                }
            }
        }
    }
}

impl RowStream for SpreadsheetRowStream {
    fn source_type(&self) -> &str {
        "xlsx"
    }
}

/// Pull parser over one worksheet part.
pub struct SheetParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    context: SheetContext,
    finished: bool,
}

/// State of the `<c>` element being read.
#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    style: Option<usize>,
    value: String,
    inline: String,
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    Value,
    Inline,
}

impl<R: BufRead> SheetParser<R> {
    pub fn new(source: R, context: SheetContext) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::new(),
            context,
            finished: false,
        }
    }

    /// Next `<row>` in document order, `None` after `</sheetData>` or EOF.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Ok(None);
        }

        let mut row: Option<Row> = None;
        let mut cell: Option<PendingCell> = None;
        let mut target = TextTarget::None;
        let mut in_inline = false;
        let mut in_phonetic = false;

        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?;
            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => row = Some(Vec::new()),
                    b"c" => {
                        let next_column = row.as_ref().map_or(0, Vec::len);
                        cell = Some(start_cell(&e, next_column)?);
                    }
                    b"v" if cell.is_some() => target = TextTarget::Value,
                    b"is" if cell.is_some() => in_inline = true,
                    b"rPh" => in_phonetic = true,
                    b"t" if in_inline && !in_phonetic => target = TextTarget::Inline,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => return Ok(Some(Vec::new())),
                    b"c" => {
                        if let Some(r) = row.as_mut() {
                            let next_column = r.len();
                            let empty = start_cell(&e, next_column)?;
                            place(r, empty.column, CellValue::Empty);
                        }
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(c) = cell.as_mut() {
                        let text = unescape_lossy(&t);
                        match target {
                            TextTarget::Value => c.value.push_str(&text),
                            TextTarget::Inline => c.inline.push_str(&text),
                            TextTarget::None => {}
                        }
                    }
                }
                Event::GeneralRef(r) => {
                    if let Some(c) = cell.as_mut() {
                        let text = resolve_reference(&r);
                        match target {
                            TextTarget::Value => c.value.push_str(&text),
                            TextTarget::Inline => c.inline.push_str(&text),
                            TextTarget::None => {}
                        }
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" | b"t" => target = TextTarget::None,
                    b"is" => in_inline = false,
                    b"rPh" => in_phonetic = false,
                    b"c" => {
                        if let (Some(done), Some(r)) = (cell.take(), row.as_mut()) {
                            let column = done.column;
                            let value = resolve_cell(&self.context, done)?;
                            place(r, column, value);
                        }
                    }
                    b"row" => return Ok(Some(row.take().unwrap_or_default())),
                    b"sheetData" => {
                        self.finished = true;
                        return Ok(None);
                    }
                    _ => {}
                },
                Event::Eof => {
                    self.finished = true;
                    if row.is_some() {
                        return Err(IngestError::Parse(
                            "worksheet ended inside a row".to_string(),
                        ));
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

fn resolve_cell(context: &SheetContext, cell: PendingCell) -> Result<CellValue> {
    let kind = cell.kind.as_deref().unwrap_or("n");
    let value = cell.value;

    let resolved = match kind {
        "s" => {
            let index: usize = value.trim().parse().map_err(|_| {
                IngestError::Parse(format!("invalid shared string index '{}'", value))
            })?;
            let text = context.shared_strings.get(index).ok_or_else(|| {
                IngestError::Parse(format!("shared string {} out of range", index))
            })?;
            CellValue::Text(text.clone())
        }
        "inlineStr" => CellValue::Text(cell.inline),
        "str" => CellValue::Text(value),
        "b" => match value.trim() {
            "" => CellValue::Empty,
            v => CellValue::Bool(v == "1" || v.eq_ignore_ascii_case("true")),
        },
        "e" => CellValue::Object(json!({ "error": value })),
        "d" => {
            let parsed = value
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            match parsed {
                Some(date) => CellValue::Date(date),
                None => CellValue::Text(value),
            }
        }
        _ => {
            let raw = value.trim();
            if raw.is_empty() {
                return Ok(CellValue::Empty);
            }
            let is_date_style = cell
                .style
                .and_then(|s| context.date_styles.get(s).copied())
                .unwrap_or(false);
            parse_number(raw, is_date_style, context.date1904)
        }
    };
    Ok(resolved)
}

fn start_cell(e: &BytesStart, next_column: usize) -> Result<PendingCell> {
    let column = match attr(e, b"r") {
        Some(reference) => column_index(&reference)?,
        None => next_column,
    };
    Ok(PendingCell {
        column,
        kind: attr(e, b"t"),
        style: attr(e, b"s").and_then(|s| s.parse().ok()),
        ..Default::default()
    })
}

fn place(row: &mut Row, column: usize, value: CellValue) {
    if row.len() <= column {
        row.resize(column + 1, CellValue::Empty);
    }
    row[column] = value;
}

fn parse_number(raw: &str, is_date_style: bool, date1904: bool) -> CellValue {
    let Ok(number) = raw.parse::<f64>() else {
        return CellValue::Text(raw.to_string());
    };
    if is_date_style {
        if let Some(date) = excel_serial_to_date(number, date1904) {
            return CellValue::Date(date);
        }
    }
    if !raw.contains(['.', 'e', 'E']) {
        if let Ok(int) = raw.parse::<i64>() {
            return CellValue::Int(int);
        }
    }
    CellValue::Float(number)
}

/// Day serial to calendar date; the time-of-day fraction is dropped.
pub fn excel_serial_to_date(serial: f64, date1904: bool) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let mut days = serial.floor() as u64;
    // 1899-12-30 absorbs the phantom 1900-02-29 (serial 60) only for later serials.
    if !date1904 && days < 60 {
        days += 1;
    }
    let base = if date1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    base.checked_add_days(Days::new(days))
}

/// "AB12" -> 27 (zero based).
pub fn column_index(reference: &str) -> Result<usize> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return Err(IngestError::Parse(format!("invalid cell reference '{}'", reference)));
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        if index > MAX_COLUMNS {
            return Err(IngestError::Parse(format!(
                "cell reference '{}' beyond the last column",
                reference
            )));
        }
    }
    Ok(index - 1)
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| unescape_lossy(&a.value))
}

fn unescape_lossy(bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    match quick_xml::escape::unescape(&raw) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.into_owned(),
    }
}

/// `&amp;`, `&#10;` and friends reported as standalone references.
fn resolve_reference(name: &[u8]) -> String {
    let entity = format!("&{};", String::from_utf8_lossy(name));
    match quick_xml::escape::unescape(&entity) {
        Ok(text) => text.into_owned(),
        Err(_) => entity,
    }
}

/// Whole bytes of a small workbook part, `None` when the part is absent.
fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Path of the first worksheet in workbook order, plus the 1904 date flag.
fn locate_first_sheet<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<(String, bool)> {
    let mut first_rel_id: Option<String> = None;
    let mut date1904 = false;

    if let Some(bytes) = read_part(archive, WORKBOOK_PART)? {
        let mut reader = Reader::from_reader(bytes.as_slice());
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                    b"workbookPr" => {
                        date1904 = matches!(attr(&e, b"date1904").as_deref(), Some("1") | Some("true"));
                    }
                    b"sheet" if first_rel_id.is_none() => {
                        first_rel_id = attr(&e, b"id");
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
    } else {
        return Err(IngestError::Parse(
            "zip container has no workbook part; not an xlsx file".to_string(),
        ));
    }

    let Some(rel_id) = first_rel_id else {
        return Err(IngestError::Parse("workbook declares no worksheets".to_string()));
    };

    let mut targets: HashMap<String, String> = HashMap::new();
    if let Some(bytes) = read_part(archive, WORKBOOK_RELS_PART)? {
        let mut reader = Reader::from_reader(bytes.as_slice());
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                    if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                        targets.insert(id, target);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
    }

    let part = match targets.get(&rel_id) {
        Some(target) => match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{}", target),
        },
        None => {
            warn!(rel_id = %rel_id, "sheet relationship not found, assuming default part");
            DEFAULT_SHEET_PART.to_string()
        }
    };
    Ok((part, date1904))
}

fn load_shared_strings<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>> {
    let Some(bytes) = read_part(archive, SHARED_STRINGS_PART)? else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::from_reader(bytes.as_slice());

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => current.push_str(&unescape_lossy(&t)),
            Event::GeneralRef(r) if in_text => current.push_str(&resolve_reference(&r)),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// One flag per `cellXfs/xf` entry.
fn load_date_styles<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<bool>> {
    let Some(bytes) = read_part(archive, STYLES_PART)? else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::from_reader(bytes.as_slice());

    let mut custom_formats: HashMap<u32, bool> = HashMap::new();
    let mut styles = Vec::new();
    let mut in_cell_xfs = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"numFmt" => {
                    if let (Some(id), Some(code)) = (attr(&e, b"numFmtId"), attr(&e, b"formatCode")) {
                        if let Ok(id) = id.parse() {
                            custom_formats.insert(id, is_date_format_code(&code));
                        }
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let id: u32 = attr(&e, b"numFmtId").and_then(|v| v.parse().ok()).unwrap_or(0);
                    let is_date = custom_formats
                        .get(&id)
                        .copied()
                        .unwrap_or_else(|| is_builtin_date_format(id));
                    styles.push(is_date);
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(styles)
}

/// Built-in number formats that render a calendar date. Time-only formats
/// are left numeric.
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=17 | 22 | 27..=36 | 50..=58)
}

fn is_date_format_code(code: &str) -> bool {
    let mut plain = String::with_capacity(code.len());
    let mut chars = code.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                }
            }
            '[' => {
                for q in chars.by_ref() {
                    if q == ']' {
                        break;
                    }
                }
            }
            '\\' => {
                chars.next();
            }
            _ => plain.push(c.to_ascii_lowercase()),
        }
    }
    plain.contains('y') || plain.contains('d')
}
