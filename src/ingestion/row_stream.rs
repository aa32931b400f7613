//! Row Stream - one pull-based interface over every supported file family

use crate::error::Result;
use crate::ingestion::cell::Row;
use crate::ingestion::csv_stream::DelimitedRowStream;
use crate::ingestion::sniffer::FileFormat;
use crate::ingestion::xlsx_stream::SpreadsheetRowStream;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

/// Lazy, finite sequence of raw rows.
///
/// Every physical row is yielded, the header included. Exhaustion is final:
/// re-reading a file needs a fresh stream.
///
/// Implementations:
/// - DelimitedRowStream: comma/semicolon/tab/pipe separated text
/// - SpreadsheetRowStream: first worksheet of an xlsx container
pub trait RowStream: Iterator<Item = Result<Row>> + Send {
    /// Source family, e.g. "csv" or "xlsx".
    fn source_type(&self) -> &str;
}

/// Open the stream matching a sniffed format.
pub fn open_row_stream(path: &Path, format: FileFormat) -> Result<Box<dyn RowStream>> {
    match format {
        FileFormat::DelimitedText { delimiter } => {
            Ok(Box::new(DelimitedRowStream::open(path, delimiter)?))
        }
        FileFormat::SpreadsheetContainer => Ok(Box::new(SpreadsheetRowStream::open(path)?)),
    }
}

/// Async side of a row stream.
///
/// The parser runs on the blocking pool and hands rows over a bounded
/// channel, so the consumer suspends on every row instead of blocking a
/// runtime worker. A parse error ends the feed after being delivered.
pub struct RowFeed {
    rx: mpsc::Receiver<Result<Row>>,
}

impl RowFeed {
    pub fn spawn(mut stream: Box<dyn RowStream>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::task::spawn_blocking(move || {
            let source = stream.source_type().to_string();
            let mut rows = 0u64;
            for item in stream.by_ref() {
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() {
                    debug!(source = %source, rows, "row feed receiver dropped");
                    return;
                }
                if failed {
                    return;
                }
                rows += 1;
            }
            debug!(source = %source, rows, "row stream exhausted");
        });
        Self { rx }
    }

    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        self.rx.recv().await
    }
}

/// Drain a whole stream into memory. Test and tooling helper only; the
/// pipeline itself never holds a full file.
pub fn collect_rows(stream: Box<dyn RowStream>) -> Result<Vec<Row>> {
    stream.collect::<Result<Vec<_>>>()
}
