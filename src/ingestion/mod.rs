//! Ingestion pipeline: sniffing, row streaming, type inference, table
//! creation and batched loading, sequenced by the orchestrator.

pub mod batch_loader;
pub mod cell;
pub mod csv_stream;
pub mod job;
pub mod orchestrator;
pub mod row_stream;
pub mod schema_inference;
pub mod sniffer;
pub mod table_builder;
pub mod xlsx_stream;

pub use batch_loader::BatchLoader;
pub use cell::{CellValue, CleanValue, Row};
pub use csv_stream::DelimitedRowStream;
pub use job::{ImportJob, JobOutcome, JobStatus};
pub use orchestrator::{spawn_import, ImportOrchestrator};
pub use row_stream::{open_row_stream, RowFeed, RowStream};
pub use schema_inference::{
    build_columns, infer_column_types, sanitize_column_name, ColumnMetadata, ColumnType,
    SchemaInference, ROW_ID_COLUMN,
};
pub use sniffer::{sniff_bytes, sniff_file, FileFormat};
pub use table_builder::{DestinationTable, TableMaterializer};
pub use xlsx_stream::SpreadsheetRowStream;
