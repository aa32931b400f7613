//! In-memory collaborators for pipeline tests: a job store, a warehouse that
//! checks casts like the real one, and a tiny HTTP server behind a fake
//! signing service.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use sheet_ingest::config::IngestConfig;
use sheet_ingest::db::{JobStore, Warehouse, WarehouseConnector};
use sheet_ingest::error::{IngestError, Result};
use sheet_ingest::ingestion::{
    CleanValue, ColumnMetadata, ColumnType, DestinationTable, ImportJob, ImportOrchestrator,
    JobOutcome, JobStatus,
};
use sheet_ingest::storage::ObjectStorage;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ImportJob>>,
    history: Mutex<Vec<JobStatus>>,
    progress: Mutex<Vec<u64>>,
    pub fail_progress: AtomicBool,
}

impl MemoryJobStore {
    pub fn job(&self, job_id: Uuid) -> ImportJob {
        self.jobs.lock().unwrap().get(&job_id).cloned().expect("job registered")
    }

    pub fn history(&self) -> Vec<JobStatus> {
        self.history.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<u64> {
        self.progress.lock().unwrap().clone()
    }

    fn update<F: FnOnce(&mut ImportJob)>(&self, job_id: Uuid, f: F) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| IngestError::JobStore(format!("job {} not found", job_id)))?;
        f(job);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: Uuid, source_ref: &str) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .entry(job_id)
            .or_insert_with(|| ImportJob::queued(job_id, source_ref));
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ImportJob>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        self.update(job_id, |job| job.status = status)?;
        self.history.lock().unwrap().push(status);
        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, total_rows: u64) -> Result<()> {
        self.progress.lock().unwrap().push(total_rows);
        if self.fail_progress.load(Ordering::SeqCst) {
            return Err(IngestError::JobStore("metadata store unavailable".into()));
        }
        self.update(job_id, |job| job.total_rows = job.total_rows.max(total_rows))
    }

    async fn complete(&self, job_id: Uuid, total_rows: u64, columns: &[ColumnMetadata]) -> Result<()> {
        self.update(job_id, |job| {
            job.status = JobStatus::Completed;
            job.total_rows = job.total_rows.max(total_rows);
            job.columns = columns.to_vec();
            job.error_message = None;
        })?;
        self.history.lock().unwrap().push(JobStatus::Completed);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<()> {
        self.update(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(error_message.to_string());
        })?;
        self.history.lock().unwrap().push(JobStatus::Failed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Warehouse
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct WarehouseState {
    pub tables: HashMap<String, DestinationTable>,
    pub rows: HashMap<String, Vec<Vec<CleanValue>>>,
    pub create_calls: usize,
    pub insert_attempts: usize,
    pub batch_sizes: Vec<usize>,
    pub opened: usize,
    pub closed: usize,
}

impl WarehouseState {
    pub fn rows_in(&self, table: &str) -> usize {
        self.rows.get(table).map(Vec::len).unwrap_or(0)
    }
}

pub struct FakeWarehouseConnector {
    pub state: Arc<Mutex<WarehouseState>>,
    /// 1-based batch number that fails on every attempt.
    pub fail_batch: Option<usize>,
}

struct FakeWarehouse {
    state: Arc<Mutex<WarehouseState>>,
    fail_batch: Option<usize>,
}

#[async_trait]
impl WarehouseConnector for FakeWarehouseConnector {
    async fn connect(&self) -> Result<Box<dyn Warehouse>> {
        self.state.lock().unwrap().opened += 1;
        Ok(Box::new(FakeWarehouse {
            state: Arc::clone(&self.state),
            fail_batch: self.fail_batch,
        }))
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn create_table(&mut self, table: &DestinationTable) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        state
            .tables
            .entry(table.name.clone())
            .or_insert_with(|| table.clone());
        state.rows.entry(table.name.clone()).or_default();
        Ok(())
    }

    async fn insert_batch(&mut self, table: &DestinationTable, rows: &[Vec<CleanValue>]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.insert_attempts += 1;
        if !state.tables.contains_key(&table.name) {
            return Err(IngestError::Warehouse(format!("relation {} does not exist", table.name)));
        }
        let batch_number = state.batch_sizes.len() + 1;
        if self.fail_batch == Some(batch_number) {
            return Err(IngestError::Warehouse("canceling statement due to conflict".into()));
        }
        for row in rows {
            for (value, column) in row.iter().zip(&table.columns) {
                check_cast(value, column.inferred_type)?;
            }
        }
        state.batch_sizes.push(rows.len());
        state
            .rows
            .entry(table.name.clone())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// The same text-to-type casts the warehouse applies to bound parameters.
fn check_cast(value: &CleanValue, column_type: ColumnType) -> Result<()> {
    let Some(text) = value.to_sql_text() else {
        return Ok(());
    };
    let ok = match column_type {
        ColumnType::Text => true,
        ColumnType::Bigint => text.parse::<i64>().is_ok(),
        ColumnType::Float => text.parse::<f64>().is_ok(),
        ColumnType::Boolean => matches!(
            text.to_lowercase().as_str(),
            "true" | "false" | "t" | "f" | "1" | "0"
        ),
        ColumnType::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d").is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(IngestError::Warehouse(format!(
            "invalid input syntax for type {}: \"{}\"",
            column_type.sql_type().to_lowercase(),
            text
        )))
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

/// Serves fixed bodies by path; anything else is a 404.
pub struct FileServer {
    pub base_url: String,
    pub requests: Arc<AtomicUsize>,
}

impl FileServer {
    pub async fn start(files: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let files = Arc::new(files);
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let files = Arc::clone(&files);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        request.extend_from_slice(&chunk[..n]);
                        if request.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&request);
                    let path = request
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .split('?')
                        .next()
                        .unwrap_or("")
                        .trim_start_matches('/')
                        .to_string();

                    let response = match files.get(&path) {
                        Some(body) => {
                            let mut response = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            response.extend_from_slice(body);
                            response
                        }
                        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }
}

/// Signs every reference as a direct URL on the file server.
pub struct FakeStorage {
    pub base_url: String,
    pub sign_calls: AtomicUsize,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn signed_url(&self, source_ref: &str, _ttl: Duration) -> Result<String> {
        let call = self.sign_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}/{}?token=t{}", self.base_url, source_ref, call))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<ImportOrchestrator>,
    pub jobs: Arc<MemoryJobStore>,
    pub storage: Arc<FakeStorage>,
    pub warehouse: Arc<Mutex<WarehouseState>>,
    pub server: FileServer,
}

pub fn test_config() -> IngestConfig {
    IngestConfig {
        download_retry_delay: Duration::from_millis(10),
        download_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

pub async fn harness(files: Vec<(&str, Vec<u8>)>, config: IngestConfig, fail_batch: Option<usize>) -> Harness {
    let files = files
        .into_iter()
        .map(|(path, body)| (path.to_string(), body))
        .collect();
    let server = FileServer::start(files).await;
    let storage = Arc::new(FakeStorage {
        base_url: server.base_url.clone(),
        sign_calls: AtomicUsize::new(0),
    });
    let jobs = Arc::new(MemoryJobStore::default());
    let warehouse = Arc::new(Mutex::new(WarehouseState::default()));
    let connector = Arc::new(FakeWarehouseConnector {
        state: Arc::clone(&warehouse),
        fail_batch,
    });

    let orchestrator = Arc::new(ImportOrchestrator::new(
        storage.clone(),
        jobs.clone(),
        connector,
        config,
    ));

    Harness {
        orchestrator,
        jobs,
        storage,
        warehouse,
        server,
    }
}

impl Harness {
    /// Register a queued job and run it to a terminal state.
    pub async fn import(&self, source_ref: &str) -> (Uuid, JobOutcome) {
        let job_id = Uuid::new_v4();
        self.jobs.create(job_id, source_ref).await.unwrap();
        let outcome = self.orchestrator.run(job_id, source_ref).await;
        (job_id, outcome)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Single-sheet workbook, one `<row>` per entry of `sheet_rows`. Style 1 is a
/// built-in date format.
pub fn workbook(sheet_rows: &[&str]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    let sheet = format!(
        "<worksheet><sheetData>{}</sheetData></worksheet>",
        sheet_rows
            .iter()
            .map(|cells| format!("<row>{}</row>", cells))
            .collect::<String>()
    );
    let parts = [
        (
            "xl/workbook.xml",
            r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#.to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#.to_string(),
        ),
        (
            "xl/styles.xml",
            r#"<styleSheet><cellXfs><xf numFmtId="0"/><xf numFmtId="14"/></cellXfs></styleSheet>"#.to_string(),
        ),
        ("xl/worksheets/sheet1.xml", sheet),
    ];
    for (name, body) in parts {
        zip.start_file(name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
