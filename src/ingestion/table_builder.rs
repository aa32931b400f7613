//! Table Builder - destination table naming, DDL and the once-per-job materializer

use crate::db::warehouse::Warehouse;
use crate::error::Result;
use crate::ingestion::schema_inference::{ColumnMetadata, ROW_ID_COLUMN};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// A destination table in the warehouse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DestinationTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl DestinationTable {
    pub fn new(schema: &str, job_id: Uuid, columns: Vec<ColumnMetadata>) -> Self {
        Self {
            schema: schema.to_string(),
            name: table_name_for_job(job_id),
            columns,
        }
    }

    /// `"schema"."table"`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    pub fn create_sql(&self) -> String {
        let column_defs = std::iter::once(format!(
            "{} BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
            quote_ident(ROW_ID_COLUMN)
        ))
        .chain(self.columns.iter().map(|c| {
            format!("{} {}", quote_ident(&c.sanitized_name), c.inferred_type.sql_type())
        }))
        .join(", ");

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_name(),
            column_defs
        )
    }

    /// Multi-row INSERT with `$n::TYPE` placeholders for `row_count` rows.
    pub fn insert_sql(&self, row_count: usize) -> String {
        let column_list = self
            .columns
            .iter()
            .map(|c| quote_ident(&c.sanitized_name))
            .join(", ");

        let width = self.columns.len();
        let values = (0..row_count)
            .map(|row| {
                let placeholders = self
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(col, c)| format!("${}::{}", row * width + col + 1, c.inferred_type.sql_type()))
                    .join(", ");
                format!("({})", placeholders)
            })
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.qualified_name(),
            column_list,
            values
        )
    }
}

/// Deterministic table name for a job: `import_<uuid without dashes>`.
pub fn table_name_for_job(job_id: Uuid) -> String {
    format!("import_{}", job_id.simple())
}

/// Column names are sanitized to `[a-z0-9_]`, quoting keeps digit-led and
/// reserved names valid.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Issues the destination DDL at most once per job.
pub struct TableMaterializer {
    materialized: bool,
}

impl TableMaterializer {
    pub fn new() -> Self {
        Self {
            materialized: false,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    pub async fn materialize(
        &mut self,
        warehouse: &mut dyn Warehouse,
        table: &DestinationTable,
    ) -> Result<()> {
        if self.materialized {
            debug!(table = %table.name, "destination table already materialized");
            return Ok(());
        }
        warehouse.create_table(table).await?;
        self.materialized = true;
        info!(
            table = %table.qualified_name(),
            columns = table.columns.len(),
            "destination table created"
        );
        Ok(())
    }
}

impl Default for TableMaterializer {
    fn default() -> Self {
        Self::new()
    }
}
