//! Database module: job metadata store and warehouse sink

pub mod connection;
pub mod job_repo;
pub mod warehouse;

pub use connection::{init_pool, DbPool};
pub use job_repo::{JobStore, PgJobStore};
pub use warehouse::{PgWarehouse, PgWarehouseConnector, Warehouse, WarehouseConnector};
